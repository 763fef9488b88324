use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

/// Cookies captured from an authenticated page. Loading a file only proves it
/// parses; the session still has to be validated against the target page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSessionState {
    pub saved_at: DateTime<Utc>,
    pub cookies: Vec<StoredCookie>,
}

impl PersistedSessionState {
    pub fn new(cookies: Vec<StoredCookie>) -> Self {
        Self {
            saved_at: Utc::now(),
            cookies,
        }
    }

    pub async fn load(path: &Path) -> BrowserResult<Self> {
        let raw = fs::read(path).await.map_err(|err| {
            BrowserError::State(format!("failed to read {}: {err}", path.display()))
        })?;
        serde_json::from_slice(&raw).map_err(|err| {
            BrowserError::State(format!("failed to parse {}: {err}", path.display()))
        })
    }

    /// Replaces `path` through a sibling temp file so a crash mid-write never
    /// leaves a truncated state behind.
    pub async fn save(&self, path: &Path) -> BrowserResult<()> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(self)?;
        let temp = temp_path(path);
        fs::write(&temp, payload).await?;
        fs::rename(&temp, path).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "session".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str) -> StoredCookie {
        StoredCookie {
            name: name.into(),
            value: "v".into(),
            domain: ".qq.com".into(),
            path: "/".into(),
            expires: Some(1_900_000_000.0),
            http_only: true,
            secure: true,
        }
    }

    #[tokio::test]
    async fn saving_identical_state_twice_stays_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let state = PersistedSessionState::new(vec![cookie("uin"), cookie("skey")]);

        state.save(&path).await.unwrap();
        let first = PersistedSessionState::load(&path).await.unwrap();
        state.save(&path).await.unwrap();
        let second = PersistedSessionState::load(&path).await.unwrap();

        assert_eq!(first, state);
        assert_eq!(second, state);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            PersistedSessionState::load(&path).await,
            Err(BrowserError::State(_))
        ));
    }

    #[tokio::test]
    async fn save_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/session.json");
        PersistedSessionState::new(Vec::new()).save(&path).await.unwrap();
        assert!(path.exists());
    }
}
