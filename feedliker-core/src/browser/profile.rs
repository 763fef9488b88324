use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::fs;
use uuid::Uuid;

use crate::config::BrowserSection;

use super::error::{BrowserError, BrowserResult};

/// Throwaway Chromium user-data directory. Authentication lives in the
/// persisted cookies, never in the profile.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    id: String,
    path: PathBuf,
    created_at: DateTime<Utc>,
}

impl BrowserProfile {
    fn new(base_dir: &Path) -> BrowserResult<Self> {
        let id = Uuid::new_v4().to_string();
        let path = base_dir.join(&id);
        std::fs::create_dir_all(&path)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;
        Ok(Self {
            id,
            path,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn touch(&self) -> BrowserResult<()> {
        if self.path.exists() {
            fs::write(self.path.join(".last_used"), self.created_at.to_rfc3339())
                .await
                .map_err(|err| {
                    BrowserError::Profile(format!("failed to update profile marker: {err}"))
                })?;
        }
        Ok(())
    }

    pub async fn remove(&self) -> BrowserResult<()> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BrowserError::Profile(format!(
                "failed to remove profile {}: {err}",
                self.id
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileManager {
    base_dir: PathBuf,
    ttl: Duration,
}

impl ProfileManager {
    pub fn new<P: AsRef<Path>>(base_dir: P, ttl: Duration) -> BrowserResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to create profile base dir: {err}"))
        })?;
        Ok(Self { base_dir, ttl })
    }

    pub fn from_config(config: &BrowserSection) -> BrowserResult<Self> {
        let ttl = Duration::from_secs(config.profile_ttl_hours * 60 * 60);
        Self::new(&config.profile_dir, ttl)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn allocate(&self) -> BrowserResult<BrowserProfile> {
        BrowserProfile::new(&self.base_dir)
    }

    /// Removes profiles left behind by crashed runs.
    pub fn cleanup_expired(&self) -> BrowserResult<usize> {
        let now = SystemTime::now();
        let entries = std::fs::read_dir(&self.base_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to list profile directory: {err}"))
        })?;
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let modified = match entry.metadata().and_then(|metadata| metadata.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to read profile metadata");
                    continue;
                }
            };
            if now.duration_since(modified).unwrap_or(Duration::ZERO) > self.ttl {
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "failed to remove expired profile")
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_and_remove_profile() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProfileManager::new(dir.path(), Duration::from_secs(3600)).unwrap();
        let profile = manager.allocate().unwrap();
        assert!(profile.path().starts_with(manager.base_dir()));
        profile.touch().await.unwrap();
        assert!(profile.path().join(".last_used").exists());
        profile.remove().await.unwrap();
        assert!(!profile.path().exists());
        profile.remove().await.unwrap();
    }

    #[test]
    fn cleanup_keeps_fresh_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProfileManager::new(dir.path(), Duration::from_secs(3600)).unwrap();
        let profile = manager.allocate().unwrap();
        assert_eq!(manager.cleanup_expired().unwrap(), 0);
        assert!(profile.path().exists());
    }

    #[test]
    fn cleanup_removes_stale_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProfileManager::new(dir.path(), Duration::ZERO).unwrap();
        let profile = manager.allocate().unwrap();
        let stale = SystemTime::now() - Duration::from_secs(120);
        std::fs::File::open(profile.path())
            .unwrap()
            .set_modified(stale)
            .unwrap();
        assert_eq!(manager.cleanup_expired().unwrap(), 1);
        assert!(!profile.path().exists());
    }
}
