use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use crate::config::SmtpSection;

use super::{Notifier, NotifyError};

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, smtp: &SmtpSection, message: &[u8]) -> Result<(), NotifyError>;
}

/// Hands the message to `curl`, which speaks SMTP with TLS.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    program: PathBuf,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            program: PathBuf::from("curl"),
        }
    }
}

#[async_trait]
impl MailTransport for CurlTransport {
    async fn send(&self, smtp: &SmtpSection, message: &[u8]) -> Result<(), NotifyError> {
        let scheme = if smtp.port == 465 { "smtps" } else { "smtp" };
        let url = format!("{scheme}://{}:{}", smtp.server, smtp.port);
        let mut child = Command::new(&self.program)
            .args([
                "--silent",
                "--show-error",
                "--ssl-reqd",
                "--url",
                &url,
                "--user",
                &format!("{}:{}", smtp.sender, smtp.password),
                "--mail-from",
                &smtp.sender,
                "--mail-rcpt",
                &smtp.receiver,
                "-T",
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message).await?;
        }
        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(NotifyError::Transport {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

pub struct SmtpNotifier {
    smtp: SmtpSection,
    transport: Arc<dyn MailTransport>,
}

impl SmtpNotifier {
    pub fn new(smtp: SmtpSection) -> Self {
        Self {
            smtp,
            transport: Arc::new(CurlTransport::default()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = transport;
        self
    }
}

impl fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("server", &self.smtp.server)
            .field("port", &self.smtp.port)
            .field("receiver", &self.smtp.receiver)
            .finish()
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), NotifyError> {
        if !self.smtp.is_complete() {
            return Err(NotifyError::Incomplete);
        }
        let attachment = match attachment {
            Some(path) if path.exists() => {
                let bytes = tokio::fs::read(path).await?;
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "qrcode.png".into());
                info!(path = %path.display(), "attaching qr code to notification");
                Some((name, bytes))
            }
            _ => None,
        };
        let message = build_message(
            &self.smtp.sender,
            &self.smtp.receiver,
            subject,
            body,
            attachment.as_ref().map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
        );
        self.transport.send(&self.smtp, message.as_bytes()).await?;
        info!(receiver = %self.smtp.receiver, "notification mail sent");
        Ok(())
    }
}

/// Renders a MIME message: a UTF-8 text part plus an optional PNG attachment.
pub fn build_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    attachment: Option<(&str, &[u8])>,
) -> String {
    let boundary = format!("feedliker-{}", uuid::Uuid::new_v4().simple());
    let mut message = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: =?UTF-8?B?{subject}?=\r\nMIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n\
         --{boundary}\r\nContent-Type: text/plain; charset=utf-8\r\n\
         Content-Transfer-Encoding: base64\r\n\r\n{body}\r\n",
        subject = STANDARD.encode(subject),
        body = wrap_base64(body.as_bytes()),
    );
    if let Some((name, bytes)) = attachment {
        message.push_str(&format!(
            "--{boundary}\r\nContent-Type: image/png; name=\"{name}\"\r\n\
             Content-Transfer-Encoding: base64\r\nContent-ID: <qrcode>\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n{data}\r\n",
            data = wrap_base64(bytes),
        ));
    }
    message.push_str(&format!("--{boundary}--\r\n"));
    message
}

fn wrap_base64(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}
