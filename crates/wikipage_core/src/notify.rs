use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
}

impl NoticeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
        }
    }
}

/// User-facing flash message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }
}

pub trait Notifier {
    fn push(&self, notice: Notice);
}

/// Collects notices for the lifetime of one request.
#[derive(Debug, Default)]
pub struct NoticeQueue {
    notices: RefCell<Vec<Notice>>,
}

impl NoticeQueue {
    pub fn drain(&self) -> Vec<Notice> {
        self.notices.borrow_mut().drain(..).collect()
    }
}

impl Notifier for NoticeQueue {
    fn push(&self, notice: Notice) {
        self.notices.borrow_mut().push(notice);
    }
}

/// Operational mail about page changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mail {
    pub subject: String,
    pub body: String,
}

pub trait Mailer {
    fn send(&self, mail: &Mail) -> Result<()>;
}

/// Writes each message as a plain-text file into an outbox directory for a
/// separate delivery agent to pick up.
#[derive(Debug, Clone)]
pub struct SpoolMailer {
    outbox_dir: PathBuf,
    from: String,
}

impl SpoolMailer {
    pub fn new(outbox_dir: &Path, from: impl Into<String>) -> Self {
        Self {
            outbox_dir: outbox_dir.to_path_buf(),
            from: from.into(),
        }
    }

    fn next_path(&self) -> Result<PathBuf> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before UNIX_EPOCH")?
            .as_nanos();
        let mut candidate = self.outbox_dir.join(format!("{nanos}.eml"));
        let mut attempt = 1u32;
        while candidate.exists() {
            candidate = self.outbox_dir.join(format!("{nanos}-{attempt}.eml"));
            attempt += 1;
        }
        Ok(candidate)
    }
}

impl Mailer for SpoolMailer {
    fn send(&self, mail: &Mail) -> Result<()> {
        fs::create_dir_all(&self.outbox_dir)
            .with_context(|| format!("failed to create outbox {}", self.outbox_dir.display()))?;
        let path = self.next_path()?;
        let message = format!(
            "From: {}\nSubject: {}\n\n{}",
            self.from,
            sanitize_header(&mail.subject),
            mail.body
        );
        fs::write(&path, message)
            .with_context(|| format!("failed to write mail {}", path.display()))?;
        info!(subject = %mail.subject, path = %path.display(), "spooled notification mail");
        Ok(())
    }
}

fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn queue_drains_in_push_order() {
        let queue = NoticeQueue::default();
        queue.push(Notice::success("saved"));
        queue.push(Notice::warning("locked"));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].level, NoticeLevel::Success);
        assert_eq!(drained[1].text, "locked");
        assert_eq!(drained[1].level.as_str(), "warning");
        assert_eq!(
            serde_json::to_value(&drained[0]).expect("json"),
            serde_json::json!({"level": "success", "text": "saved"})
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn spool_mailer_writes_one_file_per_message() {
        let temp = tempdir().expect("tempdir");
        let outbox = temp.path().join("outbox");
        let mailer = SpoolMailer::new(&outbox, "wiki@localhost");

        mailer
            .send(&Mail {
                subject: "[Wiki] deleted: Foo\nBcc: x".to_string(),
                body: "Deleted page: Foo\n".to_string(),
            })
            .expect("send");
        mailer
            .send(&Mail {
                subject: "second".to_string(),
                body: String::new(),
            })
            .expect("send");

        let mut files: Vec<_> = fs::read_dir(&outbox)
            .expect("read outbox")
            .map(|entry| entry.expect("entry").path())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        let contents: Vec<String> = files
            .iter()
            .map(|path| fs::read_to_string(path).expect("read mail"))
            .collect();
        let first = contents
            .iter()
            .find(|content| content.contains("Deleted page: Foo"))
            .expect("first mail");
        assert!(first.contains("Subject: [Wiki] deleted: Foo Bcc: x\n"));
        assert!(first.starts_with("From: wiki@localhost\n"));
    }
}
