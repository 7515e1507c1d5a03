//! Durable local record written when no channel delivered an escalation.

use guard_core::NotificationEvent;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Append-only PANIC log on local disk.
#[derive(Debug, Clone)]
pub struct PanicLog {
    path: PathBuf,
}

impl PanicLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append exactly one line for `event`, creating the file if needed.
    pub async fn append(&self, event: &NotificationEvent) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let line = format!("{}\n", event.panic_line());
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_append_creates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = PanicLog::new(dir.path().join("PANIC.log"));

        assert_ok!(log.append(&NotificationEvent::new("risk", "first")).await);
        assert_ok!(log.append(&NotificationEvent::new("kill_switch", "second")).await);

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("RISK: first"));
        assert!(lines[1].ends_with("KILL_SWITCH: second"));
    }
}
