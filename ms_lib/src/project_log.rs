//! The per-project log operators read next to the project's data.

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ProjectLog {
    project: String,
    path: PathBuf,
}

impl ProjectLog {
    pub fn new(project: &str, project_dir: &Path, log_name: &str) -> Self {
        ProjectLog {
            project: project.to_string(),
            path: project_dir.join(log_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line, creating the project directory if needed.
    pub fn append(&self, message: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;
        }
        let line = format!(
            "{}\t{message}\n",
            Local::now().format("[%d/%m/%Y  %H:%M:%S]")
        );
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()))
            .with_context(|| self.path.display().to_string())
    }

    /// Log `message` to the process log and the project log. A project log that
    /// cannot be written is reported and otherwise ignored.
    pub fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("[{}] {message}", self.project);
        if let Err(err) = self.append(message) {
            warn!("could not write project log: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_creates_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = ProjectLog::new("P1", &dir.path().join("P1"), "msauto.log");
        log.append("Created root for project P1")?;
        log.record("Started converting S1");
        let text = fs::read_to_string(log.path())?;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("]\tCreated root for project P1"));
        assert!(lines[1].ends_with("\tStarted converting S1"));
        Ok(())
    }
}
