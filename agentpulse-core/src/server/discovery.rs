//! Discovery record for a running server.
//!
//! Written to `$XDG_CONFIG_HOME/agentpulse/server.json` after a successful
//! bind so local tools can find the port without configuration. The file is
//! removed when the [`DiscoveryFile`] guard drops.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRecord {
    pub port: u16,
    pub host: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl DiscoveryRecord {
    /// Record for this process listening on `host:port`.
    pub fn current(host: &str, port: u16) -> Self {
        Self {
            port,
            host: host.to_string(),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    /// Read a record from disk.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Holds the discovery file for the server's lifetime.
#[derive(Debug)]
pub struct DiscoveryFile {
    path: PathBuf,
    record: DiscoveryRecord,
    removed: bool,
}

impl DiscoveryFile {
    /// Write `record` to `path`, creating parent directories.
    ///
    /// The record is written to a sibling temp file first and renamed into
    /// place so readers never see a partial document.
    pub fn write(path: PathBuf, record: DiscoveryRecord) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        fs::rename(&tmp, &path)?;

        tracing::info!(path = %path.display(), port = record.port, "Discovery record written");
        Ok(Self {
            path,
            record,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file if it still describes this process.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        // Another instance may have taken over the record since
        match DiscoveryRecord::read(&self.path) {
            Ok(on_disk) if on_disk.pid != self.record.pid || on_disk.port != self.record.port => {
                tracing::debug!(path = %self.path.display(), "Discovery record owned elsewhere, leaving it");
            }
            _ => {
                if let Err(e) = fs::remove_file(&self.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove discovery record");
                    }
                } else {
                    tracing::info!(path = %self.path.display(), "Discovery record removed");
                }
            }
        }
    }
}

impl Drop for DiscoveryFile {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/server.json");

        let record = DiscoveryRecord::current("127.0.0.1", 7881);
        let guard = DiscoveryFile::write(path.clone(), record.clone()).unwrap();

        let on_disk = DiscoveryRecord::read(&path).unwrap();
        assert_eq!(on_disk, record);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["port"], 7881);
        assert_eq!(json["host"], "127.0.0.1");
        assert!(json["startedAt"].is_string());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_foreign_record_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");

        let guard = DiscoveryFile::write(path.clone(), DiscoveryRecord::current("127.0.0.1", 7879))
            .unwrap();
        let mut other = DiscoveryRecord::current("127.0.0.1", 7880);
        other.pid = other.pid.wrapping_add(1);
        fs::write(&path, serde_json::to_vec(&other).unwrap()).unwrap();

        drop(guard);
        assert!(path.exists());
    }
}
