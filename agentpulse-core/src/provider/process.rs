//! OS process enumeration and open-file inspection.
//!
//! Everything that touches the live process table sits behind
//! [`ProcessTable`] so providers can be driven from a static table in tests.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
#[cfg(not(target_os = "linux"))]
use std::process::Command;
use sysinfo::{ProcessesToUpdate, System};

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Executable name as reported by the OS
    pub name: String,
}

/// Source of process and open-file information.
pub trait ProcessTable: Send + Sync {
    /// All processes currently visible to this user.
    fn processes(&self) -> io::Result<Vec<ProcessEntry>>;

    /// Paths of regular files the process currently holds open.
    fn open_files(&self, pid: u32) -> io::Result<Vec<PathBuf>>;
}

// ============================================
// System implementation
// ============================================

/// Live process table backed by `sysinfo`.
///
/// Open files come from `/proc/<pid>/fd` on Linux and `lsof` elsewhere.
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SystemProcessTable {
    fn processes(&self) -> io::Result<Vec<ProcessEntry>> {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        Ok(sys
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
            })
            .collect())
    }

    #[cfg(target_os = "linux")]
    fn open_files(&self, pid: u32) -> io::Result<Vec<PathBuf>> {
        let fd_dir = PathBuf::from(format!("/proc/{}/fd", pid));
        let mut files = Vec::new();
        for entry in std::fs::read_dir(fd_dir)? {
            let Ok(entry) = entry else { continue };
            // Sockets and pipes resolve to non-path targets like "socket:[123]"
            if let Ok(target) = std::fs::read_link(entry.path()) {
                if target.is_absolute() {
                    files.push(target);
                }
            }
        }
        Ok(files)
    }

    #[cfg(not(target_os = "linux"))]
    fn open_files(&self, pid: u32) -> io::Result<Vec<PathBuf>> {
        let output = Command::new("lsof")
            .args(["-n", "-P", "-Fn", "-p", &pid.to_string()])
            .output()?;

        // lsof exits 1 when the pid has vanished; treat as "nothing open"
        if !output.status.success() && output.stdout.is_empty() {
            return Ok(Vec::new());
        }

        Ok(parse_lsof_names(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract absolute paths from `lsof -Fn` field output (`n/path` lines).
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn parse_lsof_names(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix('n'))
        .filter(|name| name.starts_with('/'))
        .map(PathBuf::from)
        .collect()
}

// ============================================
// Static implementation
// ============================================

/// Fixed process table, for tests and offline evaluation.
#[derive(Debug, Clone, Default)]
pub struct StaticProcessTable {
    processes: Vec<ProcessEntry>,
    open_files: HashMap<u32, Vec<PathBuf>>,
}

impl StaticProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a process holding the given files open.
    pub fn with_process(mut self, pid: u32, name: &str, files: Vec<PathBuf>) -> Self {
        self.processes.push(ProcessEntry {
            pid,
            name: name.to_string(),
        });
        self.open_files.insert(pid, files);
        self
    }
}

impl ProcessTable for StaticProcessTable {
    fn processes(&self) -> io::Result<Vec<ProcessEntry>> {
        Ok(self.processes.clone())
    }

    fn open_files(&self, pid: u32) -> io::Result<Vec<PathBuf>> {
        self.open_files
            .get(&pid)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such pid {}", pid)))
    }
}
