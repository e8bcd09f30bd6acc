//! Session log files and per-session statistics.
//!
//! The server writes one timestamped global log per session plus one file
//! per channel, and keeps running counts of kernels by type and sessions by
//! client. Statistics are flushed as a table when the log rotates and on
//! shutdown. File writes are best-effort: if the log directory cannot be
//! used, lines fall through to the console via the `log` crate instead of
//! failing the server.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Rotating session logger shared by the reactor and all service tasks.
pub struct SessionLogger {
    inner: Mutex<LoggerInner>,
    session_counter: AtomicU64,
    kernel_counter: AtomicU64,
}

struct LoggerInner {
    dir: PathBuf,
    stamp: String,
    global: Option<File>,
    channel_files: HashMap<String, Option<File>>,
    kernel_stats: HashMap<String, u64>,
    connection_stats: HashMap<String, u64>,
    total_sessions: u64,
}

impl SessionLogger {
    /// Open the logger rooted at `dir`, creating the directory and the
    /// first timestamped log file.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("cannot create log directory {}: {e}", dir.display());
        }
        let mut inner = LoggerInner {
            dir,
            stamp: String::new(),
            global: None,
            channel_files: HashMap::new(),
            kernel_stats: HashMap::new(),
            connection_stats: HashMap::new(),
            total_sessions: 0,
        };
        inner.open_new_file();
        Self {
            inner: Mutex::new(inner),
            session_counter: AtomicU64::new(0),
            kernel_counter: AtomicU64::new(0),
        }
    }

    /// Append one line to the global session log.
    pub fn write(&self, message: &str) {
        let mut inner = self.inner.lock();
        inner.write_global(message);
    }

    /// Append one line to the global log and to the channel's own file.
    pub fn write_channel(&self, message: &str, channel_key: &str) {
        let mut inner = self.inner.lock();
        inner.write_global(message);
        inner.write_channel(message, channel_key);
    }

    /// Count one kernel of the given type toward the session statistics.
    pub fn record_kernel(&self, kernel_type: &str) {
        let mut inner = self.inner.lock();
        *inner.kernel_stats.entry(kernel_type.to_string()).or_insert(0) += 1;
    }

    /// Count one session for the given client key.
    pub fn record_connection(&self, client_key: &str) {
        let mut inner = self.inner.lock();
        *inner
            .connection_stats
            .entry(client_key.to_string())
            .or_insert(0) += 1;
        inner.total_sessions += 1;
    }

    /// Next session id (monotone across the server's lifetime).
    pub fn next_session_id(&self) -> u64 {
        self.session_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next global kernel id.
    pub fn next_kernel_id(&self) -> u64 {
        self.kernel_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Close the current files, flush statistics, and start a new log file.
    pub fn rotate(&self) {
        let mut inner = self.inner.lock();
        inner.flush_stats();
        inner.close_channel_files();
        inner.open_new_file();
    }

    /// Flush statistics and close all files.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.flush_stats();
        inner.close_channel_files();
        inner.global = None;
    }
}

impl LoggerInner {
    fn open_new_file(&mut self) {
        self.stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let path = self.dir.join(format!("{}.log", self.stamp));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                log::info!("session log file: {}", path.display());
                self.global = Some(file);
            }
            Err(e) => {
                log::warn!("cannot create {}: {e}", path.display());
                self.global = None;
            }
        }
    }

    fn write_global(&mut self, message: &str) {
        match self.global.as_mut() {
            Some(file) => {
                let _ = writeln!(file, "{message}");
                let _ = file.flush();
            }
            None => log::info!("{message}"),
        }
    }

    fn write_channel(&mut self, message: &str, channel_key: &str) {
        let safe_key = sanitize_key(channel_key);
        if !self.channel_files.contains_key(&safe_key) {
            let path = self.dir.join(format!("{}_{}.log", self.stamp, safe_key));
            let file = OpenOptions::new().create(true).append(true).open(&path);
            if let Err(ref e) = file {
                log::warn!("cannot create {}: {e}", path.display());
            }
            self.channel_files.insert(safe_key.clone(), file.ok());
        }
        if let Some(Some(file)) = self.channel_files.get_mut(&safe_key) {
            let _ = writeln!(file, "{message}");
            let _ = file.flush();
        }
    }

    fn close_channel_files(&mut self) {
        self.channel_files.clear();
    }

    fn flush_stats(&mut self) {
        let Some(file) = self.global.as_mut() else {
            return;
        };

        let _ = writeln!(file, "\n-------------------------------------------------------");
        let _ = writeln!(file, "      Session Statistics");
        let _ = writeln!(file, "-------------------------------------------------------");
        let _ = writeln!(file, "Total Sessions: {}", self.total_sessions);

        if !self.connection_stats.is_empty() {
            let _ = writeln!(file, "\nSessions by Client:");
            let mut clients: Vec<_> = self.connection_stats.iter().collect();
            clients.sort_by(|a, b| a.0.cmp(b.0));
            for (client, count) in clients {
                let _ = writeln!(file, "  {client}: {count} session(s)");
            }
        }

        let _ = writeln!(file, "\n-------------------------------------------------------");
        let _ = writeln!(file, "      Kernel Statistics");
        let _ = writeln!(file, "-------------------------------------------------------");

        if self.kernel_stats.is_empty() {
            let _ = writeln!(file, "No kernels recorded in this session.");
        } else {
            let mut sorted: Vec<_> = self.kernel_stats.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            let _ = writeln!(file, "{:<45} | Count", "Kernel Name");
            let _ = writeln!(file, "----------------------------------------------|--------");
            let mut total = 0u64;
            for (kernel, count) in sorted {
                let _ = writeln!(file, "{kernel:<45} | {count}");
                total += count;
            }
            let _ = writeln!(file, "----------------------------------------------|--------");
            let _ = writeln!(file, "{:<45} | {total}", "TOTAL");
        }
        let _ = writeln!(file, "-------------------------------------------------------\n");
        let _ = file.flush();

        self.kernel_stats.clear();
        self.connection_stats.clear();
    }
}

/// Make a channel key usable as a file-name fragment.
fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ' ' { '_' } else { c })
        .collect();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_key("/ks_pytorch_1"), "_ks_pytorch_1");
        assert_eq!(sanitize_key("a b\\c"), "a_b_c");
        assert_eq!(sanitize_key(""), "unknown");
    }

    #[test]
    fn writes_land_in_global_log() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(dir.path());
        logger.write("hello session");
        logger.shutdown();

        let mut found = false;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let content = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            if content.contains("hello session") {
                found = true;
            }
        }
        assert!(found, "global log line missing");
    }

    #[test]
    fn channel_lines_get_their_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(dir.path());
        logger.write_channel("per-channel line", "/ks_test_chan");
        logger.shutdown();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(
            names.iter().any(|n| n.contains("_ks_test_chan")),
            "channel log file missing from {names:?}"
        );
    }

    #[test]
    fn shutdown_flushes_statistics_table() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(dir.path());
        logger.record_connection("pytorch:u1");
        logger.record_kernel("GemmA");
        logger.record_kernel("GemmA");
        logger.record_kernel("Conv2d");
        logger.shutdown();

        let mut stats = String::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            stats.push_str(&std::fs::read_to_string(entry.unwrap().path()).unwrap());
        }
        assert!(stats.contains("Kernel Statistics"));
        assert!(stats.contains("GemmA"));
        assert!(stats.contains("pytorch:u1: 1 session(s)"));
        assert!(stats.contains("Total Sessions: 1"));
    }

    #[test]
    fn counters_are_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(dir.path());
        assert_eq!(logger.next_session_id(), 1);
        assert_eq!(logger.next_session_id(), 2);
        assert_eq!(logger.next_kernel_id(), 1);
        assert_eq!(logger.next_kernel_id(), 2);
        logger.shutdown();
    }

    #[test]
    fn rotate_starts_a_fresh_file_set() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(dir.path());
        logger.write("before rotate");
        logger.rotate();
        logger.write("after rotate");
        logger.shutdown();

        let count = std::fs::read_dir(dir.path()).unwrap().count();
        // Rotation within the same second reuses the stamp; either way the
        // content of both phases must have been flushed somewhere.
        assert!(count >= 1);
        let mut all = String::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            all.push_str(&std::fs::read_to_string(entry.unwrap().path()).unwrap());
        }
        assert!(all.contains("before rotate"));
        assert!(all.contains("after rotate"));
    }
}
