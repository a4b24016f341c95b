//! Shared fixtures for integration tests.
//!
//! Builds configs rooted in a temp directory, populated session
//! directories, dead PIDs, and in-memory loggers so individual test
//! modules can focus on behaviour rather than boilerplate.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use session_warden::audit::{MemoryAuditLog, SharedLogger};
use session_warden::config::GlobalConfig;

/// Config rooted at `base_dir` with fast lock retries.
pub fn test_config(base_dir: &Path) -> GlobalConfig {
    let toml = format!(
        r#"
base_dir = '{base}'

[identity]
repo_dir = '{base}'
use_git_command = false

[lock]
stale_after_seconds = 60
retries = 1
retry_delay_ms = 10

[validation]
stale_artifact_age_seconds = 3600
"#,
        base = base_dir.display().to_string().replace('\\', "\\\\"),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Logger whose entries the test can inspect.
pub fn memory_logger() -> (SharedLogger, Arc<MemoryAuditLog>) {
    let log = Arc::new(MemoryAuditLog::new());
    let logger: SharedLogger = log.clone();
    (logger, log)
}

/// Create a session directory satisfying the default validation layout,
/// with `extra_files` additional files in local storage.
pub fn populate_session(dir: &Path, extra_files: usize) {
    let default = dir.join("session").join("Default");
    let local_storage = default.join("Local Storage");
    let indexed_db = default.join("IndexedDB");
    fs::create_dir_all(&local_storage).expect("local storage");
    fs::create_dir_all(&indexed_db).expect("indexeddb");
    fs::write(local_storage.join("000003.log"), "token=abc").expect("ls file");
    fs::write(indexed_db.join("db.sqlite"), "db").expect("idb file");
    fs::write(dir.join("session").join("Local State"), "{}").expect("local state");
    fs::write(default.join("Preferences"), "{}").expect("preferences");
    fs::write(default.join("Cookies"), "cookies").expect("cookies");
    for i in 0..extra_files {
        fs::write(local_storage.join(format!("extra-{i}.ldb")), "x".repeat(64)).expect("extra");
    }
}

/// Create a directory that passes the quick check only.
pub fn populate_skeleton(dir: &Path) {
    let default = dir.join("session").join("Default");
    fs::create_dir_all(&default).expect("default");
    fs::write(default.join("Preferences"), "{}").expect("preferences");
}

/// Set the modification time of `path` to `age` ago.
pub fn age_file(path: &Path, age: Duration) {
    let when = SystemTime::now() - age;
    File::options()
        .write(true)
        .open(path)
        .expect("open for mtime")
        .set_modified(when)
        .expect("set mtime");
}

/// Set the modification time of every file below `dir` to `age` ago.
pub fn age_tree(dir: &Path, age: Duration) {
    for entry in fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("entry").path();
        if path.is_dir() {
            age_tree(&path, age);
        } else {
            age_file(&path, age);
        }
    }
}

/// A PID that belonged to a process which has already been reaped.
#[cfg(unix)]
pub fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().expect("spawn true");
    let pid = child.id();
    child.wait().expect("wait");
    pid
}

/// A live process owned by the test, killed on drop.
pub struct LiveOwner(std::process::Child);

impl LiveOwner {
    pub fn spawn() -> Self {
        Self(
            std::process::Command::new("sleep")
                .arg("30")
                .spawn()
                .expect("spawn sleep"),
        )
    }

    pub fn pid(&self) -> u32 {
        self.0.id()
    }
}

impl Drop for LiveOwner {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}
