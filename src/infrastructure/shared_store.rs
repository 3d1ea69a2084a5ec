use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::Logger;
use crate::infrastructure::store::{read_namespace_file, NamespaceStore};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Lock acquisition retry: short fixed delay, bounded attempt count.
#[derive(Debug, Clone)]
pub struct LockRetry {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 50,
        }
    }
}

/// Hardened namespace store for files shared with a second process.
///
/// Mutations hold an advisory lock file containing the owner PID; a lock
/// whose owner is no longer alive (or whose content is unreadable) is
/// treated as stale and removed. Commits go through a temp file renamed
/// into place so readers never observe a partial write.
#[derive(Debug, Clone)]
pub struct LockedJsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    logger: Arc<Logger>,
    retry: LockRetry,
}

impl LockedJsonFileStore {
    pub fn new(path: impl AsRef<Path>, logger: Arc<Logger>) -> Self {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            logger,
            retry: LockRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: LockRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(&self) -> Result<LockGuard, InfraError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;

        while attempt < max_attempts {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    return Ok(LockGuard {
                        path: self.lock_path.clone(),
                    });
                }
                Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.remove_if_stale()? {
                        continue;
                    }
                    attempt += 1;
                    std::thread::sleep(Duration::from_millis(self.retry.delay_ms));
                }
                Err(error) => return Err(InfraError::Io(error)),
            }
        }

        Err(InfraError::LockBusy(self.path.display().to_string()))
    }

    /// Returns true when a stale lock was removed and acquisition should be
    /// retried immediately.
    fn remove_if_stale(&self) -> Result<bool, InfraError> {
        let owner = match fs::read_to_string(&self.lock_path) {
            Ok(raw) => raw.trim().parse::<u32>().ok(),
            // Lock vanished between the failed create and this read.
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(error) => return Err(InfraError::Io(error)),
        };

        let stale = match owner {
            Some(pid) => !process_alive(pid),
            None => true,
        };
        if !stale {
            return Ok(false);
        }

        self.logger.warn(
            "store",
            &format!(
                "removing stale lock {} (owner {})",
                self.lock_path.display(),
                owner.map_or_else(|| "unreadable".to_string(), |pid| pid.to_string())
            ),
        );
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(error) => Err(InfraError::Io(error)),
        }
    }

    fn read_namespace(&self) -> Result<Map<String, Value>, InfraError> {
        read_namespace_file(&self.path, &self.logger)
    }

    fn commit_namespace(&self, namespace: &Map<String, Value>) -> Result<(), InfraError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension(format!("{}.tmp", std::process::id()));
        let formatted = serde_json::to_string_pretty(&Value::Object(namespace.clone()))?;
        fs::write(&temp_path, format!("{formatted}\n"))?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl NamespaceStore for LockedJsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, InfraError> {
        Ok(self.read_namespace()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), InfraError> {
        let _lock = self.acquire_lock()?;
        let mut namespace = self.read_namespace()?;
        namespace.insert(key.to_string(), value);
        self.commit_namespace(&namespace)
    }

    fn delete(&self, key: &str) -> Result<bool, InfraError> {
        let _lock = self.acquire_lock()?;
        let mut namespace = self.read_namespace()?;
        if namespace.remove(key).is_none() {
            return Ok(false);
        }
        self.commit_namespace(&namespace)?;
        Ok(true)
    }

    fn has(&self, key: &str) -> Result<bool, InfraError> {
        Ok(self.read_namespace()?.contains_key(key))
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let target = sysinfo::Pid::from_u32(pid);
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[target]), true);
    system.process(target).is_some()
}
