use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::Logger;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable namespace of key -> JSON value pairs, one file per store name.
///
/// Every operation re-reads the backing file first: the file is the source
/// of truth and external writers are tolerated. A missing file reads as an
/// empty namespace; a malformed file is logged and reads as empty.
pub trait NamespaceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, InfraError>;
    fn set(&self, key: &str, value: Value) -> Result<(), InfraError>;
    fn delete(&self, key: &str) -> Result<bool, InfraError>;
    fn has(&self, key: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    logger: Arc<Logger>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>, logger: Arc<Logger>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            logger,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_namespace(&self) -> Result<Map<String, Value>, InfraError> {
        read_namespace_file(&self.path, &self.logger)
    }

    fn write_namespace(&self, namespace: &Map<String, Value>) -> Result<(), InfraError> {
        write_namespace_file(&self.path, namespace)
    }
}

impl NamespaceStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, InfraError> {
        Ok(self.read_namespace()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), InfraError> {
        let mut namespace = self.read_namespace()?;
        namespace.insert(key.to_string(), value);
        self.write_namespace(&namespace)
    }

    fn delete(&self, key: &str) -> Result<bool, InfraError> {
        let mut namespace = self.read_namespace()?;
        if namespace.remove(key).is_none() {
            return Ok(false);
        }
        self.write_namespace(&namespace)?;
        Ok(true)
    }

    fn has(&self, key: &str) -> Result<bool, InfraError> {
        Ok(self.read_namespace()?.contains_key(key))
    }
}

pub(crate) fn read_namespace_file(
    path: &Path,
    logger: &Logger,
) -> Result<Map<String, Value>, InfraError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Map::new());
        }
        Err(error) => return Err(InfraError::Io(error)),
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(namespace)) => Ok(namespace),
        Ok(_) => {
            logger.warn(
                "store",
                &format!(
                    "store file {} is not a JSON object; resetting to empty",
                    path.display()
                ),
            );
            Ok(Map::new())
        }
        Err(error) => {
            logger.warn(
                "store",
                &format!(
                    "store file {} is malformed ({error}); resetting to empty",
                    path.display()
                ),
            );
            Ok(Map::new())
        }
    }
}

pub(crate) fn write_namespace_file(
    path: &Path,
    namespace: &Map<String, Value>,
) -> Result<(), InfraError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let formatted = serde_json::to_string_pretty(&Value::Object(namespace.clone()))?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}
