//! Calibration cache storage

use crate::params::CalibrationParameters;
use crate::CalibrationError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Persistence for computed calibration parameters
pub trait CalibrationStore: Send + Sync {
    /// Cached parameters, `None` when nothing usable is stored
    fn load(&self) -> Result<Option<CalibrationParameters>, CalibrationError>;

    /// Replace the cached parameters
    fn save(&self, params: &CalibrationParameters) -> Result<(), CalibrationError>;
}

/// postcard-encoded cache file
pub struct FileCalibrationStore {
    path: PathBuf,
}

impl FileCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationParameters>, CalibrationError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No calibration cache at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match postcard::from_bytes::<CalibrationParameters>(&bytes) {
            Ok(params) => Ok(Some(params)),
            Err(e) => {
                // A stale or truncated cache is recomputed, not fatal
                warn!("Ignoring unreadable calibration cache {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn save(&self, params: &CalibrationParameters) -> Result<(), CalibrationError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = postcard::to_allocvec(params)?;
        std::fs::write(&self.path, bytes)?;
        info!("Calibration cached to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
pub struct InMemoryCalibrationStore {
    slot: Mutex<Option<CalibrationParameters>>,
    writes: Mutex<usize>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            writes: Mutex::new(0),
        }
    }

    /// Number of successful saves
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }
}

impl Default for InMemoryCalibrationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationParameters>, CalibrationError> {
        let slot = self
            .slot
            .lock()
            .map_err(|e| CalibrationError::Cache(format!("Lock error: {}", e)))?;
        Ok(slot.clone())
    }

    fn save(&self, params: &CalibrationParameters) -> Result<(), CalibrationError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| CalibrationError::Cache(format!("Lock error: {}", e)))?;
        let mut writes = self
            .writes
            .lock()
            .map_err(|e| CalibrationError::Cache(format!("Lock error: {}", e)))?;

        *slot = Some(params.clone());
        *writes += 1;
        Ok(())
    }
}
