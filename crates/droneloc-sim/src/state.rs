//! Shared drone state file read by simulated node samplers.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use droneloc_core::geometry::Vec3;
use droneloc_core::types::DroneState;

use crate::error::{SimError, SimResult};

/// Write the drone position to `path`.
///
/// The state is written to a sibling temporary file and renamed into
/// place, so readers never observe a partial document.
///
/// # Errors
///
/// Returns [`SimError::StateFile`] if either step fails.
pub fn write_drone_state(path: &Path, position: Vec3, timestamp: DateTime<Utc>) -> SimResult<()> {
    let state = DroneState { position, timestamp };
    let json = serde_json::to_vec(&state).map_err(|e| SimError::StateFile {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| SimError::StateFile {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
