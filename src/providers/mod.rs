//! Sample fetch/process providers behind the handler contract.
//!
//! Shared here: scoped temp acquisition. Intermediate scratch (downloaded
//! archives) cleans itself up on drop; harvest output has to outlive the
//! handler because the next stage consumes it from disk, so those paths are
//! deliberately kept and their lifecycle belongs to whoever stores or
//! discards the harvest.

pub mod npm;
pub mod scancode;

use crate::error::{Error, Result};
use std::path::PathBuf;
use tempfile::{Builder, NamedTempFile};

/// Scratch file removed when the handle drops.
pub(crate) fn scratch_file(prefix: &str) -> Result<NamedTempFile> {
    Builder::new()
        .prefix(prefix)
        .tempfile()
        .map_err(Error::from)
}

/// Directory for harvest output, kept past the handler's lifetime.
pub(crate) fn harvest_dir(prefix: &str) -> Result<PathBuf> {
    let dir = Builder::new().prefix(prefix).tempdir()?;
    Ok(dir.keep())
}

/// File for harvest output, kept past the handler's lifetime.
pub(crate) fn harvest_file(prefix: &str, suffix: &str) -> Result<PathBuf> {
    let file = Builder::new().prefix(prefix).suffix(suffix).tempfile()?;
    let (_, path) = file
        .keep()
        .map_err(|e| Error::Other(format!("cannot keep harvest file: {e}")))?;
    Ok(path)
}
