//! On-disk image of a persistent pool

use super::PmemObject;
use crate::core::{PmemError, Result};
use crate::storage::layout::Root;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const POOL_FORMAT_VERSION: u32 = 1;

/// Borrowed view written at commit time
#[derive(Serialize)]
pub(crate) struct PoolImageRef<'a> {
    pub version: u32,
    pub pool_id: u64,
    pub root: &'a Root,
    pub slots: &'a [Option<PmemObject>],
    pub free_slots: &'a [u64],
}

#[derive(Debug, Deserialize)]
pub(crate) struct PoolImage {
    pub version: u32,
    pub pool_id: u64,
    pub root: Root,
    pub slots: Vec<Option<PmemObject>>,
    pub free_slots: Vec<u64>,
}

pub(crate) struct ImageFile {
    path: PathBuf,
}

impl ImageFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the image atomically: write a sibling temp file, sync it,
    /// then rename it over the old image.
    pub fn save(&self, image: &PoolImageRef<'_>) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| PmemError::Io(format!("Failed to create pool directory: {}", e)))?;
        let serialized = rmp_serde::to_vec(image)?;
        let mut temp = NamedTempFile::new_in(&parent)
            .map_err(|e| PmemError::Io(format!("Failed to create temp image: {}", e)))?;
        temp.write_all(&serialized)
            .map_err(|e| PmemError::Io(format!("Failed to write pool image: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| PmemError::Io(format!("Failed to sync pool image: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| PmemError::Io(format!("Failed to install pool image: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<PoolImage>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.path)
            .map_err(|e| PmemError::Io(format!("Failed to open pool image: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| PmemError::Io(format!("Failed to read pool image: {}", e)))?;
        let image: PoolImage = rmp_serde::from_slice(&data)?;
        if image.version != POOL_FORMAT_VERSION {
            return Err(PmemError::Codec(format!(
                "Unsupported pool format version {} (expected {})",
                image.version, POOL_FORMAT_VERSION
            )));
        }
        Ok(Some(image))
    }
}
