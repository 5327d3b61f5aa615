//! Append-only file: the disk tier behind the persistent-memory tier.
//!
//! Drained log generations and flushed victims end up here as
//! length-prefixed MessagePack records.

use crate::core::{PmemError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ============================================================================
// Logged Commands
// ============================================================================

/// A write command as stored in the log buffers and the AOF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggedCommand {
    Set { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

impl LoggedCommand {
    pub fn key(&self) -> &[u8] {
        match self {
            LoggedCommand::Set { key, .. } | LoggedCommand::Del { key } => key,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Every commit / append reaches stable storage before returning
    #[default]
    Sync,
    /// Writes are flushed to the OS; stable storage on checkpoint and close
    Async,
    /// Nothing touches disk
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(DurabilityMode::Sync),
            "async" => Ok(DurabilityMode::Async),
            "none" => Ok(DurabilityMode::None),
            other => Err(format!("unknown durability mode '{}'", other)),
        }
    }
}

// ============================================================================
// AOF Manager
// ============================================================================

pub struct AppendOnlyFile {
    path: Option<PathBuf>,
    file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    records_since_rewrite: usize,
}

impl AppendOnlyFile {
    pub fn open<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PmemError::Io(format!("Failed to create AOF directory: {}", e)))?;
        }

        let file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| PmemError::Io(format!("Failed to open AOF: {}", e)))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            path: Some(path),
            file,
            durability_mode,
            records_since_rewrite: 0,
        })
    }

    /// An AOF that accepts and discards everything
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: None,
            durability_mode: DurabilityMode::None,
            records_since_rewrite: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records_since_rewrite(&self) -> usize {
        self.records_since_rewrite
    }

    pub fn append(&mut self, command: &LoggedCommand) -> Result<()> {
        let encoded = command.encode()?;
        self.append_encoded(&encoded)
    }

    /// Append a record that is already MessagePack-encoded
    pub fn append_encoded(&mut self, encoded: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let len = encoded.len() as u32;
        file.write_all(&len.to_le_bytes())
            .map_err(|e| PmemError::Io(format!("Failed to write AOF: {}", e)))?;
        file.write_all(encoded)
            .map_err(|e| PmemError::Io(format!("Failed to write AOF: {}", e)))?;
        self.records_since_rewrite += 1;
        Ok(())
    }

    /// Push buffered records out; fsync them in `Sync` mode
    pub fn sync(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.flush()
            .map_err(|e| PmemError::Io(format!("Failed to flush AOF: {}", e)))?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut()
                .sync_all()
                .map_err(|e| PmemError::Io(format!("Failed to sync AOF: {}", e)))?;
        }
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<LoggedCommand>> {
        let Some(path) = self.path.as_ref() else {
            return Ok(Vec::new());
        };
        if self.durability_mode == DurabilityMode::None || !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)
            .map_err(|e| PmemError::Io(format!("Failed to open AOF for reading: {}", e)))?;
        let mut reader = BufReader::new(file);
        let mut commands = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(PmemError::Io(format!(
                        "Failed to read AOF record length: {}",
                        e
                    )));
                }
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                // A torn final record is what a crash mid-append leaves behind.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::warn!("Ignoring torn record at the end of the AOF");
                    break;
                }
                Err(e) => {
                    return Err(PmemError::Io(format!("Failed to read AOF record: {}", e)));
                }
            }
            commands.push(LoggedCommand::decode(&data)?);
        }
        Ok(commands)
    }

    /// Replace the file with `commands`, atomically
    pub fn rewrite<'a, I>(&mut self, commands: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a LoggedCommand>,
    {
        let Some(path) = self.path.clone() else {
            return Ok(0);
        };
        if self.durability_mode == DurabilityMode::None {
            return Ok(0);
        }
        self.sync()?;

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(&parent)
            .map_err(|e| PmemError::Io(format!("Failed to create temp AOF: {}", e)))?;
        let mut writer = BufWriter::new(temp);
        let mut written = 0;
        for command in commands {
            let encoded = command.encode()?;
            writer
                .write_all(&(encoded.len() as u32).to_le_bytes())
                .and_then(|_| writer.write_all(&encoded))
                .map_err(|e| PmemError::Io(format!("Failed to write temp AOF: {}", e)))?;
            written += 1;
        }
        let temp = writer
            .into_inner()
            .map_err(|e| PmemError::Io(format!("Failed to flush temp AOF: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| PmemError::Io(format!("Failed to sync temp AOF: {}", e)))?;

        self.file = None;
        temp.persist(&path)
            .map_err(|e| PmemError::Io(format!("Failed to install rewritten AOF: {}", e)))?;
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| PmemError::Io(format!("Failed to reopen AOF: {}", e)))?;
        self.file = Some(BufWriter::new(file));
        self.records_since_rewrite = 0;
        Ok(written)
    }
}
