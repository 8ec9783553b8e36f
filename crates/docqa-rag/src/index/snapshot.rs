//! On-disk index snapshots
//!
//! A snapshot is a directory holding `manifest.json` and `entries.bin`
//! (bincode). The manifest records the format version, the embedding model
//! and a SHA-256 checksum of the entries file. Snapshots are trusted local
//! artifacts: the checksum detects corruption, it does not authenticate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::store::{IndexEntry, VectorIndex};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ENTRIES_FILE: &str = "entries.bin";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Snapshot manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub format_version: u32,
    pub snapshot_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dimensions: usize,
    pub entry_count: usize,
    /// Hex SHA-256 of `entries.bin`
    pub checksum: String,
}

impl SnapshotManifest {
    /// Read the manifest of the snapshot at `path`
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path.join(MANIFEST_FILE)).map_err(|e| {
            Error::index_format(format!("cannot read manifest in {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::index_format(format!("invalid manifest: {}", e)))
    }
}

/// Whether a snapshot manifest exists at `path`
pub fn snapshot_exists(path: &Path) -> bool {
    path.join(MANIFEST_FILE).is_file()
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl VectorIndex {
    /// Persist the index at `path`, replacing any existing snapshot atomically
    pub fn save(&self, path: &Path) -> Result<SnapshotManifest> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let entries = bincode::serde::encode_to_vec(&self.entries, bincode_config())
            .map_err(|e| Error::internal(format!("failed to encode index entries: {}", e)))?;

        let manifest = SnapshotManifest {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot_id: self.snapshot_id,
            created_at: self.created_at,
            embedding_model: self.model_id.clone(),
            dimensions: self.dimensions,
            entry_count: self.entries.len(),
            checksum: checksum(&entries),
        };

        let staging = tempfile::Builder::new()
            .prefix(".docqa-snapshot-")
            .tempdir_in(&parent)?;
        std::fs::write(staging.path().join(ENTRIES_FILE), &entries)?;
        std::fs::write(
            staging.path().join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        replace_dir(staging.into_path(), path)?;

        tracing::info!(
            "Saved index snapshot {} ({} entries) to {}",
            manifest.snapshot_id,
            manifest.entry_count,
            path.display()
        );
        Ok(manifest)
    }

    /// Load a snapshot without re-embedding.
    ///
    /// Fails with `Error::IndexFormat` when the snapshot is missing, was
    /// written by another format version or embedding model, or is corrupt.
    pub fn load(path: &Path, expected_model: &str) -> Result<Self> {
        let manifest = SnapshotManifest::read(path)?;

        if manifest.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::index_format(format!(
                "unsupported snapshot format version {} (expected {})",
                manifest.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        if manifest.embedding_model != expected_model {
            return Err(Error::index_format(format!(
                "snapshot was built with embedding model '{}', configured model is '{}'",
                manifest.embedding_model, expected_model
            )));
        }

        let bytes = std::fs::read(path.join(ENTRIES_FILE))
            .map_err(|e| Error::index_format(format!("cannot read entries: {}", e)))?;
        if checksum(&bytes) != manifest.checksum {
            return Err(Error::index_format("entries checksum does not match manifest"));
        }

        let (entries, _): (Vec<IndexEntry>, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode_config())
                .map_err(|e| Error::index_format(format!("cannot decode entries: {}", e)))?;

        if entries.len() != manifest.entry_count {
            return Err(Error::index_format(format!(
                "manifest lists {} entries, file holds {}",
                manifest.entry_count,
                entries.len()
            )));
        }
        if let Some(entry) = entries.iter().find(|e| e.vector.len() != manifest.dimensions) {
            return Err(Error::index_format(format!(
                "entry {} has {} dimensions, manifest says {}",
                entry.id,
                entry.vector.len(),
                manifest.dimensions
            )));
        }
        if entries.iter().enumerate().any(|(i, e)| e.id != i as u64) {
            return Err(Error::index_format("entry ids are not in insertion order"));
        }

        tracing::info!(
            "Loaded index snapshot {} ({} entries) from {}",
            manifest.snapshot_id,
            entries.len(),
            path.display()
        );

        Ok(Self {
            snapshot_id: manifest.snapshot_id,
            created_at: manifest.created_at,
            model_id: manifest.embedding_model,
            dimensions: manifest.dimensions,
            entries,
        })
    }
}

/// Move `staged` to `target`, replacing an existing directory
fn replace_dir(staged: PathBuf, target: &Path) -> Result<()> {
    if !target.exists() {
        return rename_or_cleanup(&staged, target);
    }

    let backup = target.with_file_name(format!(
        ".{}.old-{}",
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        Uuid::new_v4().simple()
    ));
    if let Err(e) = std::fs::rename(target, &backup) {
        let _ = std::fs::remove_dir_all(&staged);
        return Err(e.into());
    }

    if let Err(e) = rename_or_cleanup(&staged, target) {
        // Put the previous snapshot back
        let _ = std::fs::rename(&backup, target);
        return Err(e);
    }

    if let Err(e) = std::fs::remove_dir_all(&backup) {
        tracing::warn!("Could not remove old snapshot {}: {}", backup.display(), e);
    }
    Ok(())
}

fn rename_or_cleanup(from: &Path, to: &Path) -> Result<()> {
    std::fs::rename(from, to).map_err(|e| {
        let _ = std::fs::remove_dir_all(from);
        Error::from(e)
    })
}
