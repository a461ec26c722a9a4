//! Signature image files
//!
//! Uploaded images arrive as base64, optionally wrapped in a
//! `data:image/...;base64,` URL. They are stored as
//! `signature_<placement>_<uuid>.<ext>` under the storage directory.
//!
//! Output artifacts go through [`StagedWrite`], which replaces a group of
//! files together or not at all.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use shared_types::{Result, SigningError};
use tempfile::{Builder, NamedTempFile, TempPath};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

pub struct SignatureImageStore {
    dir: PathBuf,
    max_size: usize,
}

impl SignatureImageStore {
    pub fn new(dir: impl Into<PathBuf>, max_size: usize) -> Self {
        Self {
            dir: dir.into(),
            max_size,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.signature_storage_dir, config.signature_max_size)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode and store a PNG signature; returns the stored path
    pub fn store_image(&self, payload: &str, placement_id: &str) -> Result<PathBuf> {
        let bytes = decode_payload(payload)?;
        self.check_size(bytes.len())?;
        if !bytes.starts_with(PNG_MAGIC) {
            return Err(SigningError::InvalidInput(
                "signature image must be a PNG".to_string(),
            ));
        }

        let path = write_atomic(&self.dir, &self.file_name(placement_id, "png"), &bytes)?;
        info!(placement_id, path = %path.display(), bytes = bytes.len(), "Stored signature image");
        Ok(path)
    }

    pub fn store_svg(&self, svg: &str, placement_id: &str) -> Result<PathBuf> {
        self.check_size(svg.len())?;
        if !svg.contains("<svg") {
            return Err(SigningError::InvalidInput("payload is not an SVG document".to_string()));
        }

        let path = write_atomic(&self.dir, &self.file_name(placement_id, "svg"), svg.as_bytes())?;
        info!(placement_id, path = %path.display(), "Stored SVG signature");
        Ok(path)
    }

    pub fn read_image(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    /// The stored image as a data URL; `None` for an empty path
    pub fn load_as_data_url(&self, path: &str) -> Result<Option<String>> {
        if path.trim().is_empty() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let mime = if path.ends_with(".svg") {
            "image/svg+xml"
        } else {
            "image/png"
        };
        Ok(Some(format!("data:{};base64,{}", mime, BASE64.encode(bytes))))
    }

    /// Missing files are not an error
    pub fn delete_image(&self, path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path, "Deleted signature image");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.max_size {
            return Err(SigningError::validation(format!(
                "Signature data exceeds maximum size ({} > {} bytes)",
                len, self.max_size
            )));
        }
        Ok(())
    }

    fn file_name(&self, placement_id: &str, extension: &str) -> String {
        let safe_id: String = placement_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        format!("signature_{}_{}.{}", safe_id, Uuid::new_v4(), extension)
    }
}

/// Strip an optional data-URL prefix and decode the base64 body
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let body = strip_data_url(payload);
    if body.is_empty() {
        return Err(SigningError::validation("Signature data is missing."));
    }
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| SigningError::InvalidInput(format!("signature image is not valid base64: {}", e)))
}

/// A `data:image/` URL or a decodable base64 body
pub fn is_valid_format(payload: &str) -> bool {
    let payload = payload.trim();
    if payload.is_empty() {
        return false;
    }
    payload.starts_with("data:image/") || decode_payload(payload).is_ok()
}

fn strip_data_url(payload: &str) -> &str {
    let payload = payload.trim();
    if payload.starts_with("data:") {
        payload.split_once(',').map(|(_, body)| body).unwrap_or("")
    } else {
        payload
    }
}

/// Write through a temp file in `dir` and rename into place, so readers
/// never see a partial file. The temp file is removed on any failure.
pub(crate) fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let target = dir.join(file_name);
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(&target).map_err(|e| SigningError::Io(e.error))?;
    Ok(target)
}

/// A set of files written to temp files first and renamed into place
/// together. Nothing under a target name changes until `commit`.
#[derive(Default)]
pub(crate) struct StagedWrite {
    files: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedWrite {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` to a synced temp file in `dir`; returns the final path
    pub(crate) fn stage(&mut self, dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let target = dir.join(file_name);
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        self.files.push((temp, target.clone()));
        Ok(target)
    }

    /// Rename every staged file over its target. Existing targets are moved
    /// aside first; if any rename fails the earlier ones are undone and the
    /// previous files put back.
    pub(crate) fn commit(self) -> Result<Committed> {
        let mut committed = Committed {
            installed: Vec::with_capacity(self.files.len()),
        };
        for (temp, target) in self.files {
            match install(temp, &target) {
                Ok(backup) => committed.installed.push((target, backup)),
                Err(e) => {
                    committed.rollback();
                    return Err(e);
                }
            }
        }
        Ok(committed)
    }
}

/// Files renamed into place, with the versions they replaced held aside
#[derive(Debug)]
pub(crate) struct Committed {
    installed: Vec<(PathBuf, Option<TempPath>)>,
}

impl Committed {
    /// Keep the new files and delete the replaced ones
    pub(crate) fn finish(self) {
        debug!(files = self.installed.len(), "Committed staged files");
    }

    /// Put every replaced file back, newest first
    pub(crate) fn rollback(mut self) {
        while let Some((target, backup)) = self.installed.pop() {
            restore(&target, backup);
        }
    }
}

fn install(temp: NamedTempFile, target: &Path) -> Result<Option<TempPath>> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let backup = match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_file() => {
            let backup = Builder::new().prefix(".replaced").tempfile_in(dir)?.into_temp_path();
            fs::rename(target, &backup)?;
            Some(backup)
        }
        _ => None,
    };

    match temp.persist(target) {
        Ok(_) => Ok(backup),
        Err(e) => {
            if let Some(backup) = backup {
                if let Err(err) = backup.persist(target) {
                    warn!(path = %target.display(), error = %err.error, "Failed to restore replaced file");
                }
            }
            Err(SigningError::Io(e.error))
        }
    }
}

fn restore(target: &Path, backup: Option<TempPath>) {
    let result = match backup {
        Some(backup) => backup.persist(target).map_err(|e| e.error),
        None => fs::remove_file(target),
    };
    if let Err(e) = result {
        warn!(path = %target.display(), error = %e, "Failed to roll back staged file");
    }
}
