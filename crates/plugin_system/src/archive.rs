//! Decoded plugin archives and extraction into the game tree.
//!
//! Archives are fully decoded in memory before anything touches disk, so a
//! corrupt download never leaves a half-written plugin directory behind.

use crate::error::{PluginError, Result};
use crate::paths::normalize_slashes;
use std::io::Read;
use std::path::{Component, Path};
use tracing::debug;

/// One file or directory inside an archive. Paths always use `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub data: Vec<u8>,
    pub is_dir: bool,
    /// Unix permission bits, when the format carries them
    pub mode: Option<u32>,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: normalize_slashes(&path.into()),
            data: data.into(),
            is_dir: false,
            mode: None,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: normalize_slashes(&path.into()),
            data: Vec::new(),
            is_dir: true,
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Outcome of one extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files_written: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Archive {
    origin: String,
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    /// `origin` names where the archive came from, for error messages.
    pub fn new(origin: impl Into<String>, entries: Vec<ArchiveEntry>) -> Self {
        Self {
            origin: origin.into(),
            entries,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Decodes a zip or gzipped tarball, sniffing the format from its magic
    /// bytes.
    pub fn decode(origin: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let origin = origin.into();
        let decoded = if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            decode_zip(bytes)
        } else if bytes.starts_with(&[0x1f, 0x8b]) {
            decode_tar_gz(bytes)
        } else {
            Err("unrecognized archive format".to_string())
        };

        match decoded {
            Ok(entries) => Ok(Self::new(origin, entries)),
            Err(reason) => Err(PluginError::Archive {
                url: origin,
                reason,
            }),
        }
    }

    /// Writes the archive into `target`.
    ///
    /// With `base_dir`, only entries under that archive directory are
    /// written, with the prefix stripped. Existing files are overwritten.
    /// Directory entries are ignored; parent directories are created only
    /// for files that are written.
    pub async fn extract(&self, target: &Path, base_dir: Option<&str>) -> Result<ExtractSummary> {
        let prefix = base_dir.map(base_prefix).filter(|prefix| !prefix.is_empty());
        let mut summary = ExtractSummary::default();

        // An archive with no files under `base_dir` leaves `target` untouched.
        for entry in &self.entries {
            let path = entry.path.trim_start_matches("./");
            let relative = match &prefix {
                Some(prefix) => match path.strip_prefix(prefix.as_str()) {
                    Some(rest) => rest,
                    None => {
                        summary.skipped += 1;
                        continue;
                    }
                },
                None => path,
            };
            let relative = relative.trim_end_matches('/');
            if relative.is_empty() {
                continue;
            }

            if !is_safe_relative(relative) {
                return Err(PluginError::Archive {
                    url: self.origin.clone(),
                    reason: format!("unsupported or malicious path in archive: {}", entry.path),
                });
            }

            if entry.is_dir {
                continue;
            }

            let out_path = target.join(relative);

            if let Some(parent) = out_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PluginError::io(parent, e))?;
            }
            tokio::fs::write(&out_path, &entry.data)
                .await
                .map_err(|e| PluginError::io(&out_path, e))?;

            #[cfg(unix)]
            if let Some(mode) = entry.mode {
                use std::os::unix::fs::PermissionsExt;
                let permissions = std::fs::Permissions::from_mode(mode & 0o777);
                tokio::fs::set_permissions(&out_path, permissions)
                    .await
                    .map_err(|e| PluginError::io(&out_path, e))?;
            }

            summary.files_written += 1;
        }

        debug!(
            "Extracted {} files from {} into {} ({} outside base dir)",
            summary.files_written,
            self.origin,
            target.display(),
            summary.skipped
        );
        Ok(summary)
    }
}

fn base_prefix(base_dir: &str) -> String {
    let trimmed = normalize_slashes(base_dir);
    let trimmed = trimmed.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.is_absolute()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

// ============================================================================
// Format Decoders
// ============================================================================

fn decode_zip(bytes: &[u8]) -> std::result::Result<Vec<ArchiveEntry>, String> {
    let archive = rawzip::ZipArchive::from_slice(bytes)
        .map_err(|e| format!("invalid zip archive: {:?}", e))?;

    let mut entries = Vec::new();
    for entry in archive.entries() {
        let entry = entry.map_err(|e| format!("zip entry error: {:?}", e))?;
        let path = entry
            .file_path()
            .try_normalize()
            .map_err(|e| format!("failed to normalize zip path: {:?}", e))?
            .as_ref()
            .to_string();

        if entry.is_dir() {
            entries.push(ArchiveEntry::dir(path));
            continue;
        }

        let slice_entry = archive
            .get_entry(entry.wayfinder())
            .map_err(|e| format!("failed to get entry data for {path}: {:?}", e))?;
        let raw = slice_entry.data();

        let data = match entry.compression_method() {
            rawzip::CompressionMethod::Store => raw.to_vec(),
            rawzip::CompressionMethod::Deflate => {
                let mut decoder = flate2::read::DeflateDecoder::new(raw);
                let mut data = Vec::new();
                decoder
                    .read_to_end(&mut data)
                    .map_err(|e| format!("failed to inflate {path}: {e}"))?;
                data
            }
            other => {
                return Err(format!(
                    "unsupported compression method {:?} for {path}",
                    other
                ))
            }
        };

        entries.push(ArchiveEntry::file(path, data));
    }

    Ok(entries)
}

fn decode_tar_gz(bytes: &[u8]) -> std::result::Result<Vec<ArchiveEntry>, String> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);

    let mut entries = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| format!("invalid tar archive: {e}"))?
    {
        let mut entry = entry.map_err(|e| format!("tar entry error: {e}"))?;
        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| format!("invalid tar path: {e}"))?
            .to_string_lossy()
            .into_owned();
        let mode = entry.header().mode().ok();

        if kind.is_dir() {
            entries.push(ArchiveEntry::dir(path));
            continue;
        }

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| format!("failed to read {path}: {e}"))?;
        let mut file = ArchiveEntry::file(path, data);
        file.mode = mode;
        entries.push(file);
    }

    Ok(entries)
}
