//! Staged archive extraction with atomic promotion
//!
//! Archives never unpack into the live version folder. They unpack into a
//! `.tmp_<version>` sibling, a redundant single top-level directory is
//! stripped, and the staging folder is renamed over the destination in one
//! step. A crash at any point leaves either the old tree or a staging
//! folder the startup sweep removes.

use crate::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Archive formats the engine extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// ZIP archive (.zip)
    Zip,
    /// Gzip compressed tar (.tar.gz, .tgz)
    TarGz,
    /// XZ compressed tar (.tar.xz, .txz)
    TarXz,
}

impl ArchiveFormat {
    /// Detect the archive format from a filename
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Some(Self::TarXz)
        } else {
            None
        }
    }
}

/// True when the filename names a supported archive
pub fn is_archive(filename: &str) -> bool {
    ArchiveFormat::from_filename(filename).is_some()
}

/// Extract `archive` into `staging`, then atomically promote it to `dest`
///
/// `staging` must live on the same filesystem as `dest` (the layout places
/// both inside the tool directory) so the final rename is atomic. When the
/// extracted tree consists of exactly one top-level directory, that
/// directory's contents become `dest` and the wrapper is discarded.
pub fn extract_staged(archive: &Path, dest: &Path, staging: &Path) -> Result<()> {
    // A stale staging folder from a crashed run is dead weight
    remove_if_exists(staging)?;
    std::fs::create_dir_all(staging)?;

    if let Err(error) = unpack(archive, staging) {
        let _ = std::fs::remove_dir_all(staging);
        return Err(error);
    }

    let source = match single_top_level_dir(staging)? {
        Some(inner) => inner,
        None => staging.to_path_buf(),
    };

    remove_if_exists(dest)?;
    if let Err(error) = std::fs::rename(&source, dest) {
        let _ = std::fs::remove_dir_all(staging);
        let _ = std::fs::remove_dir_all(dest);
        return Err(error.into());
    }
    // When the inner directory was promoted the wrapper is left behind
    let _ = std::fs::remove_dir_all(staging);

    Ok(())
}

fn unpack(archive: &Path, staging: &Path) -> Result<()> {
    let format = ArchiveFormat::from_filename(
        archive
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default(),
    )
    .ok_or_else(|| Error::extraction_failed(archive, "unsupported archive format"))?;

    tracing::debug!(
        archive = %archive.display(),
        staging = %staging.display(),
        ?format,
        "extracting archive"
    );

    match format {
        ArchiveFormat::Zip => extract_zip(archive, staging),
        ArchiveFormat::TarGz => {
            let file = std::fs::File::open(archive)?;
            extract_tar(flate2::read::GzDecoder::new(file), staging)
        }
        ArchiveFormat::TarXz => {
            let file = std::fs::File::open(archive)?;
            extract_tar(xz2::read::XzDecoder::new(file), staging)
        }
    }
}

fn extract_zip(archive_path: &Path, staging: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::extraction_failed(archive_path, e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::extraction_failed(archive_path, e.to_string()))?;

        // Entries with names escaping the target are silently dropped
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let target = staging.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut output = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut output)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, staging: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative = entry.path()?.into_owned();
        let target = staging.join(&relative);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }

    Ok(())
}

/// When the directory holds exactly one entry and it is a directory, return
/// it. Single level only: a lone directory inside that one is not chased.
fn single_top_level_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(None),
    };
    if entries.next().is_some() {
        return Ok(None);
    }
    if first.file_type()?.is_dir() {
        Ok(Some(first.path()))
    } else {
        Ok(None)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}
