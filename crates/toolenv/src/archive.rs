// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Unpacking downloaded archives into a staging directory.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::recipe::ArchiveKind;

#[cfg(test)]
#[path = "./archive_test.rs"]
mod archive_test;

/// Scratch directory used inside the destination while unpacking.
const UNPACK_DIR: &str = ".unpack";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The archive could not be decoded.
    #[error("{0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

/// Unpack `archive` into the existing directory `dest`.
///
/// When the archive holds a single top-level directory its contents are
/// moved up so that `dest` becomes the installation root.
pub fn unpack(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<(), ArchiveError> {
    let raw = dest.join(UNPACK_DIR);
    std::fs::create_dir_all(&raw)?;

    match kind {
        ArchiveKind::TarGz => unpack_tar_gz(archive, &raw)?,
        ArchiveKind::Zip => unpack_zip(archive, &raw)?,
    }

    let root = single_root(&raw)?.unwrap_or_else(|| raw.clone());
    for entry in std::fs::read_dir(&root)? {
        let entry = entry?;
        std::fs::rename(entry.path(), dest.join(entry.file_name()))?;
    }
    std::fs::remove_dir_all(&raw)?;
    Ok(())
}

fn unpack_tar_gz(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .map_err(|e| ArchiveError::Corrupt(format!("Failed to extract tar: {e}")))
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| ArchiveError::Corrupt(format!("Failed to open zip: {e}")))?;

    for i in 0..zip.len() {
        let mut file = zip
            .by_index(i)
            .map_err(|e| ArchiveError::Corrupt(format!("Failed to read zip entry: {e}")))?;

        // Entries escaping the destination are skipped
        let Some(name) = file.enclosed_name() else {
            continue;
        };
        let outpath = dest.join(name);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&outpath)?;
        std::io::copy(&mut file, &mut out)
            .map_err(|e| ArchiveError::Corrupt(format!("Failed to read zip entry: {e}")))?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// The only child of `dir`, when that child is a directory.
fn single_root(dir: &Path) -> Result<Option<PathBuf>, ArchiveError> {
    let mut children = std::fs::read_dir(dir)?;
    let (Some(first), None) = (children.next().transpose()?, children.next()) else {
        return Ok(None);
    };
    Ok(first.file_type()?.is_dir().then(|| first.path()))
}
