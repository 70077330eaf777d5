// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sorting submitted paths into the kinds of file the ingestion pipeline understands.

use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::{
    io::fits::{FitsOpen, FitsRead},
    IngestError,
};

/// The name of the HDU which marks a file as a ppds file.
pub const PPDS_EXTNAME: &str = "PPDS";

/// What a submitted file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A correlator (gpubox) visibility file, `.fits`.
    Data,
    /// A metafits file, `.metafits`.
    Metadata,
    /// A metafits-like file carrying extra provenance, detected by a `PPDS` HDU.
    Ppds,
    /// A cotter-style flag file, `.mwaf`.
    Flag,
}

/// Submitted paths, sorted by [`FileKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedFiles {
    /// Visibility files, in the order they were submitted.
    pub data: Vec<PathBuf>,
    /// The metafits file, if one was submitted.
    pub metafits: Option<PathBuf>,
    /// The ppds file, if one was submitted.
    pub ppds: Option<PathBuf>,
    /// Flag files, in the order they were submitted.
    pub flags: Vec<PathBuf>,
}

impl ClassifiedFiles {
    /// The file metadata should be read from: the metafits if given, otherwise the ppds.
    pub fn metadata_source(&self) -> Option<&Path> {
        self.metafits.as_deref().or(self.ppds.as_deref())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Determine the [`FileKind`] of a single path.
///
/// `.fits` and `.metafits` files are opened to look for a `PPDS` HDU.
///
/// # Errors
///
/// Will error with [`IngestError::UnsupportedExtension`] if the extension is not one of fits,
/// metafits or mwaf, or with [`IngestError::Io`] if a fits file can't be opened.
pub fn classify_path<O: FitsOpen>(opener: &O, path: &Path) -> Result<FileKind, IngestError> {
    let kind = match extension(path).as_deref() {
        Some("mwaf") => return Ok(FileKind::Flag),
        Some("fits") => FileKind::Data,
        Some("metafits") => FileKind::Metadata,
        _ => {
            return Err(IngestError::UnsupportedExtension {
                path: path.display().to_string(),
            })
        }
    };
    let mut reader = opener.open(path)?;
    if reader.hdu_index(PPDS_EXTNAME)?.is_some() {
        debug!("{} has a {} hdu", path.display(), PPDS_EXTNAME);
        return Ok(FileKind::Ppds);
    }
    Ok(kind)
}

/// Sort a flat list of paths into [`ClassifiedFiles`].
///
/// # Errors
///
/// - [`IngestError::UnsupportedExtension`] for any unknown extension,
/// - [`IngestError::MissingInputKind`] if there are no data files, or no metafits or ppds file,
/// - [`IngestError::AmbiguousMetadata`] if there is more than one metafits (or ppds) file.
pub fn classify_files<O: FitsOpen, P: AsRef<Path>>(
    opener: &O,
    paths: &[P],
) -> Result<ClassifiedFiles, IngestError> {
    trace!("start classify_files");

    let mut data = vec![];
    let mut metafits = vec![];
    let mut ppds = vec![];
    let mut flags = vec![];
    for path in paths {
        let path = path.as_ref();
        match classify_path(opener, path)? {
            FileKind::Data => data.push(path.to_path_buf()),
            FileKind::Metadata => metafits.push(path.to_path_buf()),
            FileKind::Ppds => ppds.push(path.to_path_buf()),
            FileKind::Flag => flags.push(path.to_path_buf()),
        }
    }

    if data.is_empty() {
        return Err(IngestError::MissingInputKind { kind: "data files" });
    }
    if metafits.is_empty() && ppds.is_empty() {
        return Err(IngestError::MissingInputKind {
            kind: "metafits file",
        });
    }
    for (kind, found) in [("metafits", &metafits), ("ppds", &ppds)] {
        if found.len() > 1 {
            return Err(IngestError::AmbiguousMetadata {
                kind,
                paths: found.iter().map(|p| p.display().to_string()).collect(),
            });
        }
    }

    let classified = ClassifiedFiles {
        data,
        metafits: metafits.pop(),
        ppds: ppds.pop(),
        flags,
    };
    debug!(
        "classified {} data, {} flag files",
        classified.data.len(),
        classified.flags.len()
    );

    trace!("end classify_files");
    Ok(classified)
}
