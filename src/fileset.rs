// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Validation of a group of correlator data files.
//!
//! A group is every data file which is to end up in a single visibility set: one observation,
//! any number of coarse channels, and any number of batches per coarse channel. Each file is
//! scanned (headers only) into a [`DataFile`], then the group is checked for consistency and
//! arranged into a [`FileSet`] with coarse channels in ascending receiver channel order and a
//! regular time axis.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;

use crate::{
    diagnostics::{Diagnostic, Diagnostics},
    io::fits::{get_optional_key, FitsOpen, FitsRead},
    metadata::{CorrelatorVersion, Metadata},
    IngestError,
};

lazy_static! {
    static ref RE_LEGACY: Regex = Regex::new(r"gpubox(?P<box>\d{2,3})_(?P<batch>\d{2})\.fits$")
        .expect("hard-coded regex is valid");
    static ref RE_MWAX: Regex = Regex::new(r"_ch(?P<box>\d{3})_(?P<batch>\d{3})\.fits$")
        .expect("hard-coded regex is valid");
    // Files which have been renamed but keep the legacy `_NN_BB.fits` tail.
    static ref RE_LEGACY_SHORT: Regex = Regex::new(r"_(?P<box>\d{2})_(?P<batch>\d{2})\.fits$")
        .expect("hard-coded regex is valid");
    static ref RE_OBSID: Regex =
        Regex::new(r"^(?P<obsid>\d{10})").expect("hard-coded regex is valid");
}

/// Headers of a single data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// Where the file is.
    pub path: PathBuf,
    /// Observation id from the header (or the filename).
    pub obsid: u32,
    /// Which correlator wrote this.
    pub version: CorrelatorVersion,
    /// The gpubox number (legacy) or receiver channel (MWAX) from the filename.
    pub box_number: usize,
    /// The batch number from the filename.
    pub batch: usize,
    /// The number of fine channels in each block.
    pub num_fine_chans: usize,
    /// The HDU index and start time (unix milliseconds) of each visibility block.
    pub blocks: Vec<(usize, u64)>,
}

/// The data files for a single coarse channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoarseChannel {
    /// The receiver channel number.
    pub receiver_channel: usize,
    /// Files for this channel, in batch order.
    pub files: Vec<DataFile>,
}

/// A validated group of data files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    /// The observation id.
    pub obsid: u32,
    /// Which correlator wrote the files.
    pub version: CorrelatorVersion,
    /// Fine channels per coarse channel.
    pub num_fine_chans: usize,
    /// Integration time in milliseconds.
    pub int_time_ms: u64,
    /// Coarse channels, ascending by receiver channel.
    pub coarse_chans: Vec<CoarseChannel>,
    /// Start time (unix milliseconds) of each timestep, earliest to latest with no gaps.
    pub timestep_starts_ms: Vec<u64>,
}

fn box_and_batch(path: &Path) -> Option<(CorrelatorVersion, usize, usize)> {
    let name = path.file_name()?.to_str()?;
    let (version, caps) = if let Some(caps) = RE_MWAX.captures(name) {
        (CorrelatorVersion::Mwax, caps)
    } else if let Some(caps) = RE_LEGACY.captures(name) {
        (CorrelatorVersion::Legacy, caps)
    } else {
        (CorrelatorVersion::Legacy, RE_LEGACY_SHORT.captures(name)?)
    };
    let box_number = caps.name("box")?.as_str().parse().ok()?;
    let batch = caps.name("batch")?.as_str().parse().ok()?;
    Some((version, box_number, batch))
}

/// Read the headers of a data file.
///
/// # Errors
///
/// Will error with [`IngestError::BadDataFile`] if the filename doesn't identify a coarse
/// channel, if there is no observation id, or the blocks are malformed.
pub fn scan_data_file<O: FitsOpen>(opener: &O, path: &Path) -> Result<DataFile, IngestError> {
    trace!("start scan_data_file");
    let bad = |reason: String| IngestError::BadDataFile {
        path: path.display().to_string(),
        reason,
    };

    let (version, box_number, batch) = box_and_batch(path).ok_or_else(|| {
        bad("the filename doesn't contain a gpubox or channel number".to_string())
    })?;
    let mut reader = opener.open(path)?;

    let obsid = match get_optional_key::<u32, _>(&mut reader, 0, "OBSID")? {
        Some(obsid) => obsid,
        None => match get_optional_key::<u32, _>(&mut reader, 0, "GPSTIME")? {
            Some(obsid) => obsid,
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| RE_OBSID.captures(n))
                .and_then(|caps| caps["obsid"].parse().ok())
                .ok_or_else(|| bad("no observation id in the header or filename".to_string()))?,
        },
    };

    let num_hdus = reader.num_hdus()?;
    // MWAX files alternate visibility and weight HDUs.
    let step = match version {
        CorrelatorVersion::Legacy => 1,
        CorrelatorVersion::Mwax => 2,
    };
    let mut blocks = vec![];
    let mut num_fine_chans = None;
    for hdu_num in (1..num_hdus).step_by(step) {
        let shape = reader.image_shape(hdu_num)?;
        if shape.len() != 2 {
            return Err(bad(format!("hdu {hdu_num} has shape {shape:?}, expected 2 axes")));
        }
        let fine = match version {
            CorrelatorVersion::Legacy => shape[0],
            CorrelatorVersion::Mwax => shape[1] / 8,
        };
        match num_fine_chans {
            None => num_fine_chans = Some(fine),
            Some(n) if n != fine => {
                return Err(bad(format!(
                    "hdu {hdu_num} has {fine} fine channels, earlier hdus have {n}"
                )))
            }
            _ => {}
        }
        let time: Option<u64> = get_optional_key(&mut reader, hdu_num, "TIME")?;
        let millitim: u64 = get_optional_key(&mut reader, hdu_num, "MILLITIM")?.unwrap_or(0);
        let time = time.ok_or_else(|| bad(format!("hdu {hdu_num} has no TIME key")))?;
        blocks.push((hdu_num, time * 1000 + millitim));
    }
    let num_fine_chans =
        num_fine_chans.ok_or_else(|| bad("there are no visibility hdus".to_string()))?;
    blocks.sort_by_key(|&(_, t)| t);

    debug!(
        "{}: obsid {obsid}, box {box_number}, batch {batch}, {} blocks of {num_fine_chans} fine channels",
        path.display(),
        blocks.len()
    );
    trace!("end scan_data_file");
    Ok(DataFile {
        path: path.to_path_buf(),
        obsid,
        version,
        box_number,
        batch,
        num_fine_chans,
        blocks,
    })
}

impl FileSet {
    /// Scan and validate a group of data files against the metadata.
    ///
    /// # Errors
    ///
    /// See [`FileSet::from_data_files`], and [`scan_data_file`].
    pub fn from_paths<O: FitsOpen, P: AsRef<Path>>(
        opener: &O,
        paths: &[P],
        metadata: &Metadata,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, IngestError> {
        let files = paths
            .iter()
            .map(|p| scan_data_file(opener, p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_data_files(files, metadata, diagnostics)
    }

    /// Validate a group of scanned data files.
    ///
    /// Warns with [`Diagnostic::MissingCoarseChannels`] when fewer coarse channels are given than
    /// the metadata lists, and [`Diagnostic::NonContiguousCoarseChannels`] when the given
    /// channels have gaps.
    ///
    /// # Errors
    ///
    /// - [`IngestError::CrossObservation`] if the files (or metadata) disagree on the obsid,
    /// - [`IngestError::InconsistentFineChannels`] if files disagree on fine channel count,
    /// - [`IngestError::UnknownCoarseChannel`] if a file's channel isn't in the metadata,
    /// - [`IngestError::MisalignedStart`] if a block starts off the integration grid,
    /// - [`IngestError::BadDataFile`] if legacy and MWAX files are mixed, or don't match the
    ///   metadata's correlator.
    pub fn from_data_files(
        files: Vec<DataFile>,
        metadata: &Metadata,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, IngestError> {
        trace!("start FileSet::from_data_files");

        let first = files
            .first()
            .ok_or(IngestError::MissingInputKind { kind: "data files" })?;
        let version = first.version;
        let num_fine_chans = first.num_fine_chans;

        let obsids: BTreeSet<u32> = files
            .iter()
            .map(|f| f.obsid)
            .chain(std::iter::once(metadata.obsid))
            .collect();
        if obsids.len() > 1 {
            return Err(IngestError::CrossObservation {
                obsids: obsids.into_iter().collect(),
            });
        }

        if files.iter().any(|f| f.num_fine_chans != num_fine_chans) {
            return Err(IngestError::InconsistentFineChannels {
                found: files
                    .iter()
                    .map(|f| format!("{}: {}", f.path.display(), f.num_fine_chans))
                    .join(", "),
            });
        }

        if let Some(other) = files.iter().find(|f| f.version != version) {
            return Err(IngestError::BadDataFile {
                path: other.path.display().to_string(),
                reason: "legacy and MWAX files can't be read together".to_string(),
            });
        }
        if version != metadata.version {
            return Err(IngestError::BadDataFile {
                path: first.path.display().to_string(),
                reason: format!(
                    "this is a {version:?} correlator file, but {} is for the {:?} correlator",
                    metadata.path, metadata.version
                ),
            });
        }

        let int_time_ms = metadata.int_time_ms;
        let start_ms = files
            .iter()
            .flat_map(|f| f.blocks.iter().map(|&(_, t)| t))
            .min()
            .ok_or_else(|| IngestError::BadDataFile {
                path: first.path.display().to_string(),
                reason: "there are no visibility hdus".to_string(),
            })?;
        let end_ms = files
            .iter()
            .flat_map(|f| f.blocks.iter().map(|&(_, t)| t))
            .max()
            .unwrap_or(start_ms);
        for file in &files {
            for &(_, t) in &file.blocks {
                let offset_ms = t - start_ms;
                if offset_ms % int_time_ms != 0 {
                    return Err(IngestError::MisalignedStart {
                        path: file.path.display().to_string(),
                        offset_ms,
                        int_time_ms,
                    });
                }
            }
        }

        let mut by_chan: BTreeMap<usize, Vec<DataFile>> = BTreeMap::new();
        for file in files {
            let receiver_channel = metadata
                .receiver_channel(version, file.box_number)
                .ok_or_else(|| IngestError::UnknownCoarseChannel {
                    path: file.path.display().to_string(),
                    number: file.box_number,
                    known: metadata.coarse_chans.clone(),
                })?;
            by_chan.entry(receiver_channel).or_default().push(file);
        }
        let coarse_chans: Vec<CoarseChannel> = by_chan
            .into_iter()
            .map(|(receiver_channel, mut files)| {
                files.sort_by_key(|f| f.batch);
                CoarseChannel {
                    receiver_channel,
                    files,
                }
            })
            .collect();

        let submitted: Vec<usize> = coarse_chans.iter().map(|c| c.receiver_channel).collect();
        let missing: Vec<usize> = metadata
            .coarse_chans
            .iter()
            .copied()
            .filter(|c| !submitted.contains(c))
            .collect();
        if !missing.is_empty() {
            diagnostics.push(Diagnostic::MissingCoarseChannels { missing });
        }
        if submitted.windows(2).any(|w| w[1] != w[0] + 1) {
            diagnostics.push(Diagnostic::NonContiguousCoarseChannels { submitted });
        }

        let num_timesteps = ((end_ms - start_ms) / int_time_ms + 1) as usize;
        let timestep_starts_ms = (0..num_timesteps as u64)
            .map(|i| start_ms + i * int_time_ms)
            .collect();

        let file_set = Self {
            obsid: metadata.obsid,
            version,
            num_fine_chans,
            int_time_ms,
            coarse_chans,
            timestep_starts_ms,
        };
        debug!(
            "file set for obsid {} has {} coarse channels and {} timesteps",
            file_set.obsid,
            file_set.coarse_chans.len(),
            num_timesteps
        );
        trace!("end FileSet::from_data_files");
        Ok(file_set)
    }

    /// The index of the timestep starting at `start_ms`, if it's on the time axis.
    pub fn timestep_index(&self, start_ms: u64) -> Option<usize> {
        let first = *self.timestep_starts_ms.first()?;
        let offset = start_ms.checked_sub(first)?;
        let index = (offset / self.int_time_ms) as usize;
        (offset % self.int_time_ms == 0 && index < self.timestep_starts_ms.len()).then_some(index)
    }

    /// Receiver channels of the coarse channels, ascending.
    pub fn receiver_channels(&self) -> Vec<usize> {
        self.coarse_chans
            .iter()
            .map(|c| c.receiver_channel)
            .collect()
    }

    /// Total number of fine channels across all coarse channels.
    pub fn num_chans(&self) -> usize {
        self.coarse_chans.len() * self.num_fine_chans
    }
}
