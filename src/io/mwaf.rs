// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Items related to the reading of the FITS-based MWA Flag file format.
//!
//! # MWAF Format
//!
//! Similar to the GPUFits format, mwaf files come in a set for each observation, and there is one
//! .mwaf file per gpubox (coarse channel). This file contains a binary table of all the flags for
//! that coarse channel. There is one row for each timestep-baseline combination, and there is only
//! one column. Each cell in the table contains a binary vector of flags for each fine channel in
//! the coarse channel.
//!
//! Scan `s` of a flag file is taken to be timestep `s` of the file set's time axis.

use std::path::Path;

use log::{debug, trace};

use super::{
    error::IOError::MwafInconsistent,
    fits::{get_required_key, FitsOpen, FitsRead},
};
use crate::{
    assembler::VisBuilder,
    diagnostics::{Diagnostic, Diagnostics},
    fileset::FileSet,
    marlu::ndarray::s,
    selection::VisSelection,
    IngestError,
};

/// Flag file versions whose layout we can decode.
const SUPPORTED_VERSIONS: &[&str] = &["1.0", "2.0"];

/// flag metadata for a particular flag file in the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagFileHeader {
    /// The `VERSION` key from the primary hdu
    pub version: String,
    /// The `GPSTIME` key from the primary hdu
    pub obsid: u32,
    /// The number of correlator fine channels per flag file, and the `NCHANS` key from the
    /// primary hdu.
    pub num_channels: usize,
    /// Total number of antennas (tiles) in the array, and the `NANTENNA` key from the primary hdu
    pub num_ants: usize,
    /// Number of timesteps in the file, and the `NSCANS` key from the primary hdu
    pub num_timesteps: usize,
    /// The `NPOLS` key from the primary hdu
    pub num_pols: usize,
    /// The `GPUBOXNO` key from the primary hdu
    pub gpubox_id: usize,
    /// The number of rows (timesteps × baselines) in the flag table.
    pub num_rows: usize,
}

impl FlagFileHeader {
    /// Read and check the header of an opened flag file.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::UnsupportedFeature`] if the version or number of
    /// polarisations can't be decoded, or [`super::error::IOError::MwafInconsistent`] if the
    /// table doesn't have a row for every scan and baseline.
    pub fn read<R: FitsRead>(reader: &mut R) -> Result<Self, IngestError> {
        let header = Self {
            version: get_required_key(reader, 0, "VERSION")?,
            obsid: get_required_key(reader, 0, "GPSTIME")?,
            num_channels: get_required_key(reader, 0, "NCHANS")?,
            num_ants: get_required_key(reader, 0, "NANTENNA")?,
            num_timesteps: get_required_key(reader, 0, "NSCANS")?,
            num_pols: get_required_key(reader, 0, "NPOLS")?,
            gpubox_id: get_required_key(reader, 0, "GPUBOXNO")?,
            num_rows: reader.num_rows(1)?,
        };
        let version = header.version.trim_matches(|c| c == '\'' || c == ' ');
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(IngestError::UnsupportedFeature {
                feature: format!(
                    "reading in cotter flag files with VERSION {} is not supported ({})",
                    header.version,
                    reader.path()
                ),
            });
        }
        if header.num_pols != 1 {
            return Err(IngestError::UnsupportedFeature {
                feature: format!(
                    "reading in cotter flag files with NPOLS {} is not supported ({})",
                    header.num_pols,
                    reader.path()
                ),
            });
        }
        if header.num_rows != header.num_timesteps * header.num_baselines() {
            return Err(MwafInconsistent {
                file: reader.path().to_string(),
                expected: "NSCANS * NANTENNA * (NANTENNA+1) / 2 = NAXIS2".to_string(),
                found: format!(
                    "{} * {} != {}",
                    header.num_timesteps,
                    header.num_baselines(),
                    header.num_rows
                ),
            }
            .into());
        }
        Ok(header)
    }

    /// The number of baselines (autos included) flagged in each scan.
    pub fn num_baselines(&self) -> usize {
        self.num_ants * (self.num_ants + 1) / 2
    }
}

/// OR the flags of cotter flag files into `builder`.
///
/// Each flag file is matched to a coarse channel of `file_set` by its `GPUBOXNO`. Flag files for
/// coarse channels which aren't in the file set are skipped with
/// [`Diagnostic::UnmatchedFlagFile`].
///
/// # Errors
///
/// Will error with [`IngestError::UnsupportedFeature`] if a flag file can't be decoded, or
/// [`super::error::IOError::MwafInconsistent`] if it disagrees with the file set on the number of
/// fine channels or antennas.
pub fn apply_flag_files<O: FitsOpen, P: AsRef<Path>>(
    opener: &O,
    paths: &[P],
    file_set: &FileSet,
    num_ants: usize,
    builder: &mut VisBuilder,
    diagnostics: &mut Diagnostics,
) -> Result<(), IngestError> {
    trace!("start apply_flag_files");

    let num_fine_chans = file_set.num_fine_chans;
    let sel = &builder.selection;
    let time_inv = VisSelection::inverse(&sel.timestep_idxs, file_set.timestep_starts_ms.len());
    let chan_inv = VisSelection::inverse(&sel.chan_idxs, file_set.num_chans());
    let baseline_inv = VisSelection::inverse(&sel.baseline_idxs, num_ants * (num_ants + 1) / 2);

    for path in paths {
        let mut reader = opener.open(path.as_ref())?;
        let header = FlagFileHeader::read(&mut reader)?;
        let coarse_chan_idx = match file_set.coarse_chans.iter().position(|cc| {
            cc.files
                .first()
                .map_or(false, |f| f.box_number == header.gpubox_id)
        }) {
            Some(idx) => idx,
            None => {
                diagnostics.push(Diagnostic::UnmatchedFlagFile {
                    path: reader.path().to_string(),
                    gpubox: header.gpubox_id,
                });
                continue;
            }
        };
        if header.num_channels != num_fine_chans {
            return Err(MwafInconsistent {
                file: reader.path().to_string(),
                expected: format!("NCHANS = {num_fine_chans}"),
                found: header.num_channels.to_string(),
            }
            .into());
        }
        if header.num_ants != num_ants {
            return Err(MwafInconsistent {
                file: reader.path().to_string(),
                expected: format!("NANTENNA = {num_ants}"),
                found: header.num_ants.to_string(),
            }
            .into());
        }

        // (fine chan, output chan) of this coarse channel's selected channels
        let fine_chans: Vec<(usize, usize)> = (0..num_fine_chans)
            .filter_map(|fine| {
                chan_inv[coarse_chan_idx * num_fine_chans + fine].map(|out| (fine, out))
            })
            .collect();
        if fine_chans.is_empty() {
            continue;
        }

        let num_baselines = header.num_baselines();
        let mut num_flagged = 0;
        for (scan, time_out) in time_inv
            .iter()
            .take(header.num_timesteps)
            .enumerate()
            .filter_map(|(scan, t)| t.map(|t| (scan, t)))
        {
            for (bl, bl_out) in baseline_inv
                .iter()
                .enumerate()
                .filter_map(|(bl, b)| b.map(|b| (bl, b)))
            {
                let bits =
                    reader.read_bit_cell(1, scan * num_baselines + bl, header.num_channels)?;
                for &(fine, chan_out) in &fine_chans {
                    if bits.get(fine).copied().unwrap_or(false) {
                        builder
                            .flags
                            .slice_mut(s![time_out, bl_out, .., chan_out, ..])
                            .fill(true);
                        num_flagged += 1;
                    }
                }
            }
        }
        debug!(
            "{} flagged {} selected (timestep, baseline, channel) cells",
            reader.path(),
            num_flagged
        );
    }

    trace!("end apply_flag_files");
    Ok(())
}
