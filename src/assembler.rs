// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Decoding raw correlator blocks into the canonical visibility layout.
//!
//! # Raw layout
//!
//! Each visibility HDU of a data file is one block: one coarse channel, one timestep. There are
//! four products per baseline (autos included), each a `[re, im]` pair of floats.
//!
//! - MWAX blocks are `[raw baseline][fine chan][product][re, im]`. Raw baselines are the upper
//!   triangle of antennas and the products are `XX, XY, YX, YY`.
//! - legacy blocks are `[fine chan][product][re, im]`. Inputs are numbered by where they come
//!   out of the fine PFB ([`RfInput::pfb_position`](crate::metadata::RfInput::pfb_position)),
//!   and the products walk the upper triangle of those positions two by two. Each pair of
//!   inputs is written once, as the complex conjugate of the product of the row input with the
//!   column input.
//!
//! Products whose first antenna comes after the second are conjugated and their feeds swapped
//! so that they land on the `ant1 <= ant2` baseline.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::{
    constants::{FLOATS_PER_PRODUCT, LEGACY_PFB_INPUTS, NUM_POLS},
    fileset::FileSet,
    io::fits::{FitsOpen, FitsRead},
    marlu::{
        hifitime::{Duration, Epoch},
        ndarray::Array5,
        Complex,
    },
    metadata::{CorrelatorVersion, FeedPol, Metadata},
    selection::VisSelection,
    util::progress_bar,
    vis::{all_baselines, baseline_index, PhaseCentre, Pol, VisAntenna, VisData},
    IngestError,
};

/// Products per raw baseline.
const PRODUCTS_PER_BASELINE: usize = 4;

/// The full axes of a validated file set, before any selection.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAxes {
    /// Centroid of each timestep.
    pub times: Vec<Epoch>,
    /// Every baseline of the observation's antennas.
    pub baselines: Vec<(usize, usize)>,
    /// Centre frequency of each fine channel over all coarse channels, ascending.
    pub freqs_hz: Vec<f64>,
}

impl GroupAxes {
    /// The axes of `file_set`.
    pub fn new(file_set: &FileSet, metadata: &Metadata) -> Self {
        let half_int = Duration::from_milliseconds(file_set.int_time_ms as f64 / 2.0);
        let times = file_set
            .timestep_starts_ms
            .iter()
            .map(|&ms| Epoch::from_unix_seconds(ms as f64 / 1e3) + half_int)
            .collect();
        let freqs_hz = file_set
            .coarse_chans
            .iter()
            .flat_map(|cc| {
                metadata.fine_chan_freqs_hz(cc.receiver_channel, file_set.num_fine_chans)
            })
            .collect();
        Self {
            times,
            baselines: all_baselines(metadata.antennas.len()),
            freqs_hz,
        }
    }
}

/// Where one raw product goes in the selected arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProductTarget {
    /// Index of the product within a fine channel (legacy) or over the block (MWAX).
    product: usize,
    baseline: usize,
    pol: usize,
    conjugate: bool,
}

/// Every selected destination of the raw products of a block.
///
/// # Errors
///
/// Will error with [`IngestError::BadMetadata`] if the legacy PFB positions of the inputs don't
/// cover every position exactly once.
fn product_targets(
    metadata: &Metadata,
    version: CorrelatorVersion,
    baseline_inv: &[Option<usize>],
    pol_inv: &[Option<usize>],
) -> Result<Vec<ProductTarget>, IngestError> {
    let num_ants = metadata.antennas.len();
    let mut targets = vec![];
    let mut push = |product: usize,
                    (ant_a, feed_a): (usize, FeedPol),
                    (ant_b, feed_b): (usize, FeedPol),
                    conjugate: bool| {
        let pol = Pol::from_feeds(feed_a, feed_b) as usize;
        if let (Some(baseline), Some(pol)) = (
            baseline_inv[baseline_index(ant_a, ant_b, num_ants)],
            pol_inv[pol],
        ) {
            targets.push(ProductTarget {
                product,
                baseline,
                pol,
                conjugate,
            });
        }
    };

    match version {
        CorrelatorVersion::Mwax => {
            let feeds = [FeedPol::X, FeedPol::Y];
            let mut product = 0;
            for ant1 in 0..num_ants {
                for ant2 in ant1..num_ants {
                    for feed1 in feeds {
                        for feed2 in feeds {
                            push(product, (ant1, feed1), (ant2, feed2), false);
                            product += 1;
                        }
                    }
                }
            }
        }
        CorrelatorVersion::Legacy => {
            let num_inputs = metadata.inputs.len();
            let mut at_position: Vec<Option<(usize, FeedPol)>> = vec![None; num_inputs];
            for input in &metadata.inputs {
                match at_position.get_mut(input.pfb_position) {
                    Some(slot) if slot.is_none() => *slot = Some((input.ant, input.pol)),
                    _ => {
                        return Err(IngestError::BadMetadata {
                            path: metadata.path.clone(),
                            reason: format!(
                                "the legacy correlator can't order {num_inputs} inputs, it needs a multiple of {LEGACY_PFB_INPUTS}"
                            ),
                        })
                    }
                }
            }
            // every position was filled exactly once
            let at_position: Vec<(usize, FeedPol)> = at_position.into_iter().flatten().collect();

            let mut product = 0;
            for col in (0..num_inputs).step_by(2) {
                for row in (0..=col).step_by(2) {
                    for (d_row, d_col) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let (row, col) = (row + d_row, col + d_col);
                        // the lower left of a diagonal square repeats the upper right
                        if row > col {
                            product += 1;
                            continue;
                        }
                        let (r, c) = (at_position[row], at_position[col]);
                        // stored as conj(r c*)
                        if r.0 <= c.0 {
                            push(product, r, c, true);
                        }
                        if c.0 <= r.0 && row != col {
                            push(product, c, r, false);
                        }
                        product += 1;
                    }
                }
            }
        }
    }
    Ok(targets)
}

/// Arrays being filled for a selection of a file set, owned by a single ingestion.
#[derive(Debug)]
pub struct VisBuilder {
    /// Which parts of the file set's axes are being filled.
    pub selection: VisSelection,
    /// `[time][baseline][spw][channel][pol]`, zero until decoded.
    pub vis: Array5<Complex<f32>>,
    /// Flagged until decoded.
    pub flags: Array5<bool>,
    /// Zero until decoded.
    pub nsamples: Array5<f32>,
}

impl VisBuilder {
    /// Allocate the arrays for `selection`, up front.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::InsufficientMemory`] if the arrays can't be allocated.
    pub fn new(selection: VisSelection) -> Result<Self, IngestError> {
        let vis = selection.allocate_vis()?;
        let flags = selection.allocate_flags()?;
        let nsamples = selection.allocate_nsamples()?;
        Ok(Self {
            selection,
            vis,
            flags,
            nsamples,
        })
    }

    /// Decode every selected block of `file_set` into the arrays.
    ///
    /// Blocks are visited coarse channel by coarse channel (ascending receiver channel), then
    /// in timestamp order. Decoded samples get a sample count of 1 and are unflagged.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::BadDataFile`] if a block's shape doesn't match the
    /// metadata, or [`IngestError::Io`] if it can't be read.
    pub fn read_file_set<O: FitsOpen>(
        &mut self,
        opener: &O,
        file_set: &FileSet,
        metadata: &Metadata,
        draw_progress: bool,
    ) -> Result<(), IngestError> {
        trace!("start VisBuilder::read_file_set");

        let num_fine_chans = file_set.num_fine_chans;
        let num_ants = metadata.antennas.len();
        let num_raw_bls = num_ants * (num_ants + 1) / 2;
        let num_products = num_raw_bls * PRODUCTS_PER_BASELINE;
        let floats_per_block = num_fine_chans * num_products * FLOATS_PER_PRODUCT;

        let sel = &self.selection;
        let time_inv = VisSelection::inverse(&sel.timestep_idxs, file_set.timestep_starts_ms.len());
        let chan_inv = VisSelection::inverse(&sel.chan_idxs, file_set.num_chans());
        let baseline_inv = VisSelection::inverse(&sel.baseline_idxs, num_raw_bls);
        let pol_inv = VisSelection::inverse(&sel.pol_idxs, NUM_POLS);
        let targets = product_targets(metadata, file_set.version, &baseline_inv, &pol_inv)?;

        let num_blocks = file_set
            .coarse_chans
            .iter()
            .flat_map(|cc| cc.files.iter())
            .map(|f| f.blocks.len())
            .sum();
        let read_progress = progress_bar(num_blocks, "loading hdus", draw_progress);

        for (coarse_chan_idx, coarse_chan) in file_set.coarse_chans.iter().enumerate() {
            // fine channels of this coarse channel which are selected: (fine chan, output chan)
            let fine_chans: Vec<(usize, usize)> = (0..num_fine_chans)
                .filter_map(|fine| {
                    chan_inv[coarse_chan_idx * num_fine_chans + fine].map(|out| (fine, out))
                })
                .collect();

            // blocks in timestamp order over all batches
            let mut blocks: BTreeMap<u64, Vec<(usize, usize)>> = BTreeMap::new();
            for (file_idx, file) in coarse_chan.files.iter().enumerate() {
                for &(hdu_num, start_ms) in &file.blocks {
                    blocks.entry(start_ms).or_default().push((file_idx, hdu_num));
                }
            }
            let mut readers = coarse_chan
                .files
                .iter()
                .map(|f| opener.open(&f.path))
                .collect::<Result<Vec<_>, _>>()?;

            for (start_ms, hdus) in blocks {
                let time_out = file_set.timestep_index(start_ms).and_then(|t| time_inv[t]);
                for (file_idx, hdu_num) in hdus {
                    read_progress.inc(1);
                    let time_out = match time_out {
                        Some(time_out) if !fine_chans.is_empty() => time_out,
                        _ => continue,
                    };
                    let reader = &mut readers[file_idx];
                    let block = reader.read_image(hdu_num)?;
                    if block.len() != floats_per_block {
                        return Err(IngestError::BadDataFile {
                            path: reader.path().to_string(),
                            reason: format!(
                                "hdu {hdu_num} has {} floats, expected {floats_per_block} for {num_fine_chans} fine channels and {num_raw_bls} baselines",
                                block.len()
                            ),
                        });
                    }
                    self.decode_block(
                        &block,
                        file_set.version,
                        time_out,
                        &fine_chans,
                        num_fine_chans,
                        num_products,
                        &targets,
                    );
                }
            }
        }
        read_progress.finish();
        debug!(
            "decoded {} blocks into shape {:?}",
            num_blocks,
            self.vis.dim()
        );
        trace!("end VisBuilder::read_file_set");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_block(
        &mut self,
        block: &[f32],
        version: CorrelatorVersion,
        time_out: usize,
        fine_chans: &[(usize, usize)],
        num_fine_chans: usize,
        num_products: usize,
        targets: &[ProductTarget],
    ) {
        for target in targets {
            for &(fine, chan_out) in fine_chans {
                let offset = match version {
                    CorrelatorVersion::Legacy => {
                        (fine * num_products + target.product) * FLOATS_PER_PRODUCT
                    }
                    CorrelatorVersion::Mwax => {
                        let raw_bl = target.product / PRODUCTS_PER_BASELINE;
                        let product = target.product % PRODUCTS_PER_BASELINE;
                        ((raw_bl * num_fine_chans + fine) * PRODUCTS_PER_BASELINE + product)
                            * FLOATS_PER_PRODUCT
                    }
                };
                let raw = Complex::new(block[offset], block[offset + 1]);
                let idx = (time_out, target.baseline, 0, chan_out, target.pol);
                self.vis[idx] = if target.conjugate { raw.conj() } else { raw };
                self.flags[idx] = false;
                self.nsamples[idx] = 1.0;
            }
        }
    }

    /// Freeze the arrays into a [`VisData`], describing the selected part of `axes`.
    pub fn finalise(self, axes: &GroupAxes, metadata: &Metadata) -> VisData {
        let sel = &self.selection;
        let freqs_hz: Vec<f64> = sel.chan_idxs.iter().map(|&i| axes.freqs_hz[i]).collect();
        VisData {
            times: sel.timestep_idxs.iter().map(|&i| axes.times[i]).collect(),
            int_time: Duration::from_milliseconds(metadata.int_time_ms as f64),
            baselines: sel.baseline_idxs.iter().map(|&i| axes.baselines[i]).collect(),
            freqs_contiguous: VisData::check_freqs_contiguous(
                &freqs_hz,
                metadata.fine_chan_width_hz,
            ),
            freqs_hz,
            channel_width_hz: metadata.fine_chan_width_hz,
            pols: sel.pol_idxs.iter().map(|&i| Pol::ALL[i]).collect(),
            antennas: metadata
                .antennas
                .iter()
                .map(|ant| VisAntenna {
                    name: ant.name.clone(),
                    position: ant.position,
                })
                .collect(),
            array_pos: metadata.array_pos,
            phase_centre: PhaseCentre::Drift,
            object_name: metadata.object_name.clone(),
            extra_keywords: metadata.extra_keywords.clone(),
            vis: self.vis,
            flags: self.flags,
            nsamples: self.nsamples,
        }
    }
}
