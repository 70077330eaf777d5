// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Selecting a subset of visibilities by time, antenna, frequency and polarisation.
//!
//! A [`SelectionSpec`] describes what the caller wants in physical terms (times, antenna
//! indices, frequencies in Hz). Resolving it against the axes of a dataset gives a
//! [`VisSelection`]: the indices along each axis which are kept.
//!
//! Range filters and antenna subsets can be resolved before anything is read, so only the
//! selected blocks, baselines and channels are decoded. Explicit lists of times, frequencies or
//! polarisations are only applied once a full dataset exists ([`crate::VisData::select`]).

use log::debug;

use crate::{
    constants::{FREQ_TOLERANCE_HZ, NUM_POLS, TIME_TOLERANCE_MS},
    marlu::{
        hifitime::{Duration, Epoch},
        ndarray::Array5,
        Complex,
    },
    vis::Pol,
    IngestError,
};

/// Filters to apply to a visibility set. `None` keeps everything along that axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSpec {
    /// Keep timesteps whose centroid is within this range (inclusive).
    pub time_range: Option<(Epoch, Epoch)>,
    /// Keep only these timestep centroids.
    pub times: Option<Vec<Epoch>>,
    /// Keep baselines where both antennas are in this list of antenna indices.
    pub antennas: Option<Vec<usize>>,
    /// Keep channels whose centre frequency is within this range \[Hz\] (inclusive).
    pub freq_range: Option<(f64, f64)>,
    /// Keep only these channel centre frequencies \[Hz\].
    pub frequencies: Option<Vec<f64>>,
    /// Keep only these polarisations.
    pub polarizations: Option<Vec<Pol>>,
}

impl SelectionSpec {
    /// Whether nothing is filtered.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Why this selection can't be applied while reading, if it can't.
    pub fn streaming_obstacle(&self) -> Option<&'static str> {
        if self.times.is_some() || self.frequencies.is_some() {
            Some("explicit times or frequencies cannot be applied while reading")
        } else if self.polarizations.is_some() {
            Some("polarizations cannot be applied while reading")
        } else {
            None
        }
    }

    /// Resolve this selection against the axes of a dataset.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::EmptySelection`] if any axis is left empty.
    pub fn resolve(
        &self,
        times: &[Epoch],
        baselines: &[(usize, usize)],
        freqs_hz: &[f64],
        pols: &[Pol],
    ) -> Result<VisSelection, IngestError> {
        let time_tol = Duration::from_milliseconds(TIME_TOLERANCE_MS);
        let timestep_idxs: Vec<usize> = times
            .iter()
            .enumerate()
            .filter(|(_, &t)| match self.time_range {
                Some((start, end)) => t >= start - time_tol && t <= end + time_tol,
                None => true,
            })
            .filter(|(_, &t)| match &self.times {
                Some(wanted) => wanted.iter().any(|&w| (w - t).abs() < time_tol),
                None => true,
            })
            .map(|(i, _)| i)
            .collect();
        if timestep_idxs.is_empty() {
            return Err(IngestError::EmptySelection { axis: "times" });
        }

        let baseline_idxs: Vec<usize> = baselines
            .iter()
            .enumerate()
            .filter(|(_, (ant1, ant2))| match &self.antennas {
                Some(ants) => ants.contains(ant1) && ants.contains(ant2),
                None => true,
            })
            .map(|(i, _)| i)
            .collect();
        if baseline_idxs.is_empty() {
            return Err(IngestError::EmptySelection { axis: "baselines" });
        }

        let chan_idxs: Vec<usize> = freqs_hz
            .iter()
            .enumerate()
            .filter(|(_, &f)| match self.freq_range {
                Some((low, high)) => {
                    f >= low - FREQ_TOLERANCE_HZ && f <= high + FREQ_TOLERANCE_HZ
                }
                None => true,
            })
            .filter(|(_, &f)| match &self.frequencies {
                Some(wanted) => wanted.iter().any(|&w| (w - f).abs() < FREQ_TOLERANCE_HZ),
                None => true,
            })
            .map(|(i, _)| i)
            .collect();
        if chan_idxs.is_empty() {
            return Err(IngestError::EmptySelection {
                axis: "frequencies",
            });
        }

        let pol_idxs: Vec<usize> = pols
            .iter()
            .enumerate()
            .filter(|(_, &pol)| match &self.polarizations {
                Some(wanted) => wanted.contains(&pol),
                None => true,
            })
            .map(|(i, _)| i)
            .collect();
        if pol_idxs.is_empty() {
            return Err(IngestError::EmptySelection {
                axis: "polarizations",
            });
        }

        let selection = VisSelection {
            timestep_idxs,
            baseline_idxs,
            chan_idxs,
            pol_idxs,
        };
        debug!("resolved selection with shape {:?}", selection.get_shape());
        Ok(selection)
    }
}

/// Which indices along each axis of a visibility set are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisSelection {
    /// selected timestep indices
    pub timestep_idxs: Vec<usize>,
    /// selected baseline indices
    pub baseline_idxs: Vec<usize>,
    /// selected fine channel indices, over all coarse channels
    pub chan_idxs: Vec<usize>,
    /// selected polarisation indices
    pub pol_idxs: Vec<usize>,
}

impl VisSelection {
    /// Select everything.
    pub fn all(num_timesteps: usize, num_baselines: usize, num_chans: usize) -> Self {
        Self {
            timestep_idxs: (0..num_timesteps).collect(),
            baseline_idxs: (0..num_baselines).collect(),
            chan_idxs: (0..num_chans).collect(),
            pol_idxs: (0..NUM_POLS).collect(),
        }
    }

    /// Get the shape of the visibility, flag or sample array for this selection:
    /// (time, baseline, spectral window, channel, polarisation)
    pub fn get_shape(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.timestep_idxs.len(),
            self.baseline_idxs.len(),
            1,
            self.chan_idxs.len(),
            self.pol_idxs.len(),
        )
    }

    /// Estimate the memory size in bytes required to store the visibilities, flags and sample
    /// counts of this selection.
    pub fn estimate_bytes(&self) -> usize {
        let (t, b, s, f, p) = self.get_shape();
        t * b
            * s
            * f
            * p
            * (std::mem::size_of::<Complex<f32>>()
                + std::mem::size_of::<f32>()
                + std::mem::size_of::<bool>())
    }

    fn allocate<T: Clone>(&self, fill: T) -> Result<Array5<T>, IngestError> {
        let shape = self.get_shape();
        let num_elems = shape.0 * shape.1 * shape.2 * shape.3 * shape.4;
        let mut v = Vec::new();

        if v.try_reserve_exact(num_elems).is_ok() {
            v.resize(num_elems, fill);
            Array5::from_shape_vec(shape, v).map_err(|e| IngestError::BadArrayShape {
                argument: "shape".to_string(),
                function: "VisSelection::allocate".to_string(),
                expected: format!("{num_elems} elements"),
                received: e.to_string(),
            })
        } else {
            // Instead of erroring out with how many GiB we need for *this*
            // array, error out with how many we need for the whole selection.
            let need_gib = self.estimate_bytes() / 1024_usize.pow(3);
            Err(IngestError::InsufficientMemory { need_gib })
        }
    }

    /// Allocate a visibility array for the selection, filled with zeros.
    ///
    /// # Errors
    ///
    /// can raise `IngestError::InsufficientMemory` if not enough memory.
    pub fn allocate_vis(&self) -> Result<Array5<Complex<f32>>, IngestError> {
        self.allocate(Complex::new(0.0, 0.0))
    }

    /// Allocate a flag array for the selection, with everything flagged.
    ///
    /// # Errors
    ///
    /// can raise `IngestError::InsufficientMemory` if not enough memory.
    pub fn allocate_flags(&self) -> Result<Array5<bool>, IngestError> {
        self.allocate(true)
    }

    /// Allocate a sample count array for the selection, with no samples anywhere.
    ///
    /// # Errors
    ///
    /// can raise `IngestError::InsufficientMemory` if not enough memory.
    pub fn allocate_nsamples(&self) -> Result<Array5<f32>, IngestError> {
        self.allocate(0.0)
    }

    /// For each index along an axis of the full dataset, its index in the selection.
    pub fn inverse(selected: &[usize], axis_len: usize) -> Vec<Option<usize>> {
        let mut inverse = vec![None; axis_len];
        for (sel_idx, &idx) in selected.iter().enumerate() {
            if let Some(slot) = inverse.get_mut(idx) {
                *slot = Some(sel_idx);
            }
        }
        inverse
    }
}
