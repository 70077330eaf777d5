// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Methods for initialising flags and sample counts.
//!
//! Flags are applied to a [`VisBuilder`] after decoding, while the selection it holds still
//! says where each selected timestep and channel sits on the full axes of its file set. Time
//! windows are counted from the start and end of the full time axis, and channel windows from
//! the edges of each coarse channel.

use log::{debug, trace};

use crate::{
    assembler::{GroupAxes, VisBuilder},
    constants::WINDOW_TOLERANCE,
    marlu::ndarray::Axis,
    IngestError,
};

/// How many whole `step`s fit in `value`.
///
/// # Errors
///
/// Will error with [`IngestError::InexactFlagWindow`] if `value` is negative or not within
/// [`WINDOW_TOLERANCE`] of an integer multiple of `step`.
pub fn whole_steps(
    parameter: &'static str,
    resolution: &'static str,
    value: f64,
    step: f64,
) -> Result<usize, IngestError> {
    let inexact = || IngestError::InexactFlagWindow {
        parameter,
        resolution,
        value,
        step,
    };
    if value < 0.0 || step <= 0.0 {
        return Err(inexact());
    }
    let ratio = value / step;
    if (ratio - ratio.round()).abs() > WINDOW_TOLERANCE * ratio.max(1.0) {
        return Err(inexact());
    }
    Ok(ratio.round() as usize)
}

/// The windows flagged when initialising flags, in native units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagWindows {
    /// Fine channels flagged at each edge of every coarse channel.
    pub edge_chans: usize,
    /// Whether to flag the centre fine channel of every coarse channel.
    pub flag_dc_offset: bool,
    /// Timesteps flagged at the start of the time axis.
    pub start_steps: usize,
    /// Timesteps flagged at the end of the time axis.
    pub end_steps: usize,
}

impl FlagWindows {
    /// Convert flag windows in physical units to whole channels and timesteps.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::InexactFlagWindow`] naming the first window which is not
    /// an exact multiple of its resolution.
    pub fn new(
        edge_width_hz: f64,
        channel_width_hz: f64,
        start_flag_s: f64,
        end_flag_s: f64,
        int_time_s: f64,
        flag_dc_offset: bool,
    ) -> Result<Self, IngestError> {
        let windows = Self {
            edge_chans: whole_steps("edge_width", "channel_width", edge_width_hz, channel_width_hz)?,
            flag_dc_offset,
            start_steps: whole_steps("start_flag", "integration_time", start_flag_s, int_time_s)?,
            end_steps: whole_steps("end_flag", "integration_time", end_flag_s, int_time_s)?,
        };
        debug!("flag windows: {windows:?}");
        Ok(windows)
    }

    /// Which fine channels of a coarse channel are flagged.
    pub fn fine_chan_flags(&self, num_fine_chans: usize) -> Vec<bool> {
        let mut flags = vec![false; num_fine_chans];
        for (i, flag) in flags.iter_mut().enumerate() {
            if i < self.edge_chans || i + self.edge_chans >= num_fine_chans {
                *flag = true;
            }
        }
        if self.flag_dc_offset && num_fine_chans > 0 {
            flags[num_fine_chans / 2] = true;
        }
        flags
    }

    /// Which timesteps of a time axis are flagged.
    pub fn timestep_flags(&self, num_timesteps: usize) -> Vec<bool> {
        (0..num_timesteps)
            .map(|i| i < self.start_steps || i + self.end_steps >= num_timesteps)
            .collect()
    }
}

/// Flag every baseline involving one of `antennas`, giving it no samples.
pub fn flag_antennas(builder: &mut VisBuilder, axes: &GroupAxes, antennas: &[usize]) {
    trace!("start flag_antennas");
    for (sel_idx, &bl_idx) in builder.selection.baseline_idxs.iter().enumerate() {
        let (ant1, ant2) = axes.baselines[bl_idx];
        if antennas.contains(&ant1) || antennas.contains(&ant2) {
            builder
                .flags
                .index_axis_mut(Axis(1), sel_idx)
                .fill(true);
            builder
                .nsamples
                .index_axis_mut(Axis(1), sel_idx)
                .fill(0.0);
        }
    }
    debug!("flagged baselines of antennas {antennas:?}");
    trace!("end flag_antennas");
}

/// Flag the edge and centre channels of every coarse channel, and the timesteps at the start and
/// end of the full time axis.
pub fn flag_windows(
    builder: &mut VisBuilder,
    axes: &GroupAxes,
    windows: &FlagWindows,
    num_fine_chans: usize,
) {
    trace!("start flag_windows");
    let fine_chan_flags = windows.fine_chan_flags(num_fine_chans);
    let timestep_flags = windows.timestep_flags(axes.times.len());
    let sel = &builder.selection;

    for (sel_idx, &chan_idx) in sel.chan_idxs.iter().enumerate() {
        if fine_chan_flags[chan_idx % num_fine_chans] {
            builder.flags.index_axis_mut(Axis(3), sel_idx).fill(true);
        }
    }
    for (sel_idx, &timestep_idx) in sel.timestep_idxs.iter().enumerate() {
        if timestep_flags[timestep_idx] {
            builder.flags.index_axis_mut(Axis(0), sel_idx).fill(true);
        }
    }
    trace!("end flag_windows");
}
