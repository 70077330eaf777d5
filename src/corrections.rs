// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Corrections that can be performed on visibility data

use std::f64::consts::PI;

use log::trace;

use crate::{
    marlu::{constants::VEL_C, ndarray::Axis, Complex},
    metadata::Metadata,
    util::progress_bar,
    vis::VisData,
};

/// Perform cable length corrections on the cross-correlations of `vis`.
///
/// Cable lengths are determined by the difference between a baseline's rfInput electrical
/// lengths in the metafits, per polarisation: for a product of feed `p1` of `ant1` with feed
/// `p2` of `ant2` the difference is `L(ant2, p2) - L(ant1, p1)`. Complex visibilities are
/// phase-shifted by an angle determined by that difference and the channel's frequency.
///
/// Autocorrelations are left alone.
///
/// # Accuracy
///
/// The angle is computed in f64 and rounded to f32 only as a rotation.
pub fn correct_cable_lengths(vis: &mut VisData, metadata: &Metadata, draw_progress: bool) {
    trace!("start correct_cable_lengths");

    let correction_progress = progress_bar(vis.num_baselines(), "cable corrections", draw_progress);

    let pols = vis.pols.clone();
    let freqs_hz = vis.freqs_hz.clone();
    for (mut vis_baseline, &(ant1, ant2)) in vis.vis.axis_iter_mut(Axis(1)).zip(&vis.baselines) {
        correction_progress.inc(1);
        if ant1 == ant2 {
            continue;
        }
        let lengths1 = metadata.antennas[ant1].cable_lengths_m;
        let lengths2 = metadata.antennas[ant2].cable_lengths_m;
        let pol_lengths: Vec<f64> = pols
            .iter()
            .map(|pol| {
                let (feed1, feed2) = pol.feeds();
                lengths2[feed2 as usize] - lengths1[feed1 as usize]
            })
            .collect();

        // [time][spw][chan][pol]
        for (mut vis_chan, &freq_hz) in vis_baseline.axis_iter_mut(Axis(2)).zip(&freqs_hz) {
            let pol_sin_cos: Vec<Complex<f32>> = pol_lengths
                .iter()
                .map(|electrical_length_m| {
                    let angle: f64 = -2.0 * PI * electrical_length_m * freq_hz / VEL_C;
                    let (sin_angle_f64, cos_angle_f64) = angle.sin_cos();
                    Complex::new(cos_angle_f64 as f32, sin_angle_f64 as f32)
                })
                .collect();
            for mut vis_pols in vis_chan.lanes_mut(Axis(2)) {
                for (v, rotation) in vis_pols.iter_mut().zip(&pol_sin_cos) {
                    *v *= rotation;
                }
            }
        }
    }

    correction_progress.finish();
    trace!("end correct_cable_lengths");
}
