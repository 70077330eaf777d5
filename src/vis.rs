// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The canonical in-memory visibility container.
//!
//! Arrays are indexed `[timestep][baseline][spectral window][channel][polarisation]`. Baselines
//! are every antenna pair `(ant1, ant2)` with `ant1 <= ant2` (autos included), ordered by `ant1`
//! then `ant2`. Polarisations are in AIPS order: XX, YY, XY, YX.

use std::{collections::BTreeMap, f64::consts::TAU, fmt::Display, str::FromStr};

use log::{debug, trace};

use crate::{
    constants::{FREQ_TOLERANCE_HZ, TIME_TOLERANCE_MS},
    diagnostics::{Diagnostic, Diagnostics},
    marlu::{
        constants::VEL_C,
        hifitime::{Duration, Epoch},
        ndarray::{concatenate, s, Array2, Array5, ArrayView5, Axis},
        precession::precess_time,
        Complex, HADec, LatLngHeight, RADec, XyzGeodetic, UVW,
    },
    metadata::FeedPol,
    selection::{SelectionSpec, VisSelection},
    IngestError,
};

/// An instrumental polarisation product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pol {
    /// X × X*
    XX = 0,
    /// Y × Y*
    YY = 1,
    /// X × Y*
    XY = 2,
    /// Y × X*
    YX = 3,
}

impl Pol {
    /// All polarisations, in array order.
    pub const ALL: [Pol; 4] = [Pol::XX, Pol::YY, Pol::XY, Pol::YX];

    /// The product of a feed on the first antenna with a feed on the second.
    pub fn from_feeds(first: FeedPol, second: FeedPol) -> Self {
        match (first, second) {
            (FeedPol::X, FeedPol::X) => Pol::XX,
            (FeedPol::Y, FeedPol::Y) => Pol::YY,
            (FeedPol::X, FeedPol::Y) => Pol::XY,
            (FeedPol::Y, FeedPol::X) => Pol::YX,
        }
    }

    /// The feeds of the first and second antenna.
    pub fn feeds(self) -> (FeedPol, FeedPol) {
        match self {
            Pol::XX => (FeedPol::X, FeedPol::X),
            Pol::YY => (FeedPol::Y, FeedPol::Y),
            Pol::XY => (FeedPol::X, FeedPol::Y),
            Pol::YX => (FeedPol::Y, FeedPol::X),
        }
    }

    /// The AIPS polarisation code (`-5` to `-8`).
    pub fn aips_code(self) -> i32 {
        -5 - self as i32
    }

    /// The polarisation with the given AIPS code, if it is a linear one.
    pub fn from_aips_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.aips_code() == code)
    }
}

impl Display for Pol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Pol::XX => "XX",
            Pol::YY => "YY",
            Pol::XY => "XY",
            Pol::YX => "YX",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Pol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "XX" => Ok(Pol::XX),
            "YY" => Ok(Pol::YY),
            "XY" => Ok(Pol::XY),
            "YX" => Ok(Pol::YX),
            other => Err(format!("unknown polarisation {other:?}")),
        }
    }
}

/// Where the visibilities are phased to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseCentre {
    /// No phasing has been applied: the data are as the correlator produced them.
    Drift,
    /// Phased to a fixed J2000 direction.
    Phased(RADec),
}

/// An antenna as far as the container is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct VisAntenna {
    /// The antenna (tile) name.
    pub name: String,
    /// Position relative to the array centre.
    pub position: XyzGeodetic,
}

/// The axis along which two visibility sets are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatAxis {
    /// Join timesteps; frequencies must match.
    Time,
    /// Join channels; times must match.
    Freq,
}

impl Display for ConcatAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcatAxis::Time => write!(f, "time"),
            ConcatAxis::Freq => write!(f, "freq"),
        }
    }
}

impl FromStr for ConcatAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "time" => Ok(ConcatAxis::Time),
            "freq" | "frequency" => Ok(ConcatAxis::Freq),
            other => Err(format!("unknown axis {other:?}, expected time or freq")),
        }
    }
}

/// The index of baseline `(ant1, ant2)`, `ant1 <= ant2`, among `num_ants` antennas.
pub fn baseline_index(ant1: usize, ant2: usize, num_ants: usize) -> usize {
    ant1 * (2 * num_ants - ant1 + 1) / 2 + (ant2 - ant1)
}

/// Every baseline of `num_ants` antennas, autos included, in array order.
pub fn all_baselines(num_ants: usize) -> Vec<(usize, usize)> {
    (0..num_ants)
        .flat_map(|ant1| (ant1..num_ants).map(move |ant2| (ant1, ant2)))
        .collect()
}

/// A set of visibilities, with flags, sample counts and the axes that describe them.
#[derive(Debug, Clone)]
pub struct VisData {
    /// Visibilities, `[time][baseline][spw][channel][pol]`.
    pub vis: Array5<Complex<f32>>,
    /// Flags, same shape as `vis`.
    pub flags: Array5<bool>,
    /// Sample counts, same shape as `vis`.
    pub nsamples: Array5<f32>,
    /// The centroid of each timestep.
    pub times: Vec<Epoch>,
    /// The integration time of each timestep.
    pub int_time: Duration,
    /// Antenna index pairs of each baseline.
    pub baselines: Vec<(usize, usize)>,
    /// Centre frequency of each channel \[Hz\].
    pub freqs_hz: Vec<f64>,
    /// Channel width \[Hz\].
    pub channel_width_hz: f64,
    /// Whether the channels are evenly spaced by `channel_width_hz`.
    pub freqs_contiguous: bool,
    /// The polarisation of each element of the last axis.
    pub pols: Vec<Pol>,
    /// The antennas baselines refer to.
    pub antennas: Vec<VisAntenna>,
    /// The array centre.
    pub array_pos: LatLngHeight,
    /// Where the visibilities are phased to.
    pub phase_centre: PhaseCentre,
    /// Name of the observed object or field.
    pub object_name: String,
    /// Provenance keywords.
    pub extra_keywords: BTreeMap<String, String>,
}

fn times_match(left: &[Epoch], right: &[Epoch]) -> bool {
    let tol = Duration::from_milliseconds(TIME_TOLERANCE_MS);
    left.len() == right.len() && left.iter().zip(right).all(|(&l, &r)| (l - r).abs() < tol)
}

fn freqs_match(left: &[f64], right: &[f64]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(l, r)| (l - r).abs() < FREQ_TOLERANCE_HZ)
}

fn radec_match(left: RADec, right: RADec) -> bool {
    (left.ra - right.ra).abs() < 1e-9 && (left.dec - right.dec).abs() < 1e-9
}

fn phase_centres_match(left: PhaseCentre, right: PhaseCentre) -> bool {
    match (left, right) {
        (PhaseCentre::Drift, PhaseCentre::Drift) => true,
        (PhaseCentre::Phased(l), PhaseCentre::Phased(r)) => radec_match(l, r),
        _ => false,
    }
}

/// The permutation which sorts `keys` ascending.
fn sort_order(keys: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]));
    order
}

/// Merge two axes, given as keys, into one ascending axis. Keys closer than `tol`
/// share a position. Returns where each left key and each right key landed, and the merged length.
fn union_positions(left: &[f64], right: &[f64], tol: f64) -> (Vec<usize>, Vec<usize>, usize) {
    let mut keyed: Vec<(f64, bool, usize)> = left
        .iter()
        .enumerate()
        .map(|(i, &k)| (k, false, i))
        .chain(right.iter().enumerate().map(|(i, &k)| (k, true, i)))
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut left_pos = vec![0; left.len()];
    let mut right_pos = vec![0; right.len()];
    let mut num = 0;
    let mut slot_start: Option<f64> = None;
    for (key, is_right, i) in keyed {
        if slot_start.map_or(true, |start| key - start >= tol) {
            num += 1;
            slot_start = Some(key);
        }
        if is_right {
            right_pos[i] = num - 1;
        } else {
            left_pos[i] = num - 1;
        }
    }
    (left_pos, right_pos, num)
}

/// Place each value at its merged position.
fn merge_axis<T: Copy>(
    left: &[T],
    left_pos: &[usize],
    right: &[T],
    right_pos: &[usize],
    num: usize,
) -> Vec<T> {
    let mut merged: Vec<Option<T>> = vec![None; num];
    for (&value, &pos) in left.iter().zip(left_pos).chain(right.iter().zip(right_pos)) {
        merged[pos].get_or_insert(value);
    }
    merged.into_iter().flatten().collect()
}

fn join<'a, T: Clone>(
    axis: usize,
    left: ArrayView5<'a, T>,
    right: ArrayView5<'a, T>,
    order: &[usize],
) -> Result<Array5<T>, IngestError> {
    let dim = left.dim();
    let joined = concatenate(Axis(axis), &[left, right]).map_err(|e| IngestError::BadArrayShape {
        argument: "other".to_string(),
        function: "VisData::concatenate".to_string(),
        expected: format!("{dim:?} off axis {axis}"),
        received: e.to_string(),
    })?;
    Ok(joined.select(Axis(axis), order))
}

impl VisData {
    /// The number of timesteps.
    pub fn num_times(&self) -> usize {
        self.times.len()
    }

    /// The number of baselines.
    pub fn num_baselines(&self) -> usize {
        self.baselines.len()
    }

    /// The number of channels.
    pub fn num_chans(&self) -> usize {
        self.freqs_hz.len()
    }

    /// Whether channels are evenly spaced by the channel width.
    pub fn check_freqs_contiguous(freqs_hz: &[f64], channel_width_hz: f64) -> bool {
        freqs_hz
            .windows(2)
            .all(|w| (w[1] - w[0] - channel_width_hz).abs() < FREQ_TOLERANCE_HZ)
    }

    /// A new visibility set containing only the selected parts of this one.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::EmptySelection`] if nothing is left along some axis.
    pub fn select(&self, spec: &SelectionSpec) -> Result<VisData, IngestError> {
        trace!("start VisData::select");
        let sel = spec.resolve(&self.times, &self.baselines, &self.freqs_hz, &self.pols)?;
        let selected = self.select_indices(&sel);
        trace!("end VisData::select");
        Ok(selected)
    }

    pub(crate) fn select_indices(&self, sel: &VisSelection) -> VisData {
        fn take<T: Clone>(arr: &Array5<T>, sel: &VisSelection) -> Array5<T> {
            arr.select(Axis(0), &sel.timestep_idxs)
                .select(Axis(1), &sel.baseline_idxs)
                .select(Axis(3), &sel.chan_idxs)
                .select(Axis(4), &sel.pol_idxs)
        }
        let freqs_hz: Vec<f64> = sel.chan_idxs.iter().map(|&i| self.freqs_hz[i]).collect();
        VisData {
            vis: take(&self.vis, sel),
            flags: take(&self.flags, sel),
            nsamples: take(&self.nsamples, sel),
            times: sel.timestep_idxs.iter().map(|&i| self.times[i]).collect(),
            int_time: self.int_time,
            baselines: sel.baseline_idxs.iter().map(|&i| self.baselines[i]).collect(),
            freqs_contiguous: Self::check_freqs_contiguous(&freqs_hz, self.channel_width_hz),
            freqs_hz,
            channel_width_hz: self.channel_width_hz,
            pols: sel.pol_idxs.iter().map(|&i| self.pols[i]).collect(),
            antennas: self.antennas.clone(),
            array_pos: self.array_pos,
            phase_centre: self.phase_centre,
            object_name: self.object_name.clone(),
            extra_keywords: self.extra_keywords.clone(),
        }
    }

    /// Join two visibility sets along time or frequency.
    ///
    /// With `axis` of `None`, the axis is inferred: frequency if the time axes match, time if
    /// the frequency axes match. If neither matches, the result spans the union of both time
    /// axes and both frequency axes; cells neither set covers are flagged with zero weight.
    /// Overlapping channels (or timesteps) are rejected. If the joined frequencies are not evenly
    /// spaced, [`Diagnostic::NonContiguousCombinedFreqs`] is raised.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::IncompatibleConcatenation`] if the sets differ in anything
    /// other than the axis being joined, or if they overlap along it. A union join is rejected if
    /// the sets share any cell.
    pub fn concatenate(
        &self,
        other: &VisData,
        axis: Option<ConcatAxis>,
        diagnostics: &mut Diagnostics,
    ) -> Result<VisData, IngestError> {
        trace!("start VisData::concatenate");
        let axis_name = axis.map_or_else(|| "inferred".to_string(), |a| a.to_string());
        let incompatible = |reason: &str| IngestError::IncompatibleConcatenation {
            axis: axis_name.clone(),
            reason: reason.to_string(),
        };

        if self.baselines != other.baselines {
            return Err(incompatible("baselines differ"));
        }
        if self.pols != other.pols {
            return Err(incompatible("polarizations differ"));
        }
        if self.antennas.len() != other.antennas.len()
            || self
                .antennas
                .iter()
                .zip(&other.antennas)
                .any(|(l, r)| l.name != r.name)
        {
            return Err(incompatible("antennas differ"));
        }
        if !phase_centres_match(self.phase_centre, other.phase_centre) {
            return Err(incompatible("phase centres differ"));
        }
        if (self.channel_width_hz - other.channel_width_hz).abs() > FREQ_TOLERANCE_HZ {
            return Err(incompatible("channel widths differ"));
        }
        if self.int_time != other.int_time {
            return Err(incompatible("integration times differ"));
        }

        let same_times = times_match(&self.times, &other.times);
        let same_freqs = freqs_match(&self.freqs_hz, &other.freqs_hz);
        let axis = match axis {
            Some(axis) => Some(axis),
            None if same_times && !same_freqs => Some(ConcatAxis::Freq),
            None if same_freqs && !same_times => Some(ConcatAxis::Time),
            None if same_freqs && same_times => {
                return Err(incompatible("both sets cover the same times and frequencies"))
            }
            None => None,
        };

        let mut joined = self.clone();
        match axis {
            None => {
                let time_keys = |v: &VisData| -> Vec<f64> {
                    v.times.iter().map(|t| t.to_gpst_seconds()).collect()
                };
                let (left_t, right_t, num_times) = union_positions(
                    &time_keys(self),
                    &time_keys(other),
                    TIME_TOLERANCE_MS / 1e3,
                );
                let (left_f, right_f, num_chans) = union_positions(
                    &self.freqs_hz,
                    &other.freqs_hz,
                    self.channel_width_hz / 2.0,
                );
                let shared_times = num_times < self.num_times() + other.num_times();
                let shared_chans = num_chans < self.num_chans() + other.num_chans();
                if shared_times && shared_chans {
                    return Err(incompatible(
                        "both sets cover some of the same times and frequencies",
                    ));
                }

                let shape = (
                    num_times,
                    self.num_baselines(),
                    self.vis.len_of(Axis(2)),
                    num_chans,
                    self.pols.len(),
                );
                joined.vis = Array5::zeros(shape);
                joined.flags = Array5::from_elem(shape, true);
                joined.nsamples = Array5::zeros(shape);
                for (src, t_pos, f_pos) in [(self, &left_t, &left_f), (other, &right_t, &right_f)] {
                    for (t, &t_out) in t_pos.iter().enumerate() {
                        for (f, &f_out) in f_pos.iter().enumerate() {
                            joined
                                .vis
                                .slice_mut(s![t_out, .., .., f_out, ..])
                                .assign(&src.vis.slice(s![t, .., .., f, ..]));
                            joined
                                .flags
                                .slice_mut(s![t_out, .., .., f_out, ..])
                                .assign(&src.flags.slice(s![t, .., .., f, ..]));
                            joined
                                .nsamples
                                .slice_mut(s![t_out, .., .., f_out, ..])
                                .assign(&src.nsamples.slice(s![t, .., .., f, ..]));
                        }
                    }
                }
                joined.times = merge_axis(&self.times, &left_t, &other.times, &right_t, num_times);
                joined.freqs_hz =
                    merge_axis(&self.freqs_hz, &left_f, &other.freqs_hz, &right_f, num_chans);
                joined.freqs_contiguous =
                    Self::check_freqs_contiguous(&joined.freqs_hz, self.channel_width_hz);
                if !joined.freqs_contiguous {
                    diagnostics.push(Diagnostic::NonContiguousCombinedFreqs);
                }
            }
            Some(ConcatAxis::Freq) => {
                if !same_times {
                    return Err(incompatible("time axes differ"));
                }
                if other.freqs_hz.iter().any(|&f| {
                    self.freqs_hz
                        .iter()
                        .any(|&g| (f - g).abs() < self.channel_width_hz / 2.0)
                }) {
                    return Err(incompatible("channels overlap"));
                }
                let freqs: Vec<f64> = self
                    .freqs_hz
                    .iter()
                    .chain(&other.freqs_hz)
                    .copied()
                    .collect();
                let order = sort_order(&freqs);
                joined.vis = join(3, self.vis.view(), other.vis.view(), &order)?;
                joined.flags = join(3, self.flags.view(), other.flags.view(), &order)?;
                joined.nsamples = join(3, self.nsamples.view(), other.nsamples.view(), &order)?;
                joined.freqs_hz = order.iter().map(|&i| freqs[i]).collect();
                joined.freqs_contiguous =
                    Self::check_freqs_contiguous(&joined.freqs_hz, self.channel_width_hz);
                if !joined.freqs_contiguous {
                    diagnostics.push(Diagnostic::NonContiguousCombinedFreqs);
                }
            }
            Some(ConcatAxis::Time) => {
                if !same_freqs {
                    return Err(incompatible("frequency axes differ"));
                }
                let tol = Duration::from_milliseconds(TIME_TOLERANCE_MS);
                if other
                    .times
                    .iter()
                    .any(|&t| self.times.iter().any(|&s| (t - s).abs() < tol))
                {
                    return Err(incompatible("timesteps overlap"));
                }
                let times: Vec<Epoch> = self.times.iter().chain(&other.times).copied().collect();
                let keys: Vec<f64> = times.iter().map(|t| t.to_gpst_seconds()).collect();
                let order = sort_order(&keys);
                joined.vis = join(0, self.vis.view(), other.vis.view(), &order)?;
                joined.flags = join(0, self.flags.view(), other.flags.view(), &order)?;
                joined.nsamples = join(0, self.nsamples.view(), other.nsamples.view(), &order)?;
                joined.times = order.iter().map(|&i| times[i]).collect();
            }
        }
        for (key, value) in &other.extra_keywords {
            joined
                .extra_keywords
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        debug!(
            "concatenated along {}: {} timesteps, {} channels",
            axis.map_or_else(|| "time and freq".to_string(), |a| a.to_string()),
            joined.num_times(),
            joined.num_chans()
        );
        trace!("end VisData::concatenate");
        Ok(joined)
    }

    /// Baseline UVWs \[m\] at `epoch` towards `centre`, from precessed antenna positions.
    fn baseline_uvws(&self, epoch: Epoch, centre: PhaseCentre) -> Vec<UVW> {
        let positions: Vec<XyzGeodetic> = self.antennas.iter().map(|a| a.position).collect();
        let (xyzs, hadec) = match centre {
            PhaseCentre::Phased(radec) => {
                let prec_info = precess_time(
                    self.array_pos.longitude_rad,
                    self.array_pos.latitude_rad,
                    radec,
                    epoch,
                    Duration::from_seconds(0.0),
                );
                (prec_info.precess_xyz(&positions), prec_info.hadec_j2000)
            }
            PhaseCentre::Drift => (positions, HADec::new(0.0, self.array_pos.latitude_rad)),
        };
        self.baselines
            .iter()
            .map(|&(ant1, ant2)| UVW::from_xyz(xyzs[ant1] - xyzs[ant2], hadec))
            .collect()
    }

    /// UVWs \[m\] of every baseline at every timestep, `[time][baseline]`, towards the current
    /// phase centre (the zenith if the data are unphased).
    pub fn uvws(&self) -> Array2<UVW> {
        let mut uvws = Array2::from_elem((self.num_times(), self.num_baselines()), UVW::default());
        for (mut row, &epoch) in uvws.outer_iter_mut().zip(&self.times) {
            for (uvw, bl_uvw) in row.iter_mut().zip(self.baseline_uvws(epoch, self.phase_centre)) {
                *uvw = bl_uvw;
            }
        }
        uvws
    }

    /// Rotate the visibilities so they are phased to `centre`.
    ///
    /// Unphased data are treated as having no geometric delay applied, phased data have their
    /// existing phasing undone first.
    pub fn phase(&mut self, centre: RADec) {
        trace!("start VisData::phase");
        let num_baselines = self.num_baselines();
        let delta_ws: Vec<Vec<f64>> = self
            .times
            .iter()
            .map(|&epoch| {
                let new_uvws = self.baseline_uvws(epoch, PhaseCentre::Phased(centre));
                let old_ws = match self.phase_centre {
                    PhaseCentre::Drift => vec![0.0; num_baselines],
                    old @ PhaseCentre::Phased(_) => self
                        .baseline_uvws(epoch, old)
                        .iter()
                        .map(|uvw| uvw.w)
                        .collect(),
                };
                new_uvws
                    .iter()
                    .zip(old_ws)
                    .map(|(new, old_w)| new.w - old_w)
                    .collect()
            })
            .collect();

        for (mut vis_timestep, ws) in self.vis.outer_iter_mut().zip(delta_ws) {
            for (mut vis_baseline, w) in vis_timestep.outer_iter_mut().zip(ws) {
                let mut vis_chans = vis_baseline.index_axis_mut(Axis(0), 0);
                for (mut vis_chan, &freq_hz) in vis_chans.outer_iter_mut().zip(&self.freqs_hz) {
                    let angle = -TAU * w * freq_hz / VEL_C;
                    let (sin_angle, cos_angle) = angle.sin_cos();
                    let rotation = Complex::new(cos_angle as f32, sin_angle as f32);
                    vis_chan.iter_mut().for_each(|v| *v *= rotation);
                }
            }
        }
        self.phase_centre = PhaseCentre::Phased(centre);
        debug!("phased to {}", centre);
        trace!("end VisData::phase");
    }
}

/// Visibility sets compare equal when their arrays match and their axes agree to within the
/// precision that survives a round trip through a file (times to a millisecond, frequencies
/// to a hertz, positions to a tenth of a millimetre).
impl PartialEq for VisData {
    fn eq(&self, other: &Self) -> bool {
        let pos_match = |l: XyzGeodetic, r: XyzGeodetic| {
            (l.x - r.x).abs() < 1e-4 && (l.y - r.y).abs() < 1e-4 && (l.z - r.z).abs() < 1e-4
        };
        self.vis == other.vis
            && self.flags == other.flags
            && self.nsamples == other.nsamples
            && times_match(&self.times, &other.times)
            && (self.int_time - other.int_time).abs() < Duration::from_milliseconds(TIME_TOLERANCE_MS)
            && self.baselines == other.baselines
            && freqs_match(&self.freqs_hz, &other.freqs_hz)
            && (self.channel_width_hz - other.channel_width_hz).abs() < FREQ_TOLERANCE_HZ
            && self.freqs_contiguous == other.freqs_contiguous
            && self.pols == other.pols
            && self.antennas.len() == other.antennas.len()
            && self
                .antennas
                .iter()
                .zip(&other.antennas)
                .all(|(l, r)| l.name == r.name && pos_match(l.position, r.position))
            && (self.array_pos.longitude_rad - other.array_pos.longitude_rad).abs() < 1e-9
            && (self.array_pos.latitude_rad - other.array_pos.latitude_rad).abs() < 1e-9
            && (self.array_pos.height_metres - other.array_pos.height_metres).abs() < 1e-3
            && phase_centres_match(self.phase_centre, other.phase_centre)
            && self.object_name == other.object_name
            && self.extra_keywords == other.extra_keywords
    }
}
