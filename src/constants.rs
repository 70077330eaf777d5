// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All floating point constants *must* be double precision.

/// Width of an MWA coarse channel in Hz.
pub const COARSE_CHAN_WIDTH_HZ: f64 = 1_280_000.0;

/// Number of instrumental polarisations in the canonical array.
pub const NUM_POLS: usize = 4;

/// Number of floats in a single raw correlator product (real, imaginary).
pub const FLOATS_PER_PRODUCT: usize = 2;

/// Default duration (seconds) to flag at the start of an observation.
pub const DEFAULT_START_FLAG_S: f64 = 2.0;

/// Default duration (seconds) to flag at the end of an observation.
pub const DEFAULT_END_FLAG_S: f64 = 2.0;

/// Default width (Hz) to flag at each edge of a coarse channel.
pub const DEFAULT_EDGE_WIDTH_HZ: f64 = 80e3;

/// Receiver channels up to and including this one are in ascending gpubox
/// order on the legacy correlator, those above it are reversed.
pub const LEGACY_CHANNEL_REVERSAL: usize = 128;

/// The legacy fine PFB reorders inputs in groups of this many.
pub const LEGACY_PFB_INPUTS: usize = 64;

/// Relative tolerance used when checking a flag window is a whole number of
/// steps.
pub const WINDOW_TOLERANCE: f64 = 1e-9;

/// Primary header keys which are carried into a dataset's extra keywords when
/// they appear in the metadata or ppds file.
pub const PROVENANCE_KEYS: &[&str] = &[
    "PROJECT", "EXPOSURE", "MODE", "CENTCHAN", "CABLEDEL", "MWAVER", "MWADATE",
];

/// Frequencies closer than this (Hz) are considered the same channel.
pub const FREQ_TOLERANCE_HZ: f64 = 1.0;

/// Times closer than this (milliseconds) are considered the same timestep.
pub const TIME_TOLERANCE_MS: f64 = 1.0;
