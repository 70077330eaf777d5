// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Corrfits ingests the raw FITS file sets written by the Murchison Widefield Array (MWA)
//! correlator into a single canonical visibility array, reconciling the observation metadata with
//! the submitted data files on the way.
//!
//! # Examples
//!
//! Here's an example of how to read a legacy observation, phase it to its pointing centre, and
//! write it out to uvfits.
//!
//! ```rust,no_run
//! use corrfits::{IngestContextBuilder, Ingestion, UvfitsWriter};
//!
//! let paths = vec![
//!     "1131733552.metafits",
//!     "1131733552_20151116194519_gpubox01_00.fits",
//!     "1131733552_20151116194519_gpubox02_00.fits",
//! ];
//!
//! let context = IngestContextBuilder::default()
//!     .correct_cable_len(true)
//!     .phase_to_pointing_center(true)
//!     .build()
//!     .unwrap();
//!
//! let Ingestion { vis, diagnostics } = context.ingest(&paths).unwrap();
//! for diagnostic in &diagnostics {
//!     println!("{diagnostic}");
//! }
//!
//! UvfitsWriter::write_vis_data("1131733552.uvfits", &vis, None).unwrap();
//! ```
//!
//! # Details
//!
//! Files are read through the [`io::FitsOpen`] trait: [`io::CfitsioOpener`] reads from disk with
//! cfitsio, and tests read from an in-memory store. An ingestion goes through these steps for each
//! group of files:
//!
//! - [`classify`] sorts paths into data, metafits, ppds and flag files,
//! - [`metadata`] reads the antennas, channels and timing of the observation,
//! - [`fileset`] validates the data files against the metadata,
//! - [`assembler`] decodes the correlator blocks into canonical order,
//! - [`flags`] initialises flags, and [`io::mwaf`] ORs in flags from cotter flag files,
//! - [`corrections`] applies cable length corrections.
//!
//! Groups are then joined with [`VisData::concatenate`], and the selection is applied.

pub mod assembler;
pub mod classify;
pub mod constants;
pub mod context;
pub mod corrections;
pub mod diagnostics;
pub mod error;
pub mod fileset;
pub mod flags;
pub mod io;
pub mod metadata;
pub mod selection;
mod util;
pub mod vis;

#[cfg(feature = "cli")]
pub mod cli;

pub use context::{IngestContext, IngestContextBuilder, Ingestion};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{ErrorKind, IngestError};
pub use io::{read_uvfits, UvfitsWriter};
pub use selection::SelectionSpec;
pub use vis::{ConcatAxis, PhaseCentre, Pol, VisData};

pub use marlu;

#[cfg(test)]
pub(crate) mod test_common;
