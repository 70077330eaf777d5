// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur while ingesting correlator files.
//!
//! Every message starts with a stable prefix so callers can match on it.

use crate::io::error::IOError;
use cfg_if::cfg_if;
use thiserror::Error;

/// The broad category an [`IngestError`] falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The submitted files could not be sorted into a usable set of inputs.
    InputClassification,
    /// The inputs contradict each other.
    ConsistencyViolation,
    /// A flag window is not a multiple of the native resolution.
    FlagWindow,
    /// Something which is recognised but cannot be handled yet.
    UnsupportedFeature,
    /// File access or allocation failed.
    Io,
}

impl ErrorKind {
    /// The process exit code for a failure of this kind. `1` is left for command line errors.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::InputClassification => 2,
            Self::ConsistencyViolation => 3,
            Self::FlagWindow => 4,
            Self::UnsupportedFeature => 5,
            Self::Io => 6,
        }
    }
}

#[derive(Error, Debug)]
/// All the errors that can occur while ingesting visibilities
pub enum IngestError {
    /// A path has an extension which is not one of fits, metafits or mwaf.
    #[error("only fits, metafits, and mwaf files supported, got {path}")]
    UnsupportedExtension {
        /// The offending path
        path: String,
    },

    /// A required kind of input file is missing.
    #[error("no {kind} submitted")]
    MissingInputKind {
        /// What is missing, e.g. "data files"
        kind: &'static str,
    },

    /// More than one metadata file of the same kind was submitted.
    #[error("multiple {kind} files in filelist: {paths:?}")]
    AmbiguousMetadata {
        /// "metafits" or "ppds"
        kind: &'static str,
        /// All the paths of that kind
        paths: Vec<String>,
    },

    /// The metadata file is missing something or has a value we can't use.
    #[error("could not interpret metadata in {path}: {reason}")]
    BadMetadata {
        /// The metadata path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// A data file is missing something or has a value we can't use.
    #[error("could not interpret data file {path}: {reason}")]
    BadDataFile {
        /// The data file path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Files in a single group come from more than one observation.
    #[error("files from different observations submitted in the same list: {obsids:?}")]
    CrossObservation {
        /// The distinct observation ids found
        obsids: Vec<u32>,
    },

    /// Files in a single group disagree on the number of fine channels.
    #[error("files submitted have different fine channel numbers: {found}")]
    InconsistentFineChannels {
        /// A description of the channel counts per file
        found: String,
    },

    /// A file starts at a time which is off the integration grid.
    #[error("coarse channel start times are misaligned by {offset_ms} ms in {path}, which is not a multiple of the integration time ({int_time_ms} ms)")]
    MisalignedStart {
        /// The data file path
        path: String,
        /// Offset from the earliest start time, in milliseconds
        offset_ms: u64,
        /// Integration time in milliseconds
        int_time_ms: u64,
    },

    /// A data file is for a coarse channel the metadata doesn't know about.
    #[error("coarse channel {number} of {path} is not in the metadata channel list {known:?}")]
    UnknownCoarseChannel {
        /// The data file path
        path: String,
        /// The gpubox / receiver channel number from the file
        number: usize,
        /// The receiver channels listed in the metadata
        known: Vec<usize>,
    },

    /// Two visibility sets can't be joined along the requested axis.
    #[error("incompatible concatenation along {axis} axis: {reason}")]
    IncompatibleConcatenation {
        /// The axis of concatenation
        axis: String,
        /// Why they are incompatible
        reason: String,
    },

    /// A selection doesn't intersect the available data.
    #[error("selection leaves no {axis} to read")]
    EmptySelection {
        /// The axis which is empty after selection
        axis: &'static str,
    },

    /// A flag window is not an exact multiple of the native resolution.
    #[error("The {parameter} must be an integer multiple of the {resolution}, got {value} for {resolution} {step}")]
    InexactFlagWindow {
        /// The name of the parameter, e.g. "edge_width"
        parameter: &'static str,
        /// The name of the resolution, e.g. "channel_width"
        resolution: &'static str,
        /// The value of the parameter
        value: f64,
        /// The value of the resolution
        step: f64,
    },

    /// Something we recognise but don't handle.
    #[error("{feature}")]
    UnsupportedFeature {
        /// A description, starting with what is unsupported
        feature: String,
    },

    /// Not enough memory for the visibility arrays.
    #[error("Insufficient memory available; need {need_gib} GiB of memory.\nPlease specify a smaller selection.")]
    InsufficientMemory {
        /// The amount of memory we think we need
        need_gib: usize,
    },

    /// An array didn't have the shape it should have.
    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    BadArrayShape {
        /// The argument name within the funciton
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    /// Error derived from [`IOError`]
    #[error(transparent)]
    Io(#[from] IOError),

    #[cfg(feature = "cli")]
    /// Error derived from [`clap::Error`]
    #[error(transparent)]
    ClapError(#[from] clap::Error),

    #[cfg(feature = "cli")]
    /// A command line argument parsed, but has a value we can't use.
    #[error("Invalid Command Line Argument {option}. Expected {expected}, received {received}")]
    InvalidCommandLineArgument {
        /// The argument name, e.g. "--flag-edge-width <KHZ>"
        option: String,
        /// What was expected
        expected: String,
        /// What was received instead
        received: String,
    },

    #[cfg(feature = "cli")]
    /// Not an error, the summary was printed and nothing else is to be done.
    #[error("Dry run")]
    DryRun {},
}

impl IngestError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedExtension { .. }
            | Self::MissingInputKind { .. }
            | Self::AmbiguousMetadata { .. }
            | Self::BadMetadata { .. }
            | Self::BadDataFile { .. } => ErrorKind::InputClassification,
            Self::CrossObservation { .. }
            | Self::InconsistentFineChannels { .. }
            | Self::MisalignedStart { .. }
            | Self::UnknownCoarseChannel { .. }
            | Self::IncompatibleConcatenation { .. }
            | Self::EmptySelection { .. }
            | Self::BadArrayShape { .. } => ErrorKind::ConsistencyViolation,
            Self::InexactFlagWindow { .. } => ErrorKind::FlagWindow,
            Self::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            Self::InsufficientMemory { .. } | Self::Io(_) => ErrorKind::Io,
            #[cfg(feature = "cli")]
            Self::ClapError(_) | Self::InvalidCommandLineArgument { .. } | Self::DryRun {} => {
                ErrorKind::InputClassification
            }
        }
    }
}

cfg_if! {
    if #[cfg(test)] {
        impl IngestError {
            /// Whether this error's message starts with `prefix`.
            pub(crate) fn has_prefix(&self, prefix: &str) -> bool {
                self.to_string().starts_with(prefix)
            }
        }
    }
}
