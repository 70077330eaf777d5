// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Non-fatal anomalies found during ingestion.
//!
//! These are collected and handed back to the caller alongside the
//! visibilities, and are also emitted with [`log::warn!`] as they are found.

use std::fmt::Display;

use log::warn;

/// A recoverable anomaly.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The metadata has no array location, the known MWA location is used.
    TelescopeLocationMissing,
    /// Fewer coarse channels were submitted than the metadata declares.
    MissingCoarseChannels {
        /// receiver channels declared in the metadata but not submitted
        missing: Vec<usize>,
    },
    /// The submitted coarse channels have gaps.
    NonContiguousCoarseChannels {
        /// receiver channels submitted, sorted
        submitted: Vec<usize>,
    },
    /// Cable corrections were requested, but the metadata says they are already applied.
    CableCorrectionAlreadyApplied,
    /// Cable corrections were not requested, and the metadata says they haven't been applied.
    CableCorrectionNotApplied,
    /// Flag files were submitted but will not be used.
    FlagFilesIgnored {
        /// how many flag files were ignored
        count: usize,
    },
    /// A flag file's coarse channel has no data files, so it was skipped.
    UnmatchedFlagFile {
        /// the flag file
        path: String,
        /// its `GPUBOXNO`
        gpubox: usize,
    },
    /// The selection can't be applied while reading, so it's applied afterwards.
    SelectOnReadFallback {
        /// why the selection can't be streamed
        reason: String,
    },
    /// Frequencies are not contiguous after concatenation.
    NonContiguousCombinedFreqs,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TelescopeLocationMissing => {
                write!(f, "telescope_location is not set. Using known values for MWA.")
            }
            Self::MissingCoarseChannels { missing } => write!(
                f,
                "some coarse channel files were not submitted: receiver channels {missing:?}"
            ),
            Self::NonContiguousCoarseChannels { submitted } => write!(
                f,
                "coarse channels are not contiguous for this observation: {submitted:?}"
            ),
            Self::CableCorrectionAlreadyApplied => write!(
                f,
                "cable length corrections were already applied to this observation, they will not be applied again"
            ),
            Self::CableCorrectionNotApplied => write!(
                f,
                "cable length corrections have not been applied to this observation"
            ),
            Self::FlagFilesIgnored { count } => write!(
                f,
                "mwaf files submitted with use_cotter_flags=False, ignoring {count} flag file(s)"
            ),
            Self::UnmatchedFlagFile { path, gpubox } => write!(
                f,
                "no data files for gpubox {gpubox} of flag file {path}, skipping it"
            ),
            Self::SelectOnReadFallback { reason } => write!(
                f,
                "Warning: select on read keyword set, but {reason}; falling back to select after read"
            ),
            Self::NonContiguousCombinedFreqs => write!(
                f,
                "Combined frequencies are not contiguous. This will make it impossible to write this data out to some file types."
            ),
        }
    }
}

/// An ordered list of [`Diagnostic`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Record a diagnostic, and log it.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.0.push(diagnostic);
    }

    /// Append all of `other`'s diagnostics, without logging them again.
    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Whether any diagnostic's message starts with `prefix`.
    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.0.iter().any(|d| d.to_string().starts_with(prefix))
    }

    /// Iterate over the diagnostics in the order they were found.
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// The number of diagnostics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no diagnostics.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_stable() {
        let mut diags = Diagnostics::default();
        diags.push(Diagnostic::TelescopeLocationMissing);
        diags.push(Diagnostic::MissingCoarseChannels { missing: vec![1] });
        diags.push(Diagnostic::FlagFilesIgnored { count: 2 });
        assert_eq!(diags.len(), 3);
        assert!(diags.contains_prefix("telescope_location is not set"));
        assert!(diags.contains_prefix("some coarse channel files were not submitted"));
        assert!(diags.contains_prefix("mwaf files submitted with use_cotter_flags=False"));
        assert!(!diags.contains_prefix("Combined frequencies are not contiguous"));
    }
}
