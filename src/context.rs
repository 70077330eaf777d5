// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Options for ingesting correlator files, and the pipeline that uses them.

use std::{fmt::Display, path::Path};

use derive_builder::Builder;
use log::{debug, info, trace};

use crate::{
    assembler::{GroupAxes, VisBuilder},
    classify::classify_files,
    constants::{DEFAULT_EDGE_WIDTH_HZ, DEFAULT_END_FLAG_S, DEFAULT_START_FLAG_S},
    corrections::correct_cable_lengths,
    diagnostics::{Diagnostic, Diagnostics},
    fileset::FileSet,
    flags::{flag_antennas, flag_windows, FlagWindows},
    io::{fits::CfitsioOpener, mwaf::apply_flag_files, FitsOpen},
    metadata::Metadata,
    selection::{SelectionSpec, VisSelection},
    vis::{ConcatAxis, Pol, VisData},
    IngestError,
};

/// The result of an ingestion: the visibilities, and everything that was odd about them.
#[derive(Debug, Clone)]
pub struct Ingestion {
    /// The combined, selected visibilities.
    pub vis: VisData,
    /// Non-fatal anomalies, in the order they were found.
    pub diagnostics: Diagnostics,
}

/// Options for ingesting correlator files.
#[derive(Builder, Debug, Clone)]
pub struct IngestContext {
    /// Whether cable length corrections are applied
    #[builder(default = "false")]
    pub correct_cable_len: bool,
    /// Whether the visibilities are phased to the pointing centre
    #[builder(default = "false")]
    pub phase_to_pointing_center: bool,
    /// Whether edge channels, the centre channel and start and end timesteps are flagged
    #[builder(default = "true")]
    pub flag_init: bool,
    /// Whether flags from submitted mwaf files are applied
    #[builder(default = "false")]
    pub use_cotter_flags: bool,
    /// Seconds flagged at the start of each file group, when `flag_init`
    #[builder(default = "DEFAULT_START_FLAG_S")]
    pub start_flag: f64,
    /// Seconds flagged at the end of each file group, when `flag_init`
    #[builder(default = "DEFAULT_END_FLAG_S")]
    pub end_flag: f64,
    /// Hz flagged at each edge of every coarse channel, when `flag_init`
    #[builder(default = "DEFAULT_EDGE_WIDTH_HZ")]
    pub edge_width: f64,
    /// Whether the centre fine channel of every coarse channel is flagged, when `flag_init`
    #[builder(default = "true")]
    pub flag_dc_offset: bool,
    /// What to keep
    #[builder(default)]
    pub selection: SelectionSpec,
    /// Whether to apply `selection` while reading, instead of afterwards
    #[builder(default = "false")]
    pub select_on_read: bool,
    /// The axis multiple file groups are joined along, inferred if `None`
    #[builder(default)]
    pub axis: Option<ConcatAxis>,
    /// Whether to draw progress bars
    #[builder(default = "false")]
    pub draw_progress: bool,
}

impl Default for IngestContext {
    fn default() -> Self {
        Self {
            correct_cable_len: false,
            phase_to_pointing_center: false,
            flag_init: true,
            use_cotter_flags: false,
            start_flag: DEFAULT_START_FLAG_S,
            end_flag: DEFAULT_END_FLAG_S,
            edge_width: DEFAULT_EDGE_WIDTH_HZ,
            flag_dc_offset: true,
            selection: SelectionSpec::default(),
            select_on_read: false,
            axis: None,
            draw_progress: false,
        }
    }
}

fn will(yes: bool) -> &'static str {
    if yes {
        "Will"
    } else {
        "Will not"
    }
}

impl Display for IngestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} correct cable lengths.", will(self.correct_cable_len))?;
        writeln!(
            f,
            "{} phase to the pointing centre.",
            will(self.phase_to_pointing_center)
        )?;
        if self.flag_init {
            writeln!(
                f,
                "Will flag {} s at the start, {} s at the end, and {} kHz at the edges of each coarse channel.",
                self.start_flag,
                self.end_flag,
                self.edge_width / 1e3
            )?;
            writeln!(f, "{} flag the centre channel.", will(self.flag_dc_offset))?;
        } else {
            writeln!(f, "Will not initialise flags.")?;
        }
        writeln!(f, "{} apply mwaf flags.", will(self.use_cotter_flags))?;
        if !self.selection.is_empty() {
            writeln!(
                f,
                "Will select {} reading.",
                if self.select_on_read {
                    "while"
                } else {
                    "after"
                }
            )?;
        }
        if let Some(axis) = self.axis {
            writeln!(f, "Will join file groups along the {axis} axis.")?;
        }
        Ok(())
    }
}

impl IngestContext {
    /// Ingest a single group of files from disk.
    ///
    /// # Errors
    ///
    /// See [`IngestContext::ingest_groups_with`].
    pub fn ingest<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Ingestion, IngestError> {
        self.ingest_groups_with(&CfitsioOpener, &[paths])
    }

    /// Ingest several groups of files from disk, joining them.
    ///
    /// # Errors
    ///
    /// See [`IngestContext::ingest_groups_with`].
    pub fn ingest_groups<P: AsRef<Path>, G: AsRef<[P]>>(
        &self,
        groups: &[G],
    ) -> Result<Ingestion, IngestError> {
        self.ingest_groups_with(&CfitsioOpener, groups)
    }

    /// Ingest several groups of files opened with `opener`, joining them along
    /// [`IngestContext::axis`].
    ///
    /// Each group is a complete file set of its own: data files, a metafits and/or ppds file,
    /// and optionally mwaf files. Groups are read independently, corrected, flagged and phased,
    /// then concatenated in the order given. The selection is applied while reading only when
    /// `select_on_read` is set, there is a single group, and the selection can be streamed;
    /// otherwise it is applied to the joined result.
    ///
    /// # Errors
    ///
    /// - [`IngestError::MissingInputKind`] if there are no groups, a group lacks data or
    ///   metadata files, or `use_cotter_flags` is set and a group has no flag files,
    /// - any error from classifying, validating or reading a group,
    /// - [`IngestError::IncompatibleConcatenation`] if groups can't be joined,
    /// - [`IngestError::EmptySelection`] if the selection leaves nothing.
    pub fn ingest_groups_with<O: FitsOpen, P: AsRef<Path>, G: AsRef<[P]>>(
        &self,
        opener: &O,
        groups: &[G],
    ) -> Result<Ingestion, IngestError> {
        trace!("start IngestContext::ingest_groups_with");
        debug!("ingesting {} file group(s) with options:\n{}", groups.len(), self);

        let mut diagnostics = Diagnostics::default();
        let wants_selection = !self.selection.is_empty();
        let stream_selection = if self.select_on_read && wants_selection {
            let obstacle = if groups.len() > 1 {
                Some("multiple file groups cannot be selected while reading")
            } else {
                self.selection.streaming_obstacle()
            };
            match obstacle {
                Some(reason) => {
                    diagnostics.push(Diagnostic::SelectOnReadFallback {
                        reason: reason.to_string(),
                    });
                    false
                }
                None => true,
            }
        } else {
            false
        };

        let mut joined: Option<VisData> = None;
        for (group_idx, group) in groups.iter().enumerate() {
            let mut group_diagnostics = Diagnostics::default();
            let vis = self.ingest_group(
                opener,
                group.as_ref(),
                stream_selection,
                &mut group_diagnostics,
            )?;
            debug!(
                "file group {group_idx} gave {} diagnostic(s)",
                group_diagnostics.len()
            );
            diagnostics.extend(group_diagnostics);
            joined = Some(match joined {
                None => vis,
                Some(left) => left.concatenate(&vis, self.axis, &mut diagnostics)?,
            });
        }
        let mut vis = joined.ok_or(IngestError::MissingInputKind { kind: "data files" })?;

        if wants_selection && !stream_selection {
            vis = vis.select(&self.selection)?;
        }

        info!(
            "ingested {} timesteps, {} baselines, {} channels, {} pols with {} diagnostic(s)",
            vis.num_times(),
            vis.num_baselines(),
            vis.num_chans(),
            vis.pols.len(),
            diagnostics.len()
        );
        trace!("end IngestContext::ingest_groups_with");
        Ok(Ingestion { vis, diagnostics })
    }

    /// Read, flag and correct one group of files.
    fn ingest_group<O: FitsOpen, P: AsRef<Path>>(
        &self,
        opener: &O,
        paths: &[P],
        stream_selection: bool,
        diagnostics: &mut Diagnostics,
    ) -> Result<VisData, IngestError> {
        trace!("start IngestContext::ingest_group");
        let files = classify_files(opener, paths)?;
        let metadata_path = files
            .metadata_source()
            .ok_or(IngestError::MissingInputKind {
                kind: "metafits file",
            })?;
        let mut metadata = Metadata::from_fits(opener, metadata_path, diagnostics)?;
        if let (Some(_), Some(ppds)) = (&files.metafits, &files.ppds) {
            metadata.merge_ppds(opener, ppds)?;
        }

        match (self.use_cotter_flags, files.flags.len()) {
            (true, 0) => return Err(IngestError::MissingInputKind { kind: "flag files" }),
            (false, count) if count > 0 => {
                diagnostics.push(Diagnostic::FlagFilesIgnored { count });
            }
            _ => (),
        }

        let file_set = FileSet::from_paths(opener, &files.data, &metadata, diagnostics)?;
        let axes = GroupAxes::new(&file_set, &metadata);

        // check windows before the expensive part
        let windows = if self.flag_init {
            Some(FlagWindows::new(
                self.edge_width,
                metadata.fine_chan_width_hz,
                self.start_flag,
                self.end_flag,
                metadata.int_time_ms as f64 / 1e3,
                self.flag_dc_offset,
            )?)
        } else {
            None
        };

        let selection = if stream_selection {
            self.selection
                .resolve(&axes.times, &axes.baselines, &axes.freqs_hz, &Pol::ALL)?
        } else {
            VisSelection::all(axes.times.len(), axes.baselines.len(), axes.freqs_hz.len())
        };

        let mut builder = VisBuilder::new(selection)?;
        builder.read_file_set(opener, &file_set, &metadata, self.draw_progress)?;

        flag_antennas(&mut builder, &axes, &metadata.flagged_antennas());
        if let Some(windows) = windows {
            flag_windows(&mut builder, &axes, &windows, file_set.num_fine_chans);
        }
        if self.use_cotter_flags {
            apply_flag_files(
                opener,
                &files.flags,
                &file_set,
                metadata.antennas.len(),
                &mut builder,
                diagnostics,
            )?;
        }

        let mut vis = builder.finalise(&axes, &metadata);
        if metadata.reconcile_cable_correction(self.correct_cable_len, diagnostics) {
            correct_cable_lengths(&mut vis, &metadata, self.draw_progress);
        }
        if self.phase_to_pointing_center {
            vis.phase(metadata.pointing_centre);
        }

        trace!("end IngestContext::ingest_group");
        Ok(vis)
    }
}
