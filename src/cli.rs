// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command Line Interface helpers for corrfits

use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    str::FromStr,
    time::Instant,
};

use clap::{
    arg, command,
    ErrorKind::{ArgumentNotFound, DisplayHelp, DisplayVersion},
    PossibleValue,
    ValueHint::FilePath,
};
use log::{debug, info, trace};
use prettytable::{format as prettyformat, row, table};

use crate::{
    context::{IngestContext, IngestContextBuilder, Ingestion},
    error::IngestError::{self, DryRun, InvalidCommandLineArgument},
    io::UvfitsWriter,
    marlu::hifitime::Epoch,
    selection::SelectionSpec,
    vis::{ConcatAxis, Pol, VisData},
};

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (GIT_HEAD_REF, GIT_COMMIT_HASH) {
        (Some(hr), Some(hash)) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                hash,
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {}", hr)?;
        }
        _ => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {}", BUILT_TIME_UTC)?;
    writeln!(f, "         with compiler {}", RUSTC_VERSION)?;
    writeln!(f)?;
    Ok(())
}

fn utc_time(epoch: Epoch) -> (String, String) {
    let (y, mo, d, h, mi, s, ns) = epoch.to_gregorian_utc();
    (
        format!("{:02}-{:02}-{:02}", y, mo, d),
        format!(
            "{:02}:{:02}:{:02}.{:03}",
            h,
            mi,
            s,
            (ns as f64 / 1e6).round()
        ),
    )
}

/// Args for ingesting one or more groups of correlator files.
pub struct CorrfitsContext {
    /// Groups of input paths, each a complete file set
    pub groups: Vec<Vec<String>>,
    /// Ingestion parameters
    pub ingest_ctx: IngestContext,
    /// Where to write uvfits, if anywhere
    pub uvfits_out: Option<String>,
    /// The command line, quoted, for the uvfits history
    pub history: String,
}

impl Display for CorrfitsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        let mut group_table = table!(["", "path"]);
        group_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for (group_idx, group) in self.groups.iter().enumerate() {
            for path in group {
                group_table.add_row(row![r => format!("g{}:", group_idx), path]);
            }
        }
        writeln!(
            f,
            "Input details (groups={}, files={}):\n{}",
            self.groups.len(),
            self.groups.iter().map(Vec::len).sum::<usize>(),
            group_table
        )?;

        if let Some(uvfits_out) = &self.uvfits_out {
            writeln!(f, "uvfits output:        {}", uvfits_out)?;
        }

        writeln!(f, "Ingest Context: \n{}", &self.ingest_ctx)?;

        Ok(())
    }
}

/// A human readable summary of ingested visibilities.
pub struct VisSummary<'a>(pub &'a VisData);

impl Display for VisSummary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vis = self.0;
        writeln!(f, "object name:          {}", vis.object_name)?;
        writeln!(f, "Array position:       {}", vis.array_pos)?;
        writeln!(f, "Phase centre:         {:?}", vis.phase_centre)?;

        let num_flagged = |t: usize| {
            vis.flags
                .index_axis(crate::marlu::ndarray::Axis(0), t)
                .iter()
                .filter(|&&flag| flag)
                .count()
        };
        let samples_per_timestep = vis.num_baselines() * vis.num_chans() * vis.pols.len();

        if let Some(&first) = vis.times.first() {
            let (date, _) = utc_time(first);
            let mut timestep_table = table!([
                "",
                format!("{} UTC +", date),
                "gps [s]",
                "flagged"
            ]);
            timestep_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
            for (timestep_idx, &epoch) in vis.times.iter().enumerate() {
                let (_, time) = utc_time(epoch);
                timestep_table.add_row(row![r =>
                    format!("ts{}:", timestep_idx),
                    time,
                    format!("{:.3}", epoch.to_gpst_seconds()),
                    format!(
                        "{:.1}%",
                        100.0 * num_flagged(timestep_idx) as f64 / samples_per_timestep.max(1) as f64
                    )
                ]);
            }
            writeln!(
                f,
                "Timestep details (count={}, integration={:.3}s):\n{}",
                vis.num_times(),
                vis.int_time.to_seconds(),
                timestep_table
            )?;
        }

        if let (Some(first), Some(last)) = (vis.freqs_hz.first(), vis.freqs_hz.last()) {
            writeln!(
                f,
                "Channel details (count={}, width={:.3}kHz, first={:.4}MHz, last={:.4}MHz{})",
                vis.num_chans(),
                vis.channel_width_hz / 1e3,
                first / 1e6,
                last / 1e6,
                if vis.freqs_contiguous {
                    ""
                } else {
                    ", not contiguous"
                }
            )?;
        }

        writeln!(
            f,
            "Baseline details (count={}, antennas={}, pols={})",
            vis.num_baselines(),
            vis.antennas.len(),
            vis.pols
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        )?;

        writeln!(
            f,
            "Memory used          = {:5}ts * {:6}ch * {:6}bl * {:1}pol * ({}<c32> + {}<f32> + {}<bool>) = {:7.02} GiB",
            vis.num_times(),
            vis.num_chans(),
            vis.num_baselines(),
            vis.pols.len(),
            std::mem::size_of::<crate::marlu::Complex<f32>>(),
            std::mem::size_of::<f32>(),
            std::mem::size_of::<bool>(),
            (vis.vis.len()
                * (std::mem::size_of::<crate::marlu::Complex<f32>>()
                    + std::mem::size_of::<f32>()
                    + std::mem::size_of::<bool>())) as f64
                / 1024.0_f64.powi(3)
        )?;

        Ok(())
    }
}

/// Parse a single optional value, `None` if the argument wasn't given.
fn value_of_opt<T>(matches: &clap::ArgMatches, name: &str) -> Result<Option<T>, IngestError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    match matches.value_of_t::<T>(name) {
        Ok(value) => Ok(Some(value)),
        Err(err) => match err.kind() {
            ArgumentNotFound { .. } => Ok(None),
            _ => Err(err.into()),
        },
    }
}

/// Parse all values of an optional argument, `None` if the argument wasn't given.
fn values_of_opt<T>(matches: &clap::ArgMatches, name: &str) -> Result<Option<Vec<T>>, IngestError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    match matches.values_of_t::<T>(name) {
        Ok(values) => Ok(Some(values)),
        Err(err) => match err.kind() {
            ArgumentNotFound { .. } => Ok(None),
            _ => Err(err.into()),
        },
    }
}

/// Parse an inclusive `<FROM> <TO>` pair.
fn range_of_opt(
    matches: &clap::ArgMatches,
    name: &str,
    option: &str,
) -> Result<Option<(f64, f64)>, IngestError> {
    match values_of_opt::<f64>(matches, name)? {
        Some(values) => match values[..] {
            [from, to] if from <= to => Ok(Some((from, to))),
            _ => Err(InvalidCommandLineArgument {
                option: option.into(),
                expected: "from <= to".into(),
                received: format!("{:?}", values),
            }),
        },
        None => Ok(None),
    }
}

impl CorrfitsContext {
    #[allow(clippy::cognitive_complexity)]
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, IngestError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Ingest Murchison Widefield Array MetaFITS and correlator FITS file sets \
                    into a single visibility dataset.")
            .args(&[
                // input options
                arg!(paths: [PATHS]... "Data, metafits, ppds and mwaf files of a single group")
                    .help_heading("INPUT")
                    .value_hint(FilePath)
                    .required(false),
                arg!(-g --group <PATHS> "A comma separated group of files, repeat for more groups")
                    .help_heading("INPUT")
                    .multiple_occurrences(true)
                    .required(false),
                arg!(--axis <AXIS> "Axis to join groups along, inferred if not given")
                    .help_heading("INPUT")
                    .possible_values([
                        PossibleValue::new("time"),
                        PossibleValue::new("freq"),
                    ])
                    .required(false),

                // processing options
                arg!(--"correct-cable-len" "Apply cable length corrections"),
                arg!(--"phase-pointing" "Phase to the pointing centre from the metadata"),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),

                // selection options
                arg!(--"sel-time" "GPS time range (inclusive) to select")
                    .help_heading("SELECTION")
                    .value_names(&["FROM", "TO"])
                    .required(false),
                arg!(--"sel-times" <GPS>... "GPS times to select")
                    .help_heading("SELECTION")
                    .multiple_values(true)
                    .required(false),
                arg!(--"sel-ants" <ANTS>... "Antenna indices to select")
                    .help_heading("SELECTION")
                    .multiple_values(true)
                    .required(false),
                arg!(--"sel-freq" "Frequency range [MHz] (inclusive) to select")
                    .help_heading("SELECTION")
                    .value_names(&["FROM", "TO"])
                    .required(false),
                arg!(--"sel-freqs" <MHZ>... "Channel frequencies [MHz] to select")
                    .help_heading("SELECTION")
                    .multiple_values(true)
                    .required(false),
                arg!(--"sel-pols" <POLS>... "Polarisations to select, e.g. XX YY")
                    .help_heading("SELECTION")
                    .multiple_values(true)
                    .required(false),
                arg!(--"select-on-read" "Apply the selection while reading, where possible")
                    .help_heading("SELECTION"),

                // flagging options
                arg!(--"no-flag-init" "Do not flag edge channels, centre channels, or start and end times")
                    .help_heading("FLAGGING"),
                arg!(--"flag-start" <SECONDS> "Flag <SECONDS> at the start of each group")
                    .help_heading("FLAGGING")
                    .required(false),
                arg!(--"flag-end" <SECONDS> "Flag <SECONDS> at the end of each group")
                    .help_heading("FLAGGING")
                    .required(false),
                arg!(--"flag-edge-width" <KHZ> "Flag bandwidth [kHz] at the ends of each coarse chan")
                    .help_heading("FLAGGING")
                    .required(false),
                arg!(--"no-flag-dc" "Do not flag DC centre chans")
                    .help_heading("FLAGGING"),
                arg!(--"use-cotter-flags" "Apply flags from the submitted mwaf files")
                    .help_heading("FLAGGING"),

                // output options
                arg!(-u --"uvfits-out" <PATH> "Path for uvfits output")
                    .help_heading("OUTPUT")
                    .value_hint(FilePath)
                    .required(false),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_group_matches(matches: &clap::ArgMatches) -> Result<Vec<Vec<String>>, IngestError> {
        let mut groups = vec![];
        if let Some(paths) = matches.values_of("paths") {
            groups.push(paths.map(Into::into).collect());
        }
        if let Some(group_args) = matches.values_of("group") {
            for group_arg in group_args {
                let group: Vec<String> = group_arg
                    .split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(Into::into)
                    .collect();
                if group.is_empty() {
                    return Err(InvalidCommandLineArgument {
                        option: "--group <PATHS>".into(),
                        expected: "a comma separated list of paths".into(),
                        received: format!("{:?}", group_arg),
                    });
                }
                groups.push(group);
            }
        }
        if groups.is_empty() {
            return Err(IngestError::MissingInputKind { kind: "data files" });
        }
        Ok(groups)
    }

    fn parse_sel_matches(matches: &clap::ArgMatches) -> Result<SelectionSpec, IngestError> {
        let gps_epoch = Epoch::from_gpst_seconds;
        Ok(SelectionSpec {
            time_range: range_of_opt(matches, "sel-time", "--sel-time <FROM> <TO>")?
                .map(|(from, to)| (gps_epoch(from), gps_epoch(to))),
            times: values_of_opt::<f64>(matches, "sel-times")?
                .map(|times| times.into_iter().map(gps_epoch).collect()),
            antennas: values_of_opt::<usize>(matches, "sel-ants")?,
            freq_range: range_of_opt(matches, "sel-freq", "--sel-freq <FROM> <TO>")?
                .map(|(from, to)| (from * 1e6, to * 1e6)),
            frequencies: values_of_opt::<f64>(matches, "sel-freqs")?
                .map(|freqs| freqs.into_iter().map(|f| f * 1e6).collect()),
            polarizations: values_of_opt::<Pol>(matches, "sel-pols")?,
        })
    }

    fn parse_ingest_matches(matches: &clap::ArgMatches) -> Result<IngestContext, IngestError> {
        let mut builder = IngestContextBuilder::default();
        builder
            .correct_cable_len(matches.is_present("correct-cable-len"))
            .phase_to_pointing_center(matches.is_present("phase-pointing"))
            .flag_init(!matches.is_present("no-flag-init"))
            .flag_dc_offset(!matches.is_present("no-flag-dc"))
            .use_cotter_flags(matches.is_present("use-cotter-flags"))
            .select_on_read(matches.is_present("select-on-read"))
            .draw_progress(!matches.is_present("no-draw-progress"))
            .selection(Self::parse_sel_matches(matches)?)
            .axis(value_of_opt::<ConcatAxis>(matches, "axis")?);
        for (name, option) in [
            ("flag-start", "--flag-start <SECONDS>"),
            ("flag-end", "--flag-end <SECONDS>"),
            ("flag-edge-width", "--flag-edge-width <KHZ>"),
        ] {
            if let Some(value) = value_of_opt::<f64>(matches, name)? {
                if value < 0.0 || !value.is_finite() {
                    return Err(InvalidCommandLineArgument {
                        option: option.into(),
                        expected: "a non-negative number".into(),
                        received: value.to_string(),
                    });
                }
                match name {
                    "flag-start" => builder.start_flag(value),
                    "flag-end" => builder.end_flag(value),
                    _ => builder.edge_width(value * 1e3),
                };
            }
        }
        builder.build().map_err(|e| InvalidCommandLineArgument {
            option: "<OPTIONS>".into(),
            expected: "a complete set of options".into(),
            received: e.to_string(),
        })
    }

    /// Parse an iterator of arguments, `args` into a `CorrfitsContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `IngestError::InvalidCommandLineArgument` if the arguments are invalid.
    /// - `IngestError::MissingInputKind` if no files are given.
    /// - `IngestError::DryRun` once the summary is printed, if `--dry-run` is given.
    pub fn from_args<I, T>(args: I) -> Result<Self, IngestError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let words: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let history = shlex::try_join(words.iter().map(String::as_str))
            .unwrap_or_else(|_| words.join(" "));

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let result = Self {
            groups: Self::parse_group_matches(&matches)?,
            ingest_ctx: Self::parse_ingest_matches(&matches)?,
            uvfits_out: matches.value_of("uvfits-out").map(Into::into),
            history,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Ingest every group, and write uvfits if asked to.
    ///
    /// # Errors
    ///
    /// can raise:
    /// - any ingestion error
    /// - `IngestError::UnsupportedFeature` if the result can't be written to uvfits.
    pub fn run(self) -> Result<Ingestion, IngestError> {
        trace!("start CorrfitsContext::run");
        let CorrfitsContext {
            groups,
            ingest_ctx,
            uvfits_out,
            history,
        } = self;

        let start = Instant::now();
        let ingestion = ingest_ctx.ingest_groups(&groups)?;
        info!("read duration: {:?}", start.elapsed());
        info!("{}", VisSummary(&ingestion.vis));

        if let Some(uvfits_out) = uvfits_out {
            let start = Instant::now();
            UvfitsWriter::write_vis_data(&uvfits_out, &ingestion.vis, Some(&history))?;
            info!("wrote {} in {:?}", uvfits_out, start.elapsed());
        }

        trace!("end CorrfitsContext::run");
        Ok(ingestion)
    }
}

/// Parse `args`, ingest, and write outputs, returning a process exit code.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    I: Debug,
{
    let corrfits_ctx = match CorrfitsContext::from_args(args) {
        Ok(corrfits_ctx) => corrfits_ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be read.");
            return 0;
        }
        Err(IngestError::ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match corrfits_ctx.run() {
        Ok(ingestion) => {
            for diagnostic in &ingestion.diagnostics {
                info!("diagnostic: {}", diagnostic);
            }
            0
        }
        Err(e) => {
            eprintln!("ingestion error: {e}");
            e.kind().exit_code()
        }
    }
}
