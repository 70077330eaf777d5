// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading instrument configuration from a metafits (or ppds) file.
//!
//! The metafits is parsed by mwalib's [`MetafitsContext`]; this module keeps the parts the
//! ingestion pipeline needs, plus the provenance keys carried through to output files.
//!
//! Each antenna has two correlator inputs (X and Y). The legacy correlator writes its products
//! in the order the inputs leave the fine PFB, which is neither input nor antenna order;
//! [`RfInput::pfb_position`] records where each input lands.

use std::{collections::BTreeMap, path::Path};

use log::{debug, trace};
use marlu::{
    mwalib::{CableDelaysApplied, MWAVersion, MetafitsContext, Pol},
    LatLngHeight, RADec, XyzGeodetic, ENH,
};

use crate::{
    constants::{COARSE_CHAN_WIDTH_HZ, LEGACY_CHANNEL_REVERSAL, PROVENANCE_KEYS},
    diagnostics::{Diagnostic, Diagnostics},
    io::fits::{get_optional_key, FitsOpen, FitsRead},
    IngestError,
};

/// Which of an antenna's two feeds a correlator input is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedPol {
    /// The X (east-west) dipoles.
    X = 0,
    /// The Y (north-south) dipoles.
    Y = 1,
}

impl From<Pol> for FeedPol {
    fn from(pol: Pol) -> Self {
        match pol {
            Pol::X => Self::X,
            Pol::Y => Self::Y,
        }
    }
}

/// Which generation of correlator produced the data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorVersion {
    /// The legacy (pre-2021) correlator, `gpuboxNN_BB.fits` files.
    Legacy,
    /// The MWAX correlator, `_chNNN_BBB.fits` files.
    Mwax,
}

/// A correlator input: which antenna, which feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfInput {
    /// Index into [`Metadata::antennas`].
    pub ant: usize,
    /// The feed.
    pub pol: FeedPol,
    /// Where this input comes out of the legacy fine PFB.
    pub pfb_position: usize,
}

/// An antenna (tile) from the metafits.
#[derive(Debug, Clone, PartialEq)]
pub struct Antenna {
    /// Antenna index, from zero.
    pub index: usize,
    /// The tile id.
    pub tile_number: u32,
    /// The tile name, e.g. `Tile011`.
    pub name: String,
    /// Position relative to the array centre.
    pub enh: ENH,
    /// `enh` converted to geodetic XYZ at the array latitude.
    pub position: XyzGeodetic,
    /// Electrical lengths of the X and Y signal paths \[m\].
    pub cable_lengths_m: [f64; 2],
    /// Whether either input is flagged.
    pub flagged: bool,
}

/// Everything the ingestion pipeline needs to know about an observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Where this was read from.
    pub path: String,
    /// The observation id (`GPSTIME`).
    pub obsid: u32,
    /// The correlator the metafits `MODE` says produced the data.
    pub version: CorrelatorVersion,
    /// Correlator integration time in milliseconds (`INTTIME`).
    pub int_time_ms: u64,
    /// Fine channel width in Hz (`FINECHAN`).
    pub fine_chan_width_hz: f64,
    /// Receiver channel numbers of all coarse channels (`CHANNELS`), ascending.
    pub coarse_chans: Vec<usize>,
    /// Where the tiles were pointed (`RA`, `DEC`).
    pub pointing_centre: RADec,
    /// The phase centre, if one is given (`RAPHASE`, `DECPHASE`).
    pub phase_centre: Option<RADec>,
    /// Location of the array centre.
    pub array_pos: LatLngHeight,
    /// `CABLEDEL`: whether cable delays are already applied, if the key is present.
    pub cable_delays_applied: Option<bool>,
    /// Antennas, by index.
    pub antennas: Vec<Antenna>,
    /// Correlator inputs, by input number.
    pub inputs: Vec<RfInput>,
    /// Observation name (`FILENAME`).
    pub object_name: String,
    /// Provenance keywords carried through to output files.
    pub extra_keywords: BTreeMap<String, String>,
}

fn read_provenance<R: FitsRead>(
    reader: &mut R,
    extra_keywords: &mut BTreeMap<String, String>,
) -> Result<(), IngestError> {
    for &key in PROVENANCE_KEYS {
        if let Some(value) = reader.read_key(0, key)? {
            extra_keywords.insert(key.to_string(), value);
        }
    }
    Ok(())
}

impl Metadata {
    /// Parse a metafits (or ppds) file.
    ///
    /// The array location is taken from `LATITUDE` and `LONGITUD` when both are present. Real
    /// metafits files don't carry them (`ALTITUDE` is the pointing altitude), so usually this
    /// produces [`Diagnostic::TelescopeLocationMissing`] and the known MWA location is used.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::BadMetadata`] if mwalib can't make sense of the file, or if
    /// its antennas and inputs are inconsistent.
    pub fn from_fits<O: FitsOpen>(
        opener: &O,
        path: &Path,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, IngestError> {
        trace!("start Metadata::from_fits");

        let path_str = path.display().to_string();
        let bad = |reason: String| IngestError::BadMetadata {
            path: path_str.clone(),
            reason,
        };
        let context = opener.open_metafits(path).map_err(|e| bad(e.to_string()))?;
        let version = match context.mwa_version {
            Some(MWAVersion::CorrLegacy | MWAVersion::CorrOldLegacy) => CorrelatorVersion::Legacy,
            Some(MWAVersion::CorrMWAXv2) => CorrelatorVersion::Mwax,
            other => {
                return Err(bad(format!(
                    "MODE {} is not a correlator mode ({other:?})",
                    context.mode
                )))
            }
        };

        let mut coarse_chans: Vec<usize> = context
            .metafits_coarse_chans
            .iter()
            .map(|c| c.rec_chan_number)
            .collect();
        coarse_chans.sort_unstable();
        if coarse_chans.is_empty() {
            return Err(bad("CHANNELS is empty".to_string()));
        }
        if context.corr_int_time_ms == 0 {
            return Err(bad("INTTIME is not positive".to_string()));
        }

        let phase_centre = match (
            context.ra_phase_center_degrees,
            context.dec_phase_center_degrees,
        ) {
            (Some(ra), Some(dec)) => Some(RADec::from_degrees(ra, dec)),
            _ => None,
        };

        // mwalib doesn't say whether CABLEDEL was present, only what it implies.
        let mut reader = opener.open(path)?;
        let cable_delays_applied = reader.read_key(0, "CABLEDEL")?.map(|_| {
            !matches!(
                context.cable_delays_applied,
                CableDelaysApplied::NoCableDelaysApplied
            )
        });
        let array_pos = match (
            get_optional_key::<f64, _>(&mut reader, 0, "LATITUDE")?,
            get_optional_key::<f64, _>(&mut reader, 0, "LONGITUD")?,
        ) {
            (Some(lat), Some(lng)) => LatLngHeight {
                longitude_rad: lng.to_radians(),
                latitude_rad: lat.to_radians(),
                height_metres: LatLngHeight::mwa().height_metres,
            },
            _ => {
                diagnostics.push(Diagnostic::TelescopeLocationMissing);
                LatLngHeight::mwa()
            }
        };

        let mut extra_keywords = BTreeMap::new();
        extra_keywords.insert("OBSID".to_string(), context.obs_id.to_string());
        read_provenance(&mut reader, &mut extra_keywords)?;

        let (antennas, inputs) = Self::antennas_and_inputs(&context, array_pos, &bad)?;

        let metadata = Self {
            path: path_str.clone(),
            obsid: context.obs_id,
            version,
            int_time_ms: context.corr_int_time_ms,
            fine_chan_width_hz: context.corr_fine_chan_width_hz as f64,
            coarse_chans,
            pointing_centre: RADec::from_degrees(
                context.ra_tile_pointing_degrees,
                context.dec_tile_pointing_degrees,
            ),
            phase_centre,
            array_pos,
            cable_delays_applied,
            antennas,
            inputs,
            object_name: context.obs_name.clone(),
            extra_keywords,
        };
        debug!(
            "obsid {} ({:?}) has {} antennas, {} coarse channels, {} ms integrations",
            metadata.obsid,
            metadata.version,
            metadata.antennas.len(),
            metadata.coarse_chans.len(),
            metadata.int_time_ms
        );

        trace!("end Metadata::from_fits");
        Ok(metadata)
    }

    fn antennas_and_inputs<F: Fn(String) -> IngestError>(
        context: &MetafitsContext,
        array_pos: LatLngHeight,
        bad: &F,
    ) -> Result<(Vec<Antenna>, Vec<RfInput>), IngestError> {
        let num_inputs = context.rf_inputs.len();
        if context.antennas.is_empty() || num_inputs != 2 * context.antennas.len() {
            return Err(bad(format!(
                "{} inputs for {} antennas, expected two per antenna",
                num_inputs,
                context.antennas.len()
            )));
        }

        let mut antennas = Vec::with_capacity(context.antennas.len());
        for (index, ant) in context.antennas.iter().enumerate() {
            if ant.ant as usize != index
                || ant.rfinput_x.pol != Pol::X
                || ant.rfinput_y.pol != Pol::Y
            {
                return Err(bad(format!(
                    "antenna {} ({}) does not have an X and a Y input",
                    index, ant.tile_name
                )));
            }
            let enh = ENH {
                e: ant.east_m,
                n: ant.north_m,
                h: ant.height_m,
            };
            antennas.push(Antenna {
                index,
                tile_number: ant.tile_id,
                name: ant.tile_name.trim().to_string(),
                enh,
                position: enh.to_xyz(array_pos.latitude_rad),
                cable_lengths_m: [
                    ant.rfinput_x.electrical_length_m,
                    ant.rfinput_y.electrical_length_m,
                ],
                flagged: ant.rfinput_x.flagged || ant.rfinput_y.flagged,
            });
        }

        let mut inputs: Vec<Option<RfInput>> = vec![None; num_inputs];
        for rf in &context.rf_inputs {
            let input = rf.input as usize;
            let ant = rf.ant as usize;
            if input >= num_inputs || inputs[input].is_some() {
                return Err(bad(format!("bad or repeated input number {input}")));
            }
            if ant >= antennas.len() {
                return Err(bad(format!(
                    "input {input} is on antenna {ant}, out of range for {} antennas",
                    antennas.len()
                )));
            }
            inputs[input] = Some(RfInput {
                ant,
                pol: rf.pol.into(),
                pfb_position: rf.vcs_order as usize,
            });
        }
        // every input was checked to be unique and in range, so all are filled.
        let inputs = inputs.into_iter().flatten().collect();
        Ok((antennas, inputs))
    }

    /// Merge provenance keywords from a ppds file into [`Metadata::extra_keywords`], preferring
    /// the ppds values.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::Io`] if the ppds file can't be read.
    pub fn merge_ppds<O: FitsOpen>(&mut self, opener: &O, path: &Path) -> Result<(), IngestError> {
        let mut reader = opener.open(path)?;
        read_provenance(&mut reader, &mut self.extra_keywords)?;
        debug!("merged provenance from {}", path.display());
        Ok(())
    }

    /// Decide whether cable corrections should be applied, given what was requested and what the
    /// metadata says about the data, warning about any inconsistency.
    pub fn reconcile_cable_correction(
        &self,
        correct_cable_len: bool,
        diagnostics: &mut Diagnostics,
    ) -> bool {
        match (correct_cable_len, self.cable_delays_applied) {
            (true, Some(true)) => {
                diagnostics.push(Diagnostic::CableCorrectionAlreadyApplied);
                false
            }
            (false, Some(false)) => {
                diagnostics.push(Diagnostic::CableCorrectionNotApplied);
                false
            }
            (requested, _) => requested,
        }
    }

    /// The receiver channel numbers in legacy gpubox order: gpubox `N` is element `N - 1`.
    pub fn legacy_gpubox_order(&self) -> Vec<usize> {
        let (mut low, mut high): (Vec<usize>, Vec<usize>) = self
            .coarse_chans
            .iter()
            .partition(|&&chan| chan <= LEGACY_CHANNEL_REVERSAL);
        low.sort_unstable();
        high.sort_unstable_by(|a, b| b.cmp(a));
        low.extend(high);
        low
    }

    /// The receiver channel a data file's box number refers to, if it is one of ours.
    pub fn receiver_channel(&self, version: CorrelatorVersion, box_number: usize) -> Option<usize> {
        match version {
            CorrelatorVersion::Legacy => box_number
                .checked_sub(1)
                .and_then(|i| self.legacy_gpubox_order().get(i).copied()),
            CorrelatorVersion::Mwax => self
                .coarse_chans
                .contains(&box_number)
                .then_some(box_number),
        }
    }

    /// Centre frequencies of the fine channels of a coarse channel \[Hz\].
    pub fn fine_chan_freqs_hz(&self, receiver_channel: usize, num_fine_chans: usize) -> Vec<f64> {
        let centre = receiver_channel as f64 * COARSE_CHAN_WIDTH_HZ;
        let width = self.fine_chan_width_hz;
        let first = centre - width * num_fine_chans as f64 / 2.0 + width / 2.0;
        (0..num_fine_chans)
            .map(|i| first + i as f64 * width)
            .collect()
    }

    /// Antenna indices of bad antennas.
    pub fn flagged_antennas(&self) -> Vec<usize> {
        self.antennas
            .iter()
            .filter(|ant| ant.flagged)
            .map(|ant| ant.index)
            .collect()
    }
}
