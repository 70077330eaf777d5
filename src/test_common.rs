// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthetic observations for unit tests.
//!
//! Every visibility in a synthetic observation is a known function of its antenna pair,
//! polarisation, timestep and channel ([`expected_vis`]), so the raw correlator blocks can be
//! generated from the same function the decoded values are checked against.
//!
//! Files live in a [`MemFitsStore`]. Metafits and ppds files are also written to a temporary
//! directory, since mwalib only reads from disk.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use marlu::{
    fitsio::{
        images::{ImageDescription, ImageType},
        tables::{ColumnDataType, ColumnDescription, ConcreteColumnDescription},
        FitsFile,
    },
    mwalib::{MetafitsContext, MwalibError},
    Complex,
};
use tempfile::TempDir;

use crate::{
    assembler::{GroupAxes, VisBuilder},
    diagnostics::Diagnostics,
    fileset::FileSet,
    io::{
        error::IOError::{self, NotFound},
        fits::{FitsOpen, FitsRead},
    },
    metadata::{CorrelatorVersion, FeedPol, Metadata},
    selection::VisSelection,
    vis::{Pol, VisData},
};

pub const METAFITS_PATH: &str = "1131733552.metafits";
pub const PPDS_PATH: &str = "1131733552_ppds.fits";

/// A column of an in-memory table.
#[derive(Debug, Clone, PartialEq)]
pub enum MemColumn {
    /// A column of strings.
    Str(Vec<String>),
    /// A scalar floating point column.
    Num(Vec<f64>),
    /// A scalar integer column.
    Int(Vec<i32>),
    /// A fixed-width integer array column, one array per row.
    IntArrays(Vec<Vec<i32>>),
    /// A bit vector column, one vector per row.
    Bits(Vec<Vec<bool>>),
}

impl MemColumn {
    fn len(&self) -> usize {
        match self {
            Self::Str(v) => v.len(),
            Self::Num(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::IntArrays(v) => v.len(),
            Self::Bits(v) => v.len(),
        }
    }

    fn description(&self, name: &str) -> ConcreteColumnDescription {
        let mut description = ColumnDescription::new(name);
        match self {
            Self::Str(v) => description
                .with_type(ColumnDataType::String)
                .that_repeats(v.iter().map(String::len).max().unwrap_or(1).max(1)),
            Self::Num(_) => description.with_type(ColumnDataType::Double),
            Self::Int(_) => description.with_type(ColumnDataType::Int),
            Self::IntArrays(v) => description
                .with_type(ColumnDataType::Int)
                .that_repeats(v.first().map_or(1, Vec::len)),
            Self::Bits(_) => panic!("bit columns are only held in memory"),
        }
        .create()
        .unwrap()
    }
}

/// An in-memory HDU, either an image or a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemHdu {
    /// The `EXTNAME` of the HDU, if it has one.
    pub extname: Option<String>,
    /// Header keys and their raw values.
    pub keys: BTreeMap<String, String>,
    /// Keys which are strings on disk even when they look like numbers.
    pub string_keys: BTreeSet<String>,
    /// Image shape (slowest first) and data, if this is an image HDU.
    pub image: Option<(Vec<usize>, Vec<f32>)>,
    /// Named table columns, in order. The first is the bit column, if any.
    pub columns: Vec<(String, MemColumn)>,
}

impl MemHdu {
    /// An HDU with just header keys.
    pub fn header() -> Self {
        Self::default()
    }

    /// An image HDU.
    pub fn image(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            image: Some((shape, data)),
            ..Self::default()
        }
    }

    pub fn named(mut self, extname: &str) -> Self {
        self.extname = Some(extname.to_string());
        self
    }

    /// Set a header key from anything displayable.
    pub fn with_key(mut self, key: &str, value: impl ToString) -> Self {
        self.keys.insert(key.to_string(), value.to_string());
        self
    }

    /// Set a header key which must be a string.
    pub fn with_str_key(mut self, key: &str, value: impl ToString) -> Self {
        self.string_keys.insert(key.to_string());
        self.with_key(key, value)
    }

    pub fn with_col(mut self, name: &str, col: MemColumn) -> Self {
        self.columns.push((name.to_string(), col));
        self
    }
}

/// An in-memory FITS file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemFitsFile {
    path: String,
    /// The HDUs, primary first.
    pub hdus: Vec<MemHdu>,
}

impl MemFitsFile {
    pub fn new(hdus: Vec<MemHdu>) -> Self {
        Self {
            path: String::new(),
            hdus,
        }
    }

    fn hdu(&self, hdu_num: usize) -> Result<&MemHdu, IOError> {
        self.hdus.get(hdu_num).ok_or_else(|| NotFound {
            fits_filename: self.path.clone(),
            kind: "hdu",
            name: hdu_num.to_string(),
        })
    }

    fn col(&self, hdu_num: usize, col: &str) -> Result<&MemColumn, IOError> {
        self.hdu(hdu_num)?
            .columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(col))
            .map(|(_, column)| column)
            .ok_or_else(|| NotFound {
                fits_filename: self.path.clone(),
                kind: "column",
                name: col.to_string(),
            })
    }

    fn wrong_type(&self, what: &str) -> IOError {
        NotFound {
            fits_filename: self.path.clone(),
            kind: "column of the right type",
            name: what.to_string(),
        }
    }

    /// Write this file to `path` with cfitsio. Header-only extensions are skipped.
    fn write_to_disk(&self, path: &Path) {
        let mut fptr = FitsFile::create(path).overwrite().open().unwrap();
        for (hdu_num, hdu) in self.hdus.iter().enumerate() {
            let extname = hdu.extname.clone().unwrap_or_default();
            let fits_hdu = if hdu_num == 0 {
                fptr.primary_hdu().unwrap()
            } else if !hdu.columns.is_empty() {
                let descriptions: Vec<_> = hdu
                    .columns
                    .iter()
                    .map(|(name, col)| col.description(name))
                    .collect();
                let fits_hdu = fptr.create_table(extname, &descriptions).unwrap();
                for (name, col) in &hdu.columns {
                    match col {
                        MemColumn::Str(v) => fits_hdu.write_col(&mut fptr, name, v),
                        MemColumn::Num(v) => fits_hdu.write_col(&mut fptr, name, v),
                        MemColumn::Int(v) => fits_hdu.write_col(&mut fptr, name, v),
                        MemColumn::IntArrays(rows) => {
                            // cfitsio carries on into the next row once a cell is full
                            let flat: Vec<i32> = rows.iter().flatten().copied().collect();
                            fits_hdu.write_col(&mut fptr, name, &flat)
                        }
                        MemColumn::Bits(_) => unreachable!(),
                    }
                    .unwrap();
                }
                fits_hdu
            } else if let Some((shape, data)) = &hdu.image {
                let description = ImageDescription {
                    data_type: ImageType::Float,
                    dimensions: shape,
                };
                let fits_hdu = fptr.create_image(extname, &description).unwrap();
                fits_hdu.write_image(&mut fptr, data).unwrap();
                fits_hdu
            } else {
                continue;
            };
            for (key, value) in &hdu.keys {
                if hdu.string_keys.contains(key) {
                    fits_hdu.write_key(&mut fptr, key, value.clone())
                } else if let Ok(int) = value.parse::<i64>() {
                    fits_hdu.write_key(&mut fptr, key, int)
                } else if let Ok(float) = value.parse::<f64>() {
                    fits_hdu.write_key(&mut fptr, key, float)
                } else {
                    fits_hdu.write_key(&mut fptr, key, value.clone())
                }
                .unwrap();
            }
        }
    }
}

impl FitsRead for MemFitsFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn num_hdus(&mut self) -> Result<usize, IOError> {
        Ok(self.hdus.len())
    }

    fn hdu_index(&mut self, extname: &str) -> Result<Option<usize>, IOError> {
        Ok(self
            .hdus
            .iter()
            .position(|hdu| hdu.extname.as_deref() == Some(extname)))
    }

    fn read_key(&mut self, hdu_num: usize, key: &str) -> Result<Option<String>, IOError> {
        Ok(self.hdu(hdu_num)?.keys.get(key).cloned())
    }

    fn image_shape(&mut self, hdu_num: usize) -> Result<Vec<usize>, IOError> {
        match &self.hdu(hdu_num)?.image {
            Some((shape, _)) => Ok(shape.clone()),
            None => Err(NotFound {
                fits_filename: self.path.clone(),
                kind: "image hdu",
                name: hdu_num.to_string(),
            }),
        }
    }

    fn read_image(&mut self, hdu_num: usize) -> Result<Vec<f32>, IOError> {
        match &self.hdu(hdu_num)?.image {
            Some((_, data)) => Ok(data.clone()),
            None => Err(NotFound {
                fits_filename: self.path.clone(),
                kind: "image hdu",
                name: hdu_num.to_string(),
            }),
        }
    }

    fn num_rows(&mut self, hdu_num: usize) -> Result<usize, IOError> {
        Ok(self
            .hdu(hdu_num)?
            .columns
            .first()
            .map_or(0, |(_, col)| col.len()))
    }

    fn read_col_str(&mut self, hdu_num: usize, col: &str) -> Result<Vec<String>, IOError> {
        match self.col(hdu_num, col)? {
            MemColumn::Str(v) => Ok(v.clone()),
            MemColumn::Num(v) => Ok(v.iter().map(ToString::to_string).collect()),
            MemColumn::Int(v) => Ok(v.iter().map(ToString::to_string).collect()),
            _ => Err(self.wrong_type(col)),
        }
    }

    fn read_col_f64(&mut self, hdu_num: usize, col: &str) -> Result<Vec<f64>, IOError> {
        match self.col(hdu_num, col)? {
            MemColumn::Num(v) => Ok(v.clone()),
            MemColumn::Int(v) => Ok(v.iter().map(|&x| f64::from(x)).collect()),
            _ => Err(self.wrong_type(col)),
        }
    }

    fn read_bit_cell(
        &mut self,
        hdu_num: usize,
        row: usize,
        num_bits: usize,
    ) -> Result<Vec<bool>, IOError> {
        let hdu = self.hdu(hdu_num)?;
        match hdu.columns.first() {
            Some((_, MemColumn::Bits(rows))) => match rows.get(row) {
                Some(bits) => Ok(bits.iter().copied().take(num_bits).collect()),
                None => Err(NotFound {
                    fits_filename: self.path.clone(),
                    kind: "row",
                    name: row.to_string(),
                }),
            },
            _ => Err(self.wrong_type("bit column")),
        }
    }
}

/// A set of in-memory FITS files keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemFitsStore {
    files: BTreeMap<PathBuf, MemFitsFile>,
    /// Where files which were also written out live on disk.
    on_disk: BTreeMap<PathBuf, PathBuf>,
    dir: Option<Arc<TempDir>>,
}

impl MemFitsStore {
    /// Add (or replace) the file at `path`.
    pub fn insert<P: AsRef<Path>>(&mut self, path: P, mut file: MemFitsFile) {
        file.path = path.as_ref().display().to_string();
        self.files.insert(path.as_ref().to_path_buf(), file);
    }

    /// Add (or replace) the file at `path`, and write a copy to disk for mwalib.
    pub fn insert_on_disk<P: AsRef<Path>>(&mut self, path: P, file: MemFitsFile) {
        let dir = self
            .dir
            .get_or_insert_with(|| Arc::new(tempfile::tempdir().unwrap()));
        // keep files of the same name in different directories apart
        let disk_path = dir
            .path()
            .join(format!("{}_{}", self.on_disk.len(), path.as_ref().display()).replace('/', "_"));
        file.write_to_disk(&disk_path);
        self.on_disk.insert(path.as_ref().to_path_buf(), disk_path);
        self.insert(path, file);
    }

    /// Mutable access to a stored file, for tweaking fixtures. Copies on disk are not updated.
    pub fn get_mut<P: AsRef<Path>>(&mut self, path: P) -> Option<&mut MemFitsFile> {
        self.files.get_mut(path.as_ref())
    }
}

impl FitsOpen for MemFitsStore {
    type Reader = MemFitsFile;

    fn open(&self, path: &Path) -> Result<MemFitsFile, IOError> {
        self.files.get(path).cloned().ok_or_else(|| NotFound {
            fits_filename: path.display().to_string(),
            kind: "file",
            name: path.display().to_string(),
        })
    }

    fn open_metafits(&self, path: &Path) -> Result<MetafitsContext, MwalibError> {
        MetafitsContext::new(self.on_disk.get(path).map_or(path, PathBuf::as_path), None)
    }
}

/// The shape of a synthetic observation.
#[derive(Debug, Clone)]
pub struct ObsSpec {
    pub obsid: u32,
    /// A multiple of 32, the legacy correlator's fine PFB handles 64 inputs at a time.
    pub num_ants: usize,
    /// Whether metafits input numbers run backwards through the antennas.
    pub inputs_reversed: bool,
    pub bad_ants: Vec<usize>,
    /// receiver channels listed in the metafits, ascending
    pub coarse_chans: Vec<usize>,
    /// receiver channels data files are written for
    pub data_chans: Vec<usize>,
    pub num_fine_chans: usize,
    pub num_timesteps: usize,
    /// (receiver channel, number of leading timesteps missing from its file)
    pub late_starts: Vec<(usize, usize)>,
    pub version: CorrelatorVersion,
    pub start_unix_ms: u64,
    pub int_time_ms: u64,
}

impl Default for ObsSpec {
    fn default() -> Self {
        Self {
            obsid: 1131733552,
            num_ants: 32,
            inputs_reversed: true,
            bad_ants: vec![3],
            coarse_chans: vec![140, 141],
            data_chans: vec![140, 141],
            num_fine_chans: 8,
            num_timesteps: 10,
            late_starts: vec![],
            version: CorrelatorVersion::Legacy,
            start_unix_ms: 1_447_698_337_000,
            int_time_ms: 500,
        }
    }
}

impl ObsSpec {
    pub fn num_inputs(&self) -> usize {
        self.num_ants * 2
    }

    pub fn num_baselines(&self) -> usize {
        self.num_ants * (self.num_ants + 1) / 2
    }

    /// The metafits input number of an antenna's feed.
    pub fn input(&self, ant: usize, pol: FeedPol) -> usize {
        let ant = if self.inputs_reversed {
            self.num_ants - 1 - ant
        } else {
            ant
        };
        2 * ant + pol as usize
    }

    /// The antenna and feed of a metafits input number.
    pub fn rf_input(&self, input: usize) -> (usize, FeedPol) {
        let ant = if self.inputs_reversed {
            self.num_ants - 1 - input / 2
        } else {
            input / 2
        };
        (ant, feed(input % 2))
    }

    /// Receiver channels in legacy gpubox order.
    pub fn gpubox_order(&self) -> Vec<usize> {
        let mut low: Vec<usize> = self.coarse_chans.iter().copied().filter(|&c| c <= 128).collect();
        let mut high: Vec<usize> = self.coarse_chans.iter().copied().filter(|&c| c > 128).collect();
        low.sort_unstable();
        high.sort_unstable_by(|a, b| b.cmp(a));
        low.extend(high);
        low
    }

    pub fn box_number(&self, receiver_channel: usize) -> usize {
        match self.version {
            CorrelatorVersion::Legacy => {
                self.gpubox_order()
                    .iter()
                    .position(|&c| c == receiver_channel)
                    .unwrap()
                    + 1
            }
            CorrelatorVersion::Mwax => receiver_channel,
        }
    }

    pub fn data_path(&self, receiver_channel: usize) -> String {
        let box_number = self.box_number(receiver_channel);
        match self.version {
            CorrelatorVersion::Legacy => format!(
                "{}_20151116194519_gpubox{:02}_00.fits",
                self.obsid, box_number
            ),
            CorrelatorVersion::Mwax => {
                format!("{}_20151116194519_ch{:03}_000.fits", self.obsid, box_number)
            }
        }
    }

    pub fn data_paths(&self) -> Vec<String> {
        self.data_chans.iter().map(|&c| self.data_path(c)).collect()
    }

    pub fn mwaf_path(&self, receiver_channel: usize) -> String {
        format!("{}_{:02}.mwaf", self.obsid, self.box_number(receiver_channel))
    }

    /// The metafits followed by all data files.
    pub fn all_paths(&self) -> Vec<String> {
        let mut paths = vec![METAFITS_PATH.to_string()];
        paths.extend(self.data_paths());
        paths
    }

    fn late_start(&self, receiver_channel: usize) -> usize {
        self.late_starts
            .iter()
            .find(|(c, _)| *c == receiver_channel)
            .map_or(0, |(_, n)| *n)
    }
}

/// The decoded value of a visibility, canonical ordering (`ant1 <= ant2`). Autocorrelations are
/// hermitian: `YX` is the conjugate of `XY`.
pub fn expected_vis(
    ant1: usize,
    ant2: usize,
    pol: usize,
    timestep: usize,
    receiver_channel: usize,
    fine_chan: usize,
    num_fine_chans: usize,
) -> Complex<f32> {
    if ant1 == ant2 && pol == Pol::YX as usize {
        return expected_vis(
            ant1,
            ant2,
            Pol::XY as usize,
            timestep,
            receiver_channel,
            fine_chan,
            num_fine_chans,
        )
        .conj();
    }
    let chan = receiver_channel * num_fine_chans + fine_chan;
    Complex::new(
        (1 + ant1 + 64 * ant2 + 4096 * pol) as f32,
        (timestep * 2000 + chan % 2000) as f32,
    )
}

/// The correlation of input `i` with input `j`.
fn raw_product(
    (ant_i, pol_i): (usize, FeedPol),
    (ant_j, pol_j): (usize, FeedPol),
    timestep: usize,
    receiver_channel: usize,
    fine_chan: usize,
    num_fine_chans: usize,
) -> Complex<f32> {
    if ant_i <= ant_j {
        expected_vis(
            ant_i,
            ant_j,
            Pol::from_feeds(pol_i, pol_j) as usize,
            timestep,
            receiver_channel,
            fine_chan,
            num_fine_chans,
        )
    } else {
        expected_vis(
            ant_j,
            ant_i,
            Pol::from_feeds(pol_j, pol_i) as usize,
            timestep,
            receiver_channel,
            fine_chan,
            num_fine_chans,
        )
        .conj()
    }
}

fn feed(parity: usize) -> FeedPol {
    if parity == 0 {
        FeedPol::X
    } else {
        FeedPol::Y
    }
}

/// The metafits input at a position of the legacy fine PFB output.
fn pfb_input(position: usize) -> usize {
    (position & 0xc0) | ((position & 0x03) << 4) | ((position & 0x3c) >> 2)
}

/// Every product the legacy correlator writes, in order: (raw index, row position, column
/// position). The lower left product of each diagonal square is redundant and skipped.
pub fn legacy_products(num_inputs: usize) -> Vec<(usize, usize, usize)> {
    let mut products = vec![];
    let mut raw = 0;
    for col in (0..num_inputs).step_by(2) {
        for row in (0..=col).step_by(2) {
            products.push((raw, row, col));
            if row != col {
                products.push((raw + 1, row + 1, col));
            }
            products.push((raw + 2, row, col + 1));
            products.push((raw + 3, row + 1, col + 1));
            raw += 4;
        }
    }
    products
}

/// One raw block (one HDU) for a receiver channel and timestep, in the version's layout.
pub fn raw_block(spec: &ObsSpec, receiver_channel: usize, timestep: usize) -> (Vec<usize>, Vec<f32>) {
    let num_raw_bls = spec.num_baselines();
    let nf = spec.num_fine_chans;
    let mut data = vec![0.0; nf * num_raw_bls * 8];
    match spec.version {
        CorrelatorVersion::Legacy => {
            let at_position = |p: usize| spec.rf_input(pfb_input(p));
            for (raw, row, col) in legacy_products(spec.num_inputs()) {
                for f in 0..nf {
                    // stored conjugated
                    let v = raw_product(
                        at_position(row),
                        at_position(col),
                        timestep,
                        receiver_channel,
                        f,
                        nf,
                    )
                    .conj();
                    let idx = f * (num_raw_bls * 8) + raw * 2;
                    data[idx] = v.re;
                    data[idx + 1] = v.im;
                }
            }
        }
        CorrelatorVersion::Mwax => {
            let mut raw_bl = 0;
            for ant1 in 0..spec.num_ants {
                for ant2 in ant1..spec.num_ants {
                    for (p, (pa, pb)) in [(0, 0), (0, 1), (1, 0), (1, 1)].into_iter().enumerate() {
                        for f in 0..nf {
                            let v = raw_product(
                                (ant1, feed(pa)),
                                (ant2, feed(pb)),
                                timestep,
                                receiver_channel,
                                f,
                                nf,
                            );
                            let idx = raw_bl * (nf * 8) + f * 8 + p * 2;
                            data[idx] = v.re;
                            data[idx + 1] = v.im;
                        }
                    }
                    raw_bl += 1;
                }
            }
        }
    }
    let shape = match spec.version {
        CorrelatorVersion::Legacy => vec![nf, num_raw_bls * 8],
        CorrelatorVersion::Mwax => vec![num_raw_bls, nf * 8],
    };
    (shape, data)
}

fn join<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn primary_keys(spec: &ObsSpec) -> MemHdu {
    let num_chans = spec.coarse_chans.len();
    let centre_chan = spec.coarse_chans.iter().sum::<usize>() as f64 / num_chans as f64;
    let mode = match spec.version {
        CorrelatorVersion::Legacy => "HW_LFILES",
        CorrelatorVersion::Mwax => "MWAX_CORRELATOR",
    };
    MemHdu::header()
        .with_key("GPSTIME", spec.obsid)
        .with_str_key("DATE-OBS", "2015-11-16T18:25:37")
        .with_key("MJD", 57342.77473)
        .with_key("EXPOSURE", 112)
        .with_key("QUACKTIM", 2.0)
        .with_key("GOODTIME", (spec.start_unix_ms + 2000) as f64 / 1000.0)
        .with_key("INTTIME", spec.int_time_ms as f64 / 1000.0)
        .with_key("FINECHAN", 40.0)
        .with_str_key("CHANNELS", join(&spec.coarse_chans))
        .with_key("BANDWDTH", 1.28 * num_chans as f64)
        .with_key("FREQCENT", 1.28 * centre_chan)
        .with_key("NINPUTS", spec.num_inputs())
        .with_str_key("RECVRS", join(1..=(spec.num_ants + 7) / 8))
        .with_str_key("DELAYS", join([0; 16]))
        .with_key("RA", 0.0)
        .with_key("DEC", -27.0)
        .with_key("AZIMUTH", 0.0)
        .with_key("ALTITUDE", 90.0)
        .with_key("LST", 0.0)
        .with_str_key("HA", "00:00:00.00")
        .with_str_key("CREATOR", "corrfits")
        .with_str_key("FILENAME", "synthetic_obs")
        .with_str_key("PROJECT", "G0009")
        .with_str_key("MODE", mode)
}

/// One row per input, in input order.
fn tiledata(spec: &ObsSpec) -> MemHdu {
    let mut input = vec![];
    let mut antenna = vec![];
    let mut tile = vec![];
    let mut name = vec![];
    let mut pol = vec![];
    let mut rx = vec![];
    let mut slot = vec![];
    let mut flag = vec![];
    let mut length = vec![];
    let mut north = vec![];
    let mut east = vec![];
    let mut height = vec![];
    for i in 0..spec.num_inputs() {
        let (ant, feed) = spec.rf_input(i);
        input.push(i as i32);
        antenna.push(ant as i32);
        tile.push((11 + ant) as i32);
        name.push(format!("Tile{:03}", 11 + ant));
        pol.push(if feed == FeedPol::X { "X" } else { "Y" }.to_string());
        rx.push((1 + ant / 8) as i32);
        slot.push((1 + ant % 8) as i32);
        flag.push(i32::from(spec.bad_ants.contains(&ant)));
        length.push(format!("EL_{}", 100 + 10 * ant + 3 * feed as usize));
        north.push(5.0 * ant as f64);
        east.push(10.0 * ant as f64);
        height.push(377.0);
    }
    let num_inputs = spec.num_inputs();
    MemHdu::header()
        .named("TILEDATA")
        .with_col("Input", MemColumn::Int(input))
        .with_col("Antenna", MemColumn::Int(antenna))
        .with_col("Tile", MemColumn::Int(tile))
        .with_col("TileName", MemColumn::Str(name))
        .with_col("Pol", MemColumn::Str(pol))
        .with_col("Rx", MemColumn::Int(rx))
        .with_col("Slot", MemColumn::Int(slot))
        .with_col("Flag", MemColumn::Int(flag))
        .with_col("Length", MemColumn::Str(length))
        .with_col("North", MemColumn::Num(north))
        .with_col("East", MemColumn::Num(east))
        .with_col("Height", MemColumn::Num(height))
        .with_col(
            "Gains",
            MemColumn::IntArrays(vec![vec![64; spec.coarse_chans.len()]; num_inputs]),
        )
        .with_col("Delays", MemColumn::IntArrays(vec![vec![0; 16]; num_inputs]))
}

pub fn metafits(spec: &ObsSpec) -> MemFitsFile {
    MemFitsFile::new(vec![primary_keys(spec), tiledata(spec)])
}

pub fn ppds(spec: &ObsSpec) -> MemFitsFile {
    MemFitsFile::new(vec![
        primary_keys(spec)
            .with_str_key("PROJECT", "G0010")
            .with_str_key("MWAVER", "2.0")
            .with_str_key("MWADATE", "2015-11-16"),
        tiledata(spec),
        MemHdu::header().named("PPDS"),
    ])
}

pub fn data_file(spec: &ObsSpec, receiver_channel: usize) -> MemFitsFile {
    let mut hdus = vec![MemHdu::header()
        .with_key("OBSID", spec.obsid)
        .with_key("NINPUTS", spec.num_inputs())];
    for timestep in spec.late_start(receiver_channel)..spec.num_timesteps {
        let start_ms = spec.start_unix_ms + timestep as u64 * spec.int_time_ms;
        let (shape, data) = raw_block(spec, receiver_channel, timestep);
        hdus.push(
            MemHdu::image(shape, data)
                .with_key("TIME", start_ms / 1000)
                .with_key("MILLITIM", start_ms % 1000),
        );
        if spec.version == CorrelatorVersion::Mwax {
            let num_raw_bls = spec.num_baselines();
            hdus.push(
                MemHdu::image(vec![num_raw_bls, 4], vec![1.0; num_raw_bls * 4])
                    .with_key("TIME", start_ms / 1000)
                    .with_key("MILLITIM", start_ms % 1000),
            );
        }
    }
    MemFitsFile::new(hdus)
}

/// A cotter flag file for one coarse channel, flagging wherever `flagged(scan, bl, fine_chan)`.
pub fn mwaf_file<F: Fn(usize, usize, usize) -> bool>(
    spec: &ObsSpec,
    receiver_channel: usize,
    flagged: F,
) -> MemFitsFile {
    let mut rows = vec![];
    for scan in 0..spec.num_timesteps {
        for bl in 0..spec.num_baselines() {
            rows.push(
                (0..spec.num_fine_chans)
                    .map(|f| flagged(scan, bl, f))
                    .collect(),
            );
        }
    }
    MemFitsFile::new(vec![
        MemHdu::header()
            .with_key("VERSION", "2.0")
            .with_key("GPSTIME", spec.obsid)
            .with_key("NCHANS", spec.num_fine_chans)
            .with_key("NANTENNA", spec.num_ants)
            .with_key("NSCANS", spec.num_timesteps)
            .with_key("NPOLS", 1)
            .with_key("GPUBOXNO", spec.box_number(receiver_channel)),
        MemHdu::header().with_col("FLAGS", MemColumn::Bits(rows)),
    ])
}

/// A store holding the metafits, a ppds file and all data files of `spec`.
pub fn synthetic_store(spec: &ObsSpec) -> MemFitsStore {
    let mut store = MemFitsStore::default();
    store.insert_on_disk(METAFITS_PATH, metafits(spec));
    store.insert_on_disk(PPDS_PATH, ppds(spec));
    for &chan in &spec.data_chans {
        store.insert(spec.data_path(chan), data_file(spec, chan));
    }
    store
}

/// Read every data file of `spec` with no selection, corrections or flags.
pub fn synthetic_vis(spec: &ObsSpec) -> (VisData, FileSet, Metadata) {
    let store = synthetic_store(spec);
    let mut diagnostics = Diagnostics::default();
    let metadata = Metadata::from_fits(&store, Path::new(METAFITS_PATH), &mut diagnostics).unwrap();
    let file_set =
        FileSet::from_paths(&store, &spec.data_paths(), &metadata, &mut diagnostics).unwrap();
    let axes = GroupAxes::new(&file_set, &metadata);
    let selection = VisSelection::all(
        axes.times.len(),
        axes.baselines.len(),
        axes.freqs_hz.len(),
    );
    let mut builder = VisBuilder::new(selection).unwrap();
    builder
        .read_file_set(&store, &file_set, &metadata, false)
        .unwrap();
    (builder.finalise(&axes, &metadata), file_set, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fits::{get_optional_key, get_required_key};

    fn store() -> MemFitsStore {
        let mut store = MemFitsStore::default();
        store.insert(
            "a.fits",
            MemFitsFile::new(vec![
                MemHdu::header().with_key("GPSTIME", 1065880128),
                MemHdu::image(vec![1, 2], vec![1.0, 2.0]),
                MemHdu::header()
                    .named("TILEDATA")
                    .with_col("TileName", MemColumn::Str(vec!["Tile011".into()])),
            ]),
        );
        store
    }

    #[test]
    fn test_mem_keys_and_images() {
        let mut file = store().open(Path::new("a.fits")).unwrap();
        assert_eq!(file.path(), "a.fits");
        assert_eq!(file.num_hdus().unwrap(), 3);
        let obsid: u32 = get_required_key(&mut file, 0, "GPSTIME").unwrap();
        assert_eq!(obsid, 1065880128);
        assert!(get_optional_key::<f64, _>(&mut file, 0, "INTTIME")
            .unwrap()
            .is_none());
        assert_eq!(file.image_shape(1).unwrap(), vec![1, 2]);
        assert_eq!(file.read_image(1).unwrap(), vec![1.0, 2.0]);
        assert!(matches!(file.image_shape(0), Err(NotFound { .. })));
    }

    #[test]
    fn test_mem_tables() {
        let mut file = store().open(Path::new("a.fits")).unwrap();
        assert_eq!(file.hdu_index("TILEDATA").unwrap(), Some(2));
        assert_eq!(file.hdu_index("PPDS").unwrap(), None);
        assert_eq!(file.num_rows(2).unwrap(), 1);
        assert_eq!(file.read_col_str(2, "tilename").unwrap(), vec!["Tile011"]);
        assert!(matches!(
            file.read_col_f64(2, "TileName"),
            Err(NotFound { .. })
        ));
    }

    #[test]
    fn test_open_missing() {
        assert!(matches!(
            store().open(Path::new("b.fits")),
            Err(NotFound { .. })
        ));
    }

    #[test]
    fn test_pfb_positions_cover_every_input() {
        let mut inputs: Vec<usize> = (0..128).map(pfb_input).collect();
        assert_eq!(pfb_input(1), 16);
        assert_eq!(pfb_input(4), 1);
        assert_eq!(pfb_input(64), 64);
        inputs.sort_unstable();
        assert_eq!(inputs, (0..128).collect::<Vec<_>>());
    }

    #[test]
    fn test_legacy_products_fill_the_block() {
        let products = legacy_products(64);
        // 32 antennas, 528 baselines, 4 slots each, 32 redundant slots unused
        assert_eq!(products.len(), 528 * 4 - 32);
        assert_eq!(products.last().unwrap().0, 528 * 4 - 1);
        assert_eq!(&products[..4], &[(0, 0, 0), (2, 0, 1), (3, 1, 1), (4, 0, 2)]);
    }

    #[test]
    fn test_metafits_on_disk_reads_with_mwalib() {
        let spec = ObsSpec::default();
        let store = synthetic_store(&spec);
        let context = store.open_metafits(Path::new(METAFITS_PATH)).unwrap();
        assert_eq!(context.obs_id, spec.obsid);
        assert_eq!(context.num_rf_inputs, spec.num_inputs());
        assert_eq!(context.antennas[0].tile_name, "Tile011");
        assert_eq!(context.corr_int_time_ms, 500);
    }
}
