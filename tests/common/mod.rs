// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Writes small synthetic observations to disk with cfitsio.
//!
//! The metafits has everything mwalib needs. Metafits inputs run backwards through the
//! antennas, so input 0 is the X feed of the last antenna.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use corrfits::marlu::{
    fitsio::{
        images::{ImageDescription, ImageType},
        tables::{ColumnDataType, ColumnDescription},
        FitsFile,
    },
    Complex,
};

pub const OBSID: u32 = 1131733552;
pub const START_UNIX_S: u64 = 1_447_698_337;
pub const INT_TIME_MS: u64 = 500;
pub const NUM_FINE_CHANS: usize = 4;
/// The legacy fine PFB works on 64 inputs at a time.
pub const NUM_ANTS: usize = 32;
pub const NUM_BASELINES: usize = NUM_ANTS * (NUM_ANTS + 1) / 2;
pub const BAD_ANT: usize = 2;

/// Which correlator wrote the files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
    Legacy,
    Mwax,
}

/// The decoded value of a visibility, `ant1 <= ant2`. Autos are hermitian.
pub fn expected_vis(
    ant1: usize,
    ant2: usize,
    pol: usize,
    timestep: usize,
    receiver_channel: usize,
    fine_chan: usize,
) -> Complex<f32> {
    if ant1 == ant2 && pol == 3 {
        return expected_vis(ant1, ant2, 2, timestep, receiver_channel, fine_chan).conj();
    }
    let chan = receiver_channel * NUM_FINE_CHANS + fine_chan;
    Complex::new(
        (1 + ant1 + 64 * ant2 + 4096 * pol) as f32,
        (timestep * 2000 + chan % 2000) as f32,
    )
}

/// (antenna, feed) of a metafits input.
fn rf_input(input: usize) -> (usize, usize) {
    (NUM_ANTS - 1 - input / 2, input % 2)
}

/// The metafits input at a position of the legacy fine PFB output.
fn pfb_input(position: usize) -> usize {
    (position & 0xc0) | ((position & 0x03) << 4) | ((position & 0x3c) >> 2)
}

fn pol_index(feed_a: usize, feed_b: usize) -> usize {
    match (feed_a, feed_b) {
        (0, 0) => 0,
        (1, 1) => 1,
        (0, 1) => 2,
        _ => 3,
    }
}

fn raw_product(
    (ant_i, feed_i): (usize, usize),
    (ant_j, feed_j): (usize, usize),
    timestep: usize,
    receiver_channel: usize,
    fine_chan: usize,
) -> Complex<f32> {
    if ant_i <= ant_j {
        expected_vis(
            ant_i,
            ant_j,
            pol_index(feed_i, feed_j),
            timestep,
            receiver_channel,
            fine_chan,
        )
    } else {
        expected_vis(
            ant_j,
            ant_i,
            pol_index(feed_j, feed_i),
            timestep,
            receiver_channel,
            fine_chan,
        )
        .conj()
    }
}

fn raw_block(flavour: Flavour, receiver_channel: usize, timestep: usize) -> (Vec<usize>, Vec<f32>) {
    let nf = NUM_FINE_CHANS;
    let mut data = vec![0.0; nf * NUM_BASELINES * 8];
    match flavour {
        Flavour::Legacy => {
            let at = |position: usize| rf_input(pfb_input(position));
            let mut k = 0;
            for col in (0..2 * NUM_ANTS).step_by(2) {
                for row in (0..=col).step_by(2) {
                    for (d_row, d_col) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let (row, col) = (row + d_row, col + d_col);
                        if row <= col {
                            for f in 0..nf {
                                // stored conjugated
                                let v =
                                    raw_product(at(row), at(col), timestep, receiver_channel, f);
                                let idx = f * (NUM_BASELINES * 8) + k * 2;
                                data[idx] = v.re;
                                data[idx + 1] = -v.im;
                            }
                        }
                        k += 1;
                    }
                }
            }
        }
        Flavour::Mwax => {
            let mut raw_bl = 0;
            for ant1 in 0..NUM_ANTS {
                for ant2 in ant1..NUM_ANTS {
                    for (p, (pa, pb)) in [(0, 0), (0, 1), (1, 0), (1, 1)].into_iter().enumerate() {
                        for f in 0..nf {
                            let v = raw_product((ant1, pa), (ant2, pb), timestep, receiver_channel, f);
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
    let shape = match flavour {
        Flavour::Legacy => vec![nf, NUM_BASELINES * 8],
        Flavour::Mwax => vec![NUM_BASELINES, nf * 8],
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

/// Write a metafits for `coarse_chans` (all < 129) into `dir`.
pub fn write_metafits(dir: &Path, flavour: Flavour, coarse_chans: &[usize]) -> PathBuf {
    let path = dir.join(format!("{OBSID}.metafits"));
    let mut fptr = FitsFile::create(&path).open().unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    let num_chans = coarse_chans.len() as f64;
    let centre_chan = coarse_chans.iter().sum::<usize>() as f64 / num_chans;
    let mode = match flavour {
        Flavour::Legacy => "HW_LFILES",
        Flavour::Mwax => "MWAX_CORRELATOR",
    };
    let good_time = (START_UNIX_S + 2) as f64;
    hdu.write_key(&mut fptr, "GPSTIME", OBSID as i64).unwrap();
    hdu.write_key(&mut fptr, "DATE-OBS", "2015-11-16T18:25:37").unwrap();
    hdu.write_key(&mut fptr, "MJD", 57342.77473).unwrap();
    hdu.write_key(&mut fptr, "EXPOSURE", 112_i64).unwrap();
    hdu.write_key(&mut fptr, "QUACKTIM", 2.0).unwrap();
    hdu.write_key(&mut fptr, "GOODTIME", good_time).unwrap();
    hdu.write_key(&mut fptr, "INTTIME", INT_TIME_MS as f64 / 1000.0)
        .unwrap();
    hdu.write_key(&mut fptr, "FINECHAN", 320.0).unwrap();
    hdu.write_key(&mut fptr, "CHANNELS", join(coarse_chans)).unwrap();
    hdu.write_key(&mut fptr, "BANDWDTH", 1.28 * num_chans).unwrap();
    hdu.write_key(&mut fptr, "FREQCENT", 1.28 * centre_chan).unwrap();
    hdu.write_key(&mut fptr, "NINPUTS", (2 * NUM_ANTS) as i64).unwrap();
    hdu.write_key(&mut fptr, "RECVRS", join(1..=NUM_ANTS / 8)).unwrap();
    hdu.write_key(&mut fptr, "DELAYS", join([0; 16])).unwrap();
    hdu.write_key(&mut fptr, "RA", 10.0).unwrap();
    hdu.write_key(&mut fptr, "DEC", -27.0).unwrap();
    hdu.write_key(&mut fptr, "AZIMUTH", 0.0).unwrap();
    hdu.write_key(&mut fptr, "ALTITUDE", 90.0).unwrap();
    hdu.write_key(&mut fptr, "LST", 10.0).unwrap();
    hdu.write_key(&mut fptr, "HA", "00:00:00.00").unwrap();
    hdu.write_key(&mut fptr, "LATITUDE", -26.703319).unwrap();
    hdu.write_key(&mut fptr, "LONGITUD", 116.67081).unwrap();
    hdu.write_key(&mut fptr, "CREATOR", "corrfits").unwrap();
    hdu.write_key(&mut fptr, "FILENAME", "disk_obs").unwrap();
    hdu.write_key(&mut fptr, "PROJECT", "G0009").unwrap();
    hdu.write_key(&mut fptr, "MODE", mode).unwrap();

    let mut input = vec![];
    let mut antenna = vec![];
    let mut tile = vec![];
    let mut name = vec![];
    let mut pol = vec![];
    let mut rx = vec![];
    let mut slot = vec![];
    let mut length = vec![];
    let mut north = vec![];
    let mut east = vec![];
    let mut height = vec![];
    let mut flag = vec![];
    for i in 0..2 * NUM_ANTS {
        let (ant, feed) = rf_input(i);
        input.push(i as i32);
        antenna.push(ant as i32);
        tile.push((11 + ant) as i32);
        name.push(format!("Tile{:03}", 11 + ant));
        pol.push(if feed == 0 { "X" } else { "Y" }.to_string());
        rx.push((1 + ant / 8) as i32);
        slot.push((1 + ant % 8) as i32);
        length.push(format!("EL_{}", 100 + 10 * ant + 3 * feed));
        north.push(5.0 * ant as f64);
        east.push(10.0 * ant as f64);
        height.push(377.0);
        flag.push(i32::from(ant == BAD_ANT));
    }
    // one gain per coarse channel, 16 dipole delays, flattened over the rows
    let gains = vec![64_i32; 2 * NUM_ANTS * coarse_chans.len()];
    let delays = vec![0_i32; 2 * NUM_ANTS * 16];

    let int_col = |name: &str, repeats: usize| {
        ColumnDescription::new(name)
            .with_type(ColumnDataType::Int)
            .that_repeats(repeats)
            .create()
            .unwrap()
    };
    let dbl_col = |name: &str| {
        ColumnDescription::new(name)
            .with_type(ColumnDataType::Double)
            .create()
            .unwrap()
    };
    let str_col = |name: &str, width: usize| {
        ColumnDescription::new(name)
            .with_type(ColumnDataType::String)
            .that_repeats(width)
            .create()
            .unwrap()
    };
    let columns = [
        int_col("Input", 1),
        int_col("Antenna", 1),
        int_col("Tile", 1),
        str_col("TileName", 8),
        str_col("Pol", 1),
        int_col("Rx", 1),
        int_col("Slot", 1),
        int_col("Flag", 1),
        str_col("Length", 14),
        dbl_col("North"),
        dbl_col("East"),
        dbl_col("Height"),
        int_col("Gains", coarse_chans.len()),
        int_col("Delays", 16),
    ];
    let hdu = fptr.create_table("TILEDATA", &columns).unwrap();
    hdu.write_col(&mut fptr, "Input", &input).unwrap();
    hdu.write_col(&mut fptr, "Antenna", &antenna).unwrap();
    hdu.write_col(&mut fptr, "Tile", &tile).unwrap();
    hdu.write_col(&mut fptr, "TileName", &name).unwrap();
    hdu.write_col(&mut fptr, "Pol", &pol).unwrap();
    hdu.write_col(&mut fptr, "Rx", &rx).unwrap();
    hdu.write_col(&mut fptr, "Slot", &slot).unwrap();
    hdu.write_col(&mut fptr, "Flag", &flag).unwrap();
    hdu.write_col(&mut fptr, "Length", &length).unwrap();
    hdu.write_col(&mut fptr, "North", &north).unwrap();
    hdu.write_col(&mut fptr, "East", &east).unwrap();
    hdu.write_col(&mut fptr, "Height", &height).unwrap();
    hdu.write_col(&mut fptr, "Gains", &gains).unwrap();
    hdu.write_col(&mut fptr, "Delays", &delays).unwrap();
    path
}

/// The filename of the data file for a coarse channel. `coarse_chans` are all < 129, so the
/// legacy gpubox number is the position in the sorted list.
pub fn data_filename(flavour: Flavour, coarse_chans: &[usize], receiver_channel: usize) -> String {
    match flavour {
        Flavour::Legacy => {
            let box_number = coarse_chans
                .iter()
                .position(|&c| c == receiver_channel)
                .unwrap()
                + 1;
            format!("{OBSID}_20151116194519_gpubox{box_number:02}_00.fits")
        }
        Flavour::Mwax => format!("{OBSID}_20151116194519_ch{receiver_channel:03}_000.fits"),
    }
}

/// Write a data file of `num_timesteps` blocks for one coarse channel into `dir`.
pub fn write_data_file(
    dir: &Path,
    flavour: Flavour,
    coarse_chans: &[usize],
    receiver_channel: usize,
    num_timesteps: usize,
) -> PathBuf {
    let path = dir.join(data_filename(flavour, coarse_chans, receiver_channel));
    let mut fptr = FitsFile::create(&path).open().unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_key(&mut fptr, "OBSID", OBSID as i64).unwrap();
    hdu.write_key(&mut fptr, "NINPUTS", (NUM_ANTS * 2) as i64)
        .unwrap();
    for timestep in 0..num_timesteps {
        let start_ms = START_UNIX_S * 1000 + timestep as u64 * INT_TIME_MS;
        let (shape, data) = raw_block(flavour, receiver_channel, timestep);
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &shape,
        };
        let hdu = fptr
            .create_image(format!("VIS{timestep}"), &description)
            .unwrap();
        hdu.write_key(&mut fptr, "TIME", (start_ms / 1000) as i64)
            .unwrap();
        hdu.write_key(&mut fptr, "MILLITIM", (start_ms % 1000) as i64)
            .unwrap();
        hdu.write_image(&mut fptr, &data).unwrap();
        if flavour == Flavour::Mwax {
            let description = ImageDescription {
                data_type: ImageType::Float,
                dimensions: &[NUM_BASELINES, 4],
            };
            let hdu = fptr
                .create_image(format!("WEIGHTS{timestep}"), &description)
                .unwrap();
            hdu.write_key(&mut fptr, "TIME", (start_ms / 1000) as i64)
                .unwrap();
            hdu.write_key(&mut fptr, "MILLITIM", (start_ms % 1000) as i64)
                .unwrap();
            hdu.write_image(&mut fptr, &vec![1.0_f32; NUM_BASELINES * 4])
                .unwrap();
        }
    }
    path
}

/// Write a metafits and data files for `data_chans` into `dir`, returning all their paths.
pub fn write_obs(
    dir: &Path,
    flavour: Flavour,
    coarse_chans: &[usize],
    data_chans: &[usize],
    num_timesteps: usize,
) -> Vec<String> {
    let mut paths = vec![write_metafits(dir, flavour, coarse_chans)];
    for &chan in data_chans {
        paths.push(write_data_file(
            dir,
            flavour,
            coarse_chans,
            chan,
            num_timesteps,
        ));
    }
    paths
        .into_iter()
        .map(|p| p.display().to_string())
        .collect()
}
