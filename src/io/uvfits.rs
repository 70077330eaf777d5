// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading and writing [`VisData`] as uvfits.
//!
//! Only a single, contiguous spectral window of phased data can be written. Rows are written
//! time-major, then in the container's baseline order, and the reader expects the same.
//!
//! Weights carry both the sample count and the flag: a flagged sample is written with its
//! sample count negated. The sign bit of zero is kept too, so a flagged sample with no samples
//! reads back as flagged.

use std::{
    collections::BTreeMap,
    ffi::CString,
    path::{Path, PathBuf},
    ptr,
};

use log::{debug, trace, warn};

use super::{
    error::{IOError, UvfitsWriteError},
    fits::{get_optional_key, get_required_key, CfitsioFile, CfitsioOpener, FitsOpen, FitsRead},
};
use crate::{
    constants::PROVENANCE_KEYS,
    marlu::{
        constants::VEL_C,
        fitsio::errors::check_status as fits_check_status,
        fitsio_sys,
        hifitime::{Duration, Epoch, Unit},
        io::uvfits::{decode_uvfits_baseline, encode_uvfits_baseline},
        ndarray::{s, Array5},
        precession::get_lmst,
        Complex, RADec, XyzGeocentric, XyzGeodetic,
    },
    vis::{PhaseCentre, Pol, VisAntenna, VisData},
    IngestError,
};

const NUM_FLOATS_PER_POL: usize = 3;
const GROUP_PARAMS: [&str; 7] = ["UU", "VV", "WW", "BASELINE", "DATE", "DATE", "INTTIM"];
const ANTENNA_TABLE: &str = "AIPS AN";

/// From a `hifitime` [`Epoch`], get a formatted date string with the hours,
/// minutes and seconds set to 0.
fn get_truncated_date_string(epoch: Epoch) -> String {
    let (year, month, day, _, _, _, _) = epoch.to_gregorian_utc();
    format!("{year}-{month:02}-{day:02}T00:00:00.0")
}

/// The julian date that DATE group parameters are counted from.
fn jd_zero(start: Epoch) -> f64 {
    start.to_jde_utc_days().floor() + 0.5
}

/// Refuse anything that can't be represented in a single uvfits spectral window.
fn check_writable(vis: &VisData) -> Result<RADec, IngestError> {
    let unsupported = |feature: &str| IngestError::UnsupportedFeature {
        feature: feature.to_string(),
    };
    let phase_centre = match vis.phase_centre {
        PhaseCentre::Phased(radec) => radec,
        PhaseCentre::Drift => {
            return Err(unsupported(
                "writing unphased data to uvfits is not supported, phase the data first",
            ))
        }
    };
    if !vis.freqs_contiguous {
        return Err(unsupported(
            "writing non-contiguous frequencies to uvfits is not supported",
        ));
    }
    if vis.num_times() == 0 || vis.num_baselines() == 0 || vis.num_chans() == 0 {
        return Err(unsupported("writing an empty dataset to uvfits is not supported"));
    }
    let consecutive_pols = !vis.pols.is_empty()
        && vis
            .pols
            .iter()
            .enumerate()
            .all(|(i, pol)| pol.aips_code() == vis.pols[0].aips_code() - i as i32);
    if !consecutive_pols {
        return Err(unsupported(&format!(
            "writing polarisations {:?} to uvfits is not supported, they must be a consecutive run of XX, YY, XY, YX",
            vis.pols
        )));
    }
    Ok(phase_centre)
}

/// Writes a [`VisData`] to a uvfits file.
///
/// The file is created (replacing any existing file), the primary header and every row are
/// written, then the antenna table. The file is closed when the writer is dropped if it wasn't
/// closed already.
pub struct UvfitsWriter {
    /// The path to the uvfits file.
    path: PathBuf,

    /// The FITS file pointer.
    fptr: *mut fitsio_sys::fitsfile,

    /// The number of uvfits rows. This is equal to `num_timesteps` *
    /// `num_baselines`.
    total_num_rows: usize,

    /// The number of uvfits rows that have currently been written.
    current_num_rows: usize,

    /// The first timestep, used to count DATE group parameters from.
    start_epoch: Epoch,
}

impl UvfitsWriter {
    /// Write `vis` to a new uvfits file at `path`.
    ///
    /// `history` is recorded in HISTORY cards, e.g. the command line which produced the data.
    ///
    /// # Errors
    ///
    /// Will error with [`IngestError::UnsupportedFeature`] if `vis` is unphased, has
    /// non-contiguous frequencies, has polarisations which aren't a consecutive run of AIPS
    /// codes, or is empty. Will error with [`IOError::UvfitsWrite`] if a fits operation fails.
    pub fn write_vis_data<P: AsRef<Path>>(
        path: P,
        vis: &VisData,
        history: Option<&str>,
    ) -> Result<(), IngestError> {
        trace!("start UvfitsWriter::write_vis_data");
        let phase_centre = check_writable(vis)?;
        let path = path.as_ref();

        let mut writer = Self::new(path, vis, phase_centre, history).map_err(IOError::from)?;
        writer.write_rows(vis).map_err(IOError::from)?;
        writer.write_antenna_table(vis).map_err(IOError::from)?;
        writer.close().map_err(IOError::from)?;

        debug!(
            "wrote {} rows of {} channels to {}",
            vis.num_times() * vis.num_baselines(),
            vis.num_chans(),
            path.display()
        );
        trace!("end UvfitsWriter::write_vis_data");
        Ok(())
    }

    /// Create the file and write the primary header.
    fn new(
        path: &Path,
        vis: &VisData,
        phase_centre: RADec,
        history: Option<&str>,
    ) -> Result<Self, UvfitsWriteError> {
        // Delete any file that already exists.
        if path.exists() {
            trace!("file {} exists, deleting", path.display());
            std::fs::remove_file(path)?;
        }

        let mut status = 0;
        let c_path = CString::new(path.to_string_lossy().as_bytes())?;
        let mut fptr = ptr::null_mut();
        trace!("initialising fits file with fitsio_sys ({})", path.display());
        unsafe {
            // ffinit = fits_create_file
            fitsio_sys::ffinit(&mut fptr, c_path.as_ptr(), &mut status);
        }
        fits_check_status(status)?;

        let start_epoch = vis.times[0];
        let total_num_rows = vis.num_times() * vis.num_baselines();
        let writer = Self {
            path: path.to_path_buf(),
            fptr,
            total_num_rows,
            current_num_rows: 0,
            start_epoch,
        };

        // -32 means FLOAT_IMG.
        let mut naxes = [
            0,
            NUM_FLOATS_PER_POL as i64,
            vis.pols.len() as i64,
            vis.num_chans() as i64,
            1,
            1,
        ];
        unsafe {
            // ffphpr = fits_write_grphdr
            fitsio_sys::ffphpr(
                fptr,                     /* I - FITS file pointer                        */
                1,                        /* I - does file conform to FITS standard? 1/0  */
                -32,                      /* I - number of bits per data value pixel      */
                naxes.len() as _,         /* I - number of axes in the data array         */
                naxes.as_mut_ptr(),       /* I - length of each data axis                 */
                GROUP_PARAMS.len() as i64, /* I - number of group parameters (usually 0)   */
                total_num_rows as i64,    /* I - number of random groups (usually 1 or 0) */
                1,                        /* I - may FITS file have extensions?           */
                &mut status,              /* IO - error status                            */
            );
        }
        fits_check_status(status)?;

        fits_write_double(fptr, "BSCALE", 1.0, None)?;

        let mut pzero_date_set = false;
        for (i, &param) in GROUP_PARAMS.iter().enumerate() {
            let i = i + 1;
            fits_write_string(fptr, &format!("PTYPE{i}"), param, None)?;
            fits_write_double(fptr, &format!("PSCAL{i}"), 1.0, None)?;
            // Only the first DATE carries the zero level.
            let pzero = if param == "DATE" && !pzero_date_set {
                pzero_date_set = true;
                jd_zero(start_epoch)
            } else {
                0.0
            };
            fits_write_double(fptr, &format!("PZERO{i}"), pzero, None)?;
        }
        fits_write_string(
            fptr,
            "DATE-OBS",
            &get_truncated_date_string(start_epoch),
            None,
        )?;

        fits_write_string(fptr, "CTYPE2", "COMPLEX", None)?;
        fits_write_double(fptr, "CRVAL2", 1.0, None)?;
        fits_write_double(fptr, "CRPIX2", 1.0, None)?;
        fits_write_double(fptr, "CDELT2", 1.0, None)?;

        // Linearly polarised.
        fits_write_string(fptr, "CTYPE3", "STOKES", None)?;
        fits_write_int(fptr, "CRVAL3", vis.pols[0].aips_code() as i64, None)?;
        fits_write_int(fptr, "CDELT3", -1, None)?;
        fits_write_double(fptr, "CRPIX3", 1.0, None)?;

        let centre_chan = vis.num_chans() / 2;
        fits_write_string(fptr, "CTYPE4", "FREQ", None)?;
        fits_write_double(fptr, "CRVAL4", vis.freqs_hz[centre_chan], None)?;
        fits_write_double(fptr, "CDELT4", vis.channel_width_hz, None)?;
        fits_write_int(fptr, "CRPIX4", centre_chan as i64 + 1, None)?;

        fits_write_string(fptr, "CTYPE5", "RA", None)?;
        fits_write_double(fptr, "CRVAL5", phase_centre.ra.to_degrees(), None)?;
        fits_write_int(fptr, "CDELT5", 1, None)?;
        fits_write_int(fptr, "CRPIX5", 1, None)?;

        fits_write_string(fptr, "CTYPE6", "DEC", None)?;
        fits_write_double(fptr, "CRVAL6", phase_centre.dec.to_degrees(), None)?;
        fits_write_int(fptr, "CDELT6", 1, None)?;
        fits_write_int(fptr, "CRPIX6", 1, None)?;

        fits_write_double(fptr, "OBSRA", phase_centre.ra.to_degrees(), None)?;
        fits_write_double(fptr, "OBSDEC", phase_centre.dec.to_degrees(), None)?;
        fits_write_double(fptr, "EPOCH", 2000.0, None)?;

        fits_write_string(fptr, "OBJECT", &vis.object_name, None)?;
        fits_write_string(fptr, "TELESCOP", "MWA", None)?;
        fits_write_string(fptr, "INSTRUME", "MWA", None)?;

        // This is apparently required...
        fits_write_history(fptr, "AIPS WTSCAL =  1.0")?;

        for (key, value) in &vis.extra_keywords {
            // integers stay integers unless that would lose leading zeros
            match value.parse::<i64>() {
                Ok(int) if int.to_string() == *value => fits_write_int(fptr, key, int, None)?,
                _ => fits_write_string(fptr, key, value, None)?,
            }
        }

        let software = format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        fits_write_comment(fptr, &format!("Created by {software}"))?;
        if let Some(history) = history {
            fits_write_history(fptr, history)?;
        }
        fits_write_string(fptr, "SOFTWARE", &software, None)?;

        Ok(writer)
    }

    /// Write every row, time-major.
    fn write_rows(&mut self, vis: &VisData) -> Result<(), UvfitsWriteError> {
        let num_chans = vis.num_chans();
        let num_pols = vis.pols.len();
        let num_group_params = GROUP_PARAMS.len();
        let mut buffer = vec![0.0_f32; num_group_params + NUM_FLOATS_PER_POL * num_pols * num_chans];
        // group param indices, see GROUP_PARAMS
        let (i_u, i_v, i_w, i_baseline, i_date1, i_date2, i_inttim) = (0, 1, 2, 3, 4, 5, 6);
        buffer[i_inttim] = vis.int_time.to_seconds() as f32;

        let uvws = vis.uvws();
        let jd_trunc = Epoch::from_jde_utc(jd_zero(self.start_epoch));

        for (t, &epoch) in vis.times.iter().enumerate() {
            let jd_frac = epoch - jd_trunc;
            let jd_frac_f32 = jd_frac.to_unit(Unit::Day) as f32;
            let jd_remainder_f32 =
                (jd_frac - Duration::from_days(jd_frac_f32 as f64)).to_unit(Unit::Day) as f32;
            buffer[i_date1] = jd_frac_f32;
            buffer[i_date2] = jd_remainder_f32;

            for (b, &(ant1, ant2)) in vis.baselines.iter().enumerate() {
                let uvw = uvws[(t, b)] / VEL_C;
                buffer[i_u] = uvw.u as f32;
                buffer[i_v] = uvw.v as f32;
                buffer[i_w] = uvw.w as f32;
                buffer[i_baseline] = encode_uvfits_baseline(ant1 + 1, ant2 + 1) as f32;

                let row_vis = vis.vis.slice(s![t, b, 0, .., ..]);
                let row_flags = vis.flags.slice(s![t, b, 0, .., ..]);
                let row_nsamples = vis.nsamples.slice(s![t, b, 0, .., ..]);
                for ((chunk, &v), (&flag, &nsamples)) in buffer[num_group_params..]
                    .chunks_exact_mut(NUM_FLOATS_PER_POL)
                    .zip(row_vis.iter())
                    .zip(row_flags.iter().zip(row_nsamples.iter()))
                {
                    chunk[0] = v.re;
                    chunk[1] = v.im;
                    chunk[2] = if flag { -nsamples.abs() } else { nsamples };
                }

                self.write_row(&mut buffer)?;
            }
        }
        Ok(())
    }

    fn write_row(&mut self, row: &mut [f32]) -> Result<(), UvfitsWriteError> {
        if self.current_num_rows + 1 > self.total_num_rows {
            return Err(UvfitsWriteError::BadRowNum {
                row_num: self.current_num_rows,
                num_rows: self.total_num_rows,
            });
        }
        let mut status = 0;
        unsafe {
            // ffpgpe = fits_write_grppar_flt
            fitsio_sys::ffpgpe(
                self.fptr,                         /* I - FITS file pointer                      */
                self.current_num_rows as i64 + 1, /* I - group to write(1 = 1st group)          */
                1,                                 /* I - first vector element to write(1 = 1st) */
                row.len() as i64,                  /* I - number of values to write              */
                row.as_mut_ptr(),                  /* I - array of values that are written       */
                &mut status,                       /* IO - error status                          */
            );
        }
        fits_check_status(status)?;
        self.current_num_rows += 1;
        Ok(())
    }

    /// Write the antenna table. Every row must have been written already.
    fn write_antenna_table(&mut self, vis: &VisData) -> Result<(), UvfitsWriteError> {
        if self.current_num_rows != self.total_num_rows {
            return Err(UvfitsWriteError::NotEnoughRowsWritten {
                current: self.current_num_rows,
                total: self.total_num_rows,
            });
        }

        let col_names = [
            "ANNAME", "STABXYZ", "NOSTA", "MNTSTA", "STAXOF", "POLTYA", "POLAA", "POLCALA",
            "POLTYB", "POLAB", "POLCALB",
        ];
        let col_formats = [
            "8A", "3D", "1J", "1J", "1E", "1A", "1E", "3E", "1A", "1E", "3E",
        ];
        let col_units = [
            "", "METERS", "", "", "METERS", "", "DEGREES", "", "", "DEGREES", "",
        ];
        let c_col_names = c_strings(&col_names)?;
        let c_col_formats = c_strings(&col_formats)?;
        let c_col_units = c_strings(&col_units)?;
        let mut col_name_ptrs = c_string_ptrs(&c_col_names);
        let mut col_format_ptrs = c_string_ptrs(&c_col_formats);
        let mut col_unit_ptrs = c_string_ptrs(&c_col_units);
        let extname = CString::new(ANTENNA_TABLE)?;

        let mut status = 0;
        unsafe {
            // ffcrtb = fits_create_tbl. BINARY_TBL is 2.
            fitsio_sys::ffcrtb(
                self.fptr,                    /* I - FITS file pointer                        */
                2,                            /* I - type of table to create                  */
                0,                            /* I - number of rows in the table              */
                col_names.len() as i32,       /* I - number of columns in the table           */
                col_name_ptrs.as_mut_ptr(),   /* I - name of each column                      */
                col_format_ptrs.as_mut_ptr(), /* I - value of TFORMn keyword for each column  */
                col_unit_ptrs.as_mut_ptr(),   /* I - value of TUNITn keyword for each column  */
                extname.as_ptr(),             /* I - value of EXTNAME keyword, if any         */
                &mut status,                  /* IO - error status                            */
            );
        }
        fits_check_status(status)?;

        unsafe {
            // ffmahd = fits_movabs_hdu
            fitsio_sys::ffmahd(self.fptr, 2, ptr::null_mut(), &mut status);
        }
        fits_check_status(status)?;

        let array_xyz = vis.array_pos.to_geocentric_wgs84();
        fits_write_double(self.fptr, "ARRAYX", array_xyz.x, None)?;
        fits_write_double(self.fptr, "ARRAYY", array_xyz.y, None)?;
        fits_write_double(self.fptr, "ARRAYZ", array_xyz.z, None)?;

        fits_write_double(self.fptr, "FREQ", vis.freqs_hz[vis.num_chans() / 2], None)?;

        // Antenna position reference frame
        fits_write_string(self.fptr, "FRAME", "ITRF", None)?;

        // Greenwich sidereal time at midnight of the first day.
        let midnight = Epoch::from_mjd_utc(self.start_epoch.to_mjd_utc_days().floor());
        let gst = get_lmst(0.0, midnight, Duration::from_seconds(0.0)).to_degrees();
        fits_write_double(self.fptr, "GSTIA0", gst, None)?;
        fits_write_double(self.fptr, "DEGPDY", 3.60985e2, None)?; // Earth's rotation rate

        let date_truncated = get_truncated_date_string(self.start_epoch);
        fits_write_string(self.fptr, "RDATE", &date_truncated, None)?;

        fits_write_double(self.fptr, "POLARX", 0.0, None)?;
        fits_write_double(self.fptr, "POLARY", 0.0, None)?;
        fits_write_double(self.fptr, "UT1UTC", 0.0, Some("UT1 - UTC, a.k.a. DUT1"))?;
        fits_write_double(self.fptr, "DATUTC", 0.0, None)?;

        // AIPS 117 calls this TIMESYS, but Cotter calls in TIMSYS, so we do both.
        fits_write_string(self.fptr, "TIMSYS", "UTC", None)?;
        fits_write_string(self.fptr, "TIMESYS", "UTC", None)?;
        fits_write_string(self.fptr, "ARRNAM", "MWA", None)?;
        fits_write_int(self.fptr, "NUMORB", 0, None)?; // number of orbital parameters in table
        fits_write_int(self.fptr, "NOPCAL", 3, None)?; // Nr pol calibration values / IF(N_pcal)
        fits_write_int(self.fptr, "FREQID", -1, None)?; // Frequency setup number
        fits_write_double(self.fptr, "IATUTC", 33.0, None)?;
        fits_write_int(self.fptr, "EXTVER", 1, None)?;
        // a single spectral window
        fits_write_int(self.fptr, "NO_IF", 1, None)?;
        // Assume the station coordinates are "right handed".
        fits_write_string(self.fptr, "XYZHAND", "RIGHT", None)?;

        let x = CString::new("X")?;
        let y = CString::new("Y")?;
        for (i, antenna) in vis.antennas.iter().enumerate() {
            let row = i as i64 + 1;
            let name = CString::new(antenna.name.as_str())?;
            let XyzGeodetic { x: ax, y: ay, z: az } = antenna.position;
            self.write_col_str(1, row, &name)?;
            self.write_col_dbl(2, row, &mut [ax, ay, az])?;
            self.write_col_int(3, row, row as i32)?;
            self.write_col_int(4, row, 0)?;
            self.write_col_str(6, row, &x)?;
            self.write_col_flt(7, row, &mut [0.0])?;
            self.write_col_flt(8, row, &mut [0.0])?;
            self.write_col_str(9, row, &y)?;
            self.write_col_flt(10, row, &mut [90.0])?;
            self.write_col_flt(11, row, &mut [0.0])?;
        }

        Ok(())
    }

    fn write_col_str(&mut self, col: i32, row: i64, value: &CString) -> Result<(), UvfitsWriteError> {
        let mut status = 0;
        let mut value_ptr = value.as_ptr() as *mut _;
        unsafe {
            // ffpcls = fits_write_col_str
            fitsio_sys::ffpcls(self.fptr, col, row, 1, 1, &mut value_ptr, &mut status);
        }
        fits_check_status(status)?;
        Ok(())
    }

    fn write_col_dbl(&mut self, col: i32, row: i64, values: &mut [f64]) -> Result<(), UvfitsWriteError> {
        let mut status = 0;
        unsafe {
            // ffpcld = fits_write_col_dbl
            fitsio_sys::ffpcld(
                self.fptr,
                col,
                row,
                1,
                values.len() as i64,
                values.as_mut_ptr(),
                &mut status,
            );
        }
        fits_check_status(status)?;
        Ok(())
    }

    fn write_col_flt(&mut self, col: i32, row: i64, values: &mut [f32]) -> Result<(), UvfitsWriteError> {
        let mut status = 0;
        unsafe {
            // ffpcle = fits_write_col_flt
            fitsio_sys::ffpcle(
                self.fptr,
                col,
                row,
                1,
                values.len() as i64,
                values.as_mut_ptr(),
                &mut status,
            );
        }
        fits_check_status(status)?;
        Ok(())
    }

    fn write_col_int(&mut self, col: i32, row: i64, mut value: i32) -> Result<(), UvfitsWriteError> {
        let mut status = 0;
        unsafe {
            // ffpclk = fits_write_col_int
            fitsio_sys::ffpclk(self.fptr, col, row, 1, 1, &mut value, &mut status);
        }
        fits_check_status(status)?;
        Ok(())
    }

    /// Close the file. Dropping the writer closes it too, but can't report failure.
    pub fn close(mut self) -> Result<(), UvfitsWriteError> {
        trace!("closing fits file ({})", self.path.display());
        let mut status = 0;
        unsafe {
            // ffclos = fits_close_file
            fitsio_sys::ffclos(self.fptr, &mut status);
        }
        self.fptr = ptr::null_mut();
        fits_check_status(status)?;
        Ok(())
    }
}

impl Drop for UvfitsWriter {
    fn drop(&mut self) {
        if !self.fptr.is_null() {
            let mut status = 0;
            unsafe {
                fitsio_sys::ffclos(self.fptr, &mut status);
            }
        }
    }
}

fn c_strings(strings: &[&str]) -> Result<Vec<CString>, std::ffi::NulError> {
    strings.iter().map(|&s| CString::new(s)).collect()
}

fn c_string_ptrs(strings: &[CString]) -> Vec<*mut std::os::raw::c_char> {
    strings.iter().map(|s| s.as_ptr() as *mut _).collect()
}

fn fits_write_int(
    fptr: *mut fitsio_sys::fitsfile,
    keyname: &str,
    value: i64,
    comment: Option<&str>,
) -> Result<(), UvfitsWriteError> {
    let mut status = 0;
    let keyname = CString::new(keyname)?;
    let comment = comment.map(CString::new).transpose()?;
    unsafe {
        // ffukyj = fits_update_key_lng
        fitsio_sys::ffukyj(
            fptr,
            keyname.as_ptr(),
            value,
            comment.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
            &mut status,
        );
    }
    fits_check_status(status)?;
    Ok(())
}

fn fits_write_double(
    fptr: *mut fitsio_sys::fitsfile,
    keyname: &str,
    value: f64,
    comment: Option<&str>,
) -> Result<(), UvfitsWriteError> {
    let mut status = 0;
    let keyname = CString::new(keyname)?;
    let comment = comment.map(CString::new).transpose()?;
    unsafe {
        // ffukyd = fits_update_key_dbl
        fitsio_sys::ffukyd(
            fptr,
            keyname.as_ptr(),
            value,
            -15, // no of decimals
            comment.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
            &mut status,
        );
    }
    fits_check_status(status)?;
    Ok(())
}

fn fits_write_string(
    fptr: *mut fitsio_sys::fitsfile,
    keyname: &str,
    value: &str,
    comment: Option<&str>,
) -> Result<(), UvfitsWriteError> {
    let mut status = 0;
    let keyname = CString::new(keyname)?;
    let value = CString::new(value)?;
    let comment = comment.map(CString::new).transpose()?;
    unsafe {
        // ffukys = fits_update_key_str
        fitsio_sys::ffukys(
            fptr,
            keyname.as_ptr(),
            value.as_ptr(),
            comment.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
            &mut status,
        );
    }
    fits_check_status(status)?;
    Ok(())
}

fn fits_write_comment(fptr: *mut fitsio_sys::fitsfile, comment: &str) -> Result<(), UvfitsWriteError> {
    let mut status = 0;
    let comment = CString::new(comment)?;
    unsafe {
        // ffpcom = fits_write_comment
        fitsio_sys::ffpcom(fptr, comment.as_ptr(), &mut status);
    }
    fits_check_status(status)?;
    Ok(())
}

fn fits_write_history(fptr: *mut fitsio_sys::fitsfile, history: &str) -> Result<(), UvfitsWriteError> {
    let mut status = 0;
    let history = CString::new(history)?;
    unsafe {
        // ffphis = fits_write_history
        fitsio_sys::ffphis(fptr, history.as_ptr(), &mut status);
    }
    fits_check_status(status)?;
    Ok(())
}

/// The 1-indexed positions of the group parameters and axes we need.
#[derive(Debug)]
struct Indices {
    /// PTYPE
    baseline: usize,
    /// PTYPE
    date1: usize,
    /// PTYPE
    date2: Option<usize>,
    /// PTYPE
    inttim: Option<usize>,
    /// CTYPE
    ra: usize,
    /// CTYPE
    dec: usize,
}

impl Indices {
    /// Find the PTYPE and CTYPE keys we need. UVWs are recomputed from the antenna positions,
    /// so UU, VV and WW are not needed. The data axes must be COMPLEX, STOKES and FREQ in that
    /// order, which is how every MWA uvfits writer lays them out.
    fn new(reader: &mut CfitsioFile, invalid: &dyn Fn(String) -> IngestError) -> Result<Self, IngestError> {
        let mut ptypes = Vec::with_capacity(8);
        for i in 1.. {
            match reader.read_key(0, &format!("PTYPE{i}"))? {
                Some(ptype) => ptypes.push(ptype),
                None => break,
            }
        }
        let mut baseline = None;
        let mut date1 = None;
        let mut date2 = None;
        let mut inttim = None;
        for (i, key) in ptypes.iter().enumerate() {
            let ii = i + 1;
            match key.as_str() {
                "BASELINE" => baseline = baseline.or(Some(ii)),
                "DATE" | "_DATE" => match (date1, date2) {
                    (None, _) => date1 = Some(ii),
                    (Some(_), None) => date2 = Some(ii),
                    _ => warn!("Found more than 2 uvfits DATE keys, only using the first two"),
                },
                "INTTIM" => inttim = inttim.or(Some(ii)),
                _ => (),
            }
        }
        let missing = |key: &str| invalid(format!("no {key} group parameter"));
        let baseline = baseline.ok_or_else(|| missing("BASELINE"))?;
        let date1 = date1.ok_or_else(|| missing("DATE"))?;

        let mut ctypes = Vec::with_capacity(6);
        for i in 2.. {
            match reader.read_key(0, &format!("CTYPE{i}"))? {
                Some(ctype) => ctypes.push(ctype),
                None => break,
            }
        }
        let position = |name: &str| ctypes.iter().position(|c| c == name).map(|i| i + 2);
        if (position("COMPLEX"), position("STOKES"), position("FREQ")) != (Some(2), Some(3), Some(4)) {
            return Err(invalid(format!(
                "data axes are {ctypes:?}, expected COMPLEX, STOKES, FREQ first"
            )));
        }
        let ra = position("RA").ok_or_else(|| invalid("no RA axis".to_string()))?;
        let dec = position("DEC").ok_or_else(|| invalid("no DEC axis".to_string()))?;

        Ok(Self {
            baseline,
            date1,
            date2,
            inttim,
            ra,
            dec,
        })
    }
}

/// Read a uvfits file written by [`UvfitsWriter`] (or any writer with the same layout) back
/// into a [`VisData`].
///
/// # Errors
///
/// Will error with [`IOError::UvfitsInvalid`] if the file has no antenna table, lacks a group
/// parameter or axis that is needed, has a polarisation which isn't linear, or if its rows don't
/// form a regular time-major grid of baselines.
pub fn read_uvfits<P: AsRef<Path>>(path: P) -> Result<VisData, IngestError> {
    trace!("start read_uvfits");
    let path = path.as_ref();
    let mut reader = CfitsioOpener.open(path)?;
    let file = reader.path().to_string();
    let invalid = |reason: String| -> IngestError {
        IOError::UvfitsInvalid {
            file: file.clone(),
            reason,
        }
        .into()
    };

    let indices = Indices::new(&mut reader, &invalid)?;
    let pcount: usize = get_required_key(&mut reader, 0, "PCOUNT")?;
    let gcount: usize = get_required_key(&mut reader, 0, "GCOUNT")?;
    let num_pols: usize = get_required_key(&mut reader, 0, "NAXIS3")?;
    let num_chans: usize = get_required_key(&mut reader, 0, "NAXIS4")?;

    let first_pol_code: f64 = get_required_key(&mut reader, 0, "CRVAL3")?;
    let pol_step: f64 = get_optional_key(&mut reader, 0, "CDELT3")?.unwrap_or(-1.0);
    let pols = (0..num_pols)
        .map(|i| {
            let code = (first_pol_code + i as f64 * pol_step).round() as i32;
            Pol::from_aips_code(code)
                .ok_or_else(|| invalid(format!("unsupported polarisation code {code}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ref_freq: f64 = get_required_key(&mut reader, 0, "CRVAL4")?;
    let channel_width_hz: f64 = get_required_key(&mut reader, 0, "CDELT4")?;
    let ref_pix: f64 = get_optional_key(&mut reader, 0, "CRPIX4")?.unwrap_or(1.0);
    let freqs_hz: Vec<f64> = (0..num_chans)
        .map(|i| ref_freq + (i as f64 + 1.0 - ref_pix) * channel_width_hz)
        .collect();

    let ra: f64 = get_required_key(&mut reader, 0, &format!("CRVAL{}", indices.ra))?;
    let dec: f64 = get_required_key(&mut reader, 0, &format!("CRVAL{}", indices.dec))?;
    let jd_zero: f64 = get_required_key(&mut reader, 0, &format!("PZERO{}", indices.date1))?;
    let object_name = reader.read_key(0, "OBJECT")?.unwrap_or_default();

    let mut extra_keywords = BTreeMap::new();
    for &key in std::iter::once(&"OBSID").chain(PROVENANCE_KEYS) {
        if let Some(value) = reader.read_key(0, key)? {
            extra_keywords.insert(key.to_string(), value);
        }
    }

    let an_hdu = reader
        .hdu_index(ANTENNA_TABLE)?
        .ok_or_else(|| invalid(format!("no {ANTENNA_TABLE} table")))?;
    let array_pos = XyzGeocentric {
        x: get_required_key(&mut reader, an_hdu, "ARRAYX")?,
        y: get_required_key(&mut reader, an_hdu, "ARRAYY")?,
        z: get_required_key(&mut reader, an_hdu, "ARRAYZ")?,
    }
    .to_earth_wgs84();
    let names = reader.read_col_str(an_hdu, "ANNAME")?;
    let positions = read_stabxyz(&mut reader, an_hdu, names.len())?;
    let antennas: Vec<VisAntenna> = names
        .into_iter()
        .zip(positions)
        .map(|(name, position)| VisAntenna {
            name: name.trim().to_string(),
            position,
        })
        .collect();

    // Group parameters of every row first, to find the shape of the grid.
    let fptr = reader.raw_hdu(0)?;
    let mut group_params = vec![0.0_f32; pcount];
    let mut row_times: Vec<(f32, f32)> = Vec::with_capacity(gcount);
    let mut row_baselines: Vec<(usize, usize)> = Vec::with_capacity(gcount);
    let mut inttim = None;
    for row in 0..gcount {
        let mut status = 0;
        unsafe {
            // ffggpe = fits_read_grppar_flt
            fitsio_sys::ffggpe(
                fptr,
                1 + row as i64,
                1,
                pcount as i64,
                group_params.as_mut_ptr(),
                &mut status,
            );
        }
        fits_check_status(status).map_err(|e| reader.fits_io(e, 0))?;
        let date2 = indices.date2.map_or(0.0, |i| group_params[i - 1]);
        row_times.push((group_params[indices.date1 - 1], date2));
        let (ant1, ant2) = decode_uvfits_baseline(group_params[indices.baseline - 1] as usize);
        if ant1 == 0 || ant2 == 0 || ant1 > antennas.len() || ant2 > antennas.len() {
            return Err(invalid(format!(
                "row {row} has baseline ({ant1}, {ant2}), but there are {} antennas",
                antennas.len()
            )));
        }
        row_baselines.push((ant1 - 1, ant2 - 1));
        if inttim.is_none() {
            inttim = indices.inttim.map(|i| group_params[i - 1]);
        }
    }

    let num_baselines = row_times
        .iter()
        .take_while(|&&t| Some(&t) == row_times.first())
        .count();
    if num_baselines == 0 || gcount % num_baselines != 0 {
        return Err(invalid(format!(
            "{gcount} rows is not a whole number of timesteps of {num_baselines} baselines"
        )));
    }
    let num_times = gcount / num_baselines;
    let baselines = row_baselines[..num_baselines].to_vec();
    for t in 0..num_times {
        let block = t * num_baselines..(t + 1) * num_baselines;
        let time = row_times[block.start];
        if row_times[block.clone()].iter().any(|&rt| rt != time)
            || row_baselines[block] != baselines[..]
        {
            return Err(invalid(format!(
                "rows of timestep {t} are not in the same baseline order as the first timestep"
            )));
        }
    }

    let jd_trunc = Epoch::from_jde_utc(jd_zero);
    let times: Vec<Epoch> = (0..num_times)
        .map(|t| {
            let (date1, date2) = row_times[t * num_baselines];
            (jd_trunc + Duration::from_days(date1 as f64) + Duration::from_days(date2 as f64))
                .round(Duration::from_milliseconds(1.0))
        })
        .collect();
    let int_time = match (inttim, times.as_slice()) {
        (Some(inttim), _) => Duration::from_seconds(inttim as f64),
        (None, [first, second, ..]) => (*second - *first).round(Duration::from_milliseconds(1.0)),
        (None, _) => {
            return Err(invalid(
                "no INTTIM group parameter and only one timestep".to_string(),
            ))
        }
    };

    let shape = (num_times, num_baselines, 1, num_chans, num_pols);
    let mut vis = Array5::from_elem(shape, Complex::default());
    let mut flags = Array5::from_elem(shape, false);
    let mut nsamples = Array5::from_elem(shape, 0.0_f32);
    let mut row_data = vec![0.0_f32; NUM_FLOATS_PER_POL * num_pols * num_chans];
    for row in 0..gcount {
        let (t, b) = (row / num_baselines, row % num_baselines);
        let mut status = 0;
        unsafe {
            // ffgpve = fits_read_img_flt
            fitsio_sys::ffgpve(
                fptr,
                1 + row as i64,
                1,
                row_data.len() as i64,
                0.0,
                row_data.as_mut_ptr(),
                &mut 0,
                &mut status,
            );
        }
        fits_check_status(status).map_err(|e| reader.fits_io(e, 0))?;
        for (i, chunk) in row_data.chunks_exact(NUM_FLOATS_PER_POL).enumerate() {
            let (c, p) = (i / num_pols, i % num_pols);
            vis[(t, b, 0, c, p)] = Complex::new(chunk[0], chunk[1]);
            flags[(t, b, 0, c, p)] = chunk[2].is_sign_negative();
            nsamples[(t, b, 0, c, p)] = chunk[2].abs();
        }
    }

    let vis = VisData {
        vis,
        flags,
        nsamples,
        times,
        int_time,
        baselines,
        freqs_contiguous: VisData::check_freqs_contiguous(&freqs_hz, channel_width_hz),
        freqs_hz,
        channel_width_hz,
        pols,
        antennas,
        array_pos,
        phase_centre: PhaseCentre::Phased(RADec::from_degrees(ra, dec)),
        object_name,
        extra_keywords,
    };
    debug!(
        "read {} timesteps, {} baselines, {} channels from {}",
        num_times,
        num_baselines,
        num_chans,
        path.display()
    );
    trace!("end read_uvfits");
    Ok(vis)
}

/// Read the STABXYZ column of the antenna table.
fn read_stabxyz(
    reader: &mut CfitsioFile,
    hdu_num: usize,
    num_rows: usize,
) -> Result<Vec<XyzGeodetic>, IngestError> {
    let fptr = reader.raw_hdu(hdu_num)?;
    let col_name = CString::new("STABXYZ").map_err(|e| IOError::from(UvfitsWriteError::from(e)))?;
    let mut col_num = 0;
    let mut status = 0;
    let mut values = vec![0.0_f64; 3 * num_rows];
    unsafe {
        // ffgcno = fits_get_colnum, 0 is CASEINSEN
        fitsio_sys::ffgcno(
            fptr,
            0,
            col_name.as_ptr() as *mut _,
            &mut col_num,
            &mut status,
        );
        fits_check_status(status).map_err(|e| reader.fits_io(e, hdu_num))?;
        // ffgcvd = fits_read_col_dbl, reading across rows
        fitsio_sys::ffgcvd(
            fptr,
            col_num,
            1,
            1,
            values.len() as i64,
            0.0,
            values.as_mut_ptr(),
            &mut 0,
            &mut status,
        );
    }
    fits_check_status(status).map_err(|e| reader.fits_io(e, hdu_num))?;
    Ok(values
        .chunks_exact(3)
        .map(|xyz| XyzGeodetic {
            x: xyz[0],
            y: xyz[1],
            z: xyz[2],
        })
        .collect())
}
