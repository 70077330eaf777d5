// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A narrow interface for reading FITS files.
//!
//! Ingestion only ever needs a handful of things from a FITS file: header keys, the shape and
//! contents of float images, and some table columns. [`FitsRead`] captures exactly that, so the
//! pipeline can run against real files through cfitsio ([`CfitsioOpener`]), or against files
//! held in memory in tests.
//!
//! Metafits files are the exception: they are handed to mwalib as a whole, through
//! [`FitsOpen::open_metafits`].
//!
//! HDU numbers are zero-indexed (the primary HDU is 0), and image shapes are given slowest axis
//! first, i.e. `[NAXIS2, NAXIS1]`.

use std::{
    ffi::{CStr, CString},
    os::raw::c_char,
    path::Path,
    ptr,
    str::FromStr,
};

use marlu::{
    fitsio::{self, hdu::HduInfo, FitsFile},
    fitsio_sys,
    mwalib::{MetafitsContext, MwalibError},
};

use super::error::{
    IOError,
    IOError::{BadKey, FitsIO, MissingKey, NotFound},
};

/// Read access to a single FITS file.
pub trait FitsRead {
    /// The path this file was opened from.
    fn path(&self) -> &str;

    /// The total number of HDUs, including the primary.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::FitsIO`] if the file can't be read.
    fn num_hdus(&mut self) -> Result<usize, IOError>;

    /// The index of the HDU with the given `EXTNAME`, if there is one.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::FitsIO`] if the file can't be read.
    fn hdu_index(&mut self, extname: &str) -> Result<Option<usize>, IOError>;

    /// The raw (unquoted) value of a header key, if it is present.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::FitsIO`] if the HDU can't be read.
    fn read_key(&mut self, hdu_num: usize, key: &str) -> Result<Option<String>, IOError>;

    /// The shape of an image HDU, slowest axis first.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::NotFound`] if the HDU is not an image.
    fn image_shape(&mut self, hdu_num: usize) -> Result<Vec<usize>, IOError>;

    /// The contents of an image HDU as floats, in storage order.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::FitsIO`] if the image can't be read.
    fn read_image(&mut self, hdu_num: usize) -> Result<Vec<f32>, IOError>;

    /// The number of rows in a table HDU.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::NotFound`] if the HDU is not a table.
    fn num_rows(&mut self, hdu_num: usize) -> Result<usize, IOError>;

    /// A whole table column, as strings.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::NotFound`] if the column doesn't exist.
    fn read_col_str(&mut self, hdu_num: usize, col: &str) -> Result<Vec<String>, IOError>;

    /// A whole scalar table column, as doubles.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::NotFound`] if the column doesn't exist.
    fn read_col_f64(&mut self, hdu_num: usize, col: &str) -> Result<Vec<f64>, IOError>;

    /// `num_bits` bits from a bit-vector cell in the first column of a table.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::FitsIO`] if the row can't be read.
    fn read_bit_cell(
        &mut self,
        hdu_num: usize,
        row: usize,
        num_bits: usize,
    ) -> Result<Vec<bool>, IOError>;
}

/// Something which can open paths for reading as FITS files.
pub trait FitsOpen {
    /// The reader for an opened file.
    type Reader: FitsRead;

    /// Open the file at `path`.
    ///
    /// # Errors
    ///
    /// Can raise [`IOError::FitsOpen`] (or [`IOError::NotFound`]) if the file can't be opened.
    fn open(&self, path: &Path) -> Result<Self::Reader, IOError>;

    /// Read the metafits (or ppds) file at `path` with mwalib.
    ///
    /// # Errors
    ///
    /// Can raise any [`MwalibError`] from [`MetafitsContext::new`].
    fn open_metafits(&self, path: &Path) -> Result<MetafitsContext, MwalibError> {
        MetafitsContext::new(path, None)
    }
}

/// Read an optional header key, parsing it into `T`.
///
/// # Errors
///
/// Can raise [`IOError::BadKey`] if the value doesn't parse.
pub fn get_optional_key<T: FromStr, R: FitsRead + ?Sized>(
    reader: &mut R,
    hdu_num: usize,
    key: &str,
) -> Result<Option<T>, IOError> {
    match reader.read_key(hdu_num, key)? {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(BadKey {
                fits_filename: reader.path().to_string(),
                hdu_num,
                key: key.to_string(),
                value,
                expected: std::any::type_name::<T>(),
            }),
        },
    }
}

/// Read a header key that must be present, parsing it into `T`.
///
/// # Errors
///
/// Can raise [`IOError::MissingKey`] if the key isn't there, or [`IOError::BadKey`] if it doesn't
/// parse.
pub fn get_required_key<T: FromStr, R: FitsRead + ?Sized>(
    reader: &mut R,
    hdu_num: usize,
    key: &str,
) -> Result<T, IOError> {
    get_optional_key(reader, hdu_num, key)?.ok_or_else(|| MissingKey {
        fits_filename: reader.path().to_string(),
        hdu_num,
        key: key.to_string(),
    })
}

/// Opens files on disk with cfitsio.
#[derive(Debug, Clone, Copy, Default)]
pub struct CfitsioOpener;

impl FitsOpen for CfitsioOpener {
    type Reader = CfitsioFile;

    fn open(&self, path: &Path) -> Result<CfitsioFile, IOError> {
        let fits_filename = path.display().to_string();
        match FitsFile::open(path) {
            Ok(fptr) => Ok(CfitsioFile {
                fptr,
                path: fits_filename,
            }),
            Err(fits_error) => Err(IOError::FitsOpen {
                fits_error,
                fits_filename,
                source_file: file!(),
                source_line: line!(),
            }),
        }
    }
}

/// A FITS file on disk, opened by [`CfitsioOpener`]. The handle is closed on drop.
pub struct CfitsioFile {
    fptr: FitsFile,
    path: String,
}

impl CfitsioFile {
    pub(crate) fn fits_io(&self, fits_error: fitsio::errors::Error, hdu_num: usize) -> IOError {
        FitsIO {
            fits_error,
            fits_filename: self.path.clone(),
            hdu_num,
            source_file: file!(),
            source_line: line!(),
        }
    }

    /// Move to the given HDU, making it current for the low level calls.
    fn goto(&mut self, hdu_num: usize) -> Result<fitsio::hdu::FitsHdu, IOError> {
        self.fptr
            .hdu(hdu_num)
            .map_err(|fits_error| self.fits_io(fits_error, hdu_num))
    }

    /// Make `hdu_num` current and hand out the raw cfitsio pointer, for the calls fitsio doesn't
    /// wrap (random groups, vector columns).
    pub(crate) fn raw_hdu(&mut self, hdu_num: usize) -> Result<*mut fitsio_sys::fitsfile, IOError> {
        self.goto(hdu_num)?;
        Ok(unsafe { self.fptr.as_raw() })
    }
}

impl FitsRead for CfitsioFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn num_hdus(&mut self) -> Result<usize, IOError> {
        let mut num_hdus = 0;
        let mut status = 0;
        unsafe {
            // ffthdu = fits_get_num_hdus
            fitsio_sys::ffthdu(self.fptr.as_raw(), &mut num_hdus, &mut status);
        }
        fitsio::errors::check_status(status).map_err(|e| self.fits_io(e, 0))?;
        Ok(num_hdus.max(0) as usize)
    }

    fn hdu_index(&mut self, extname: &str) -> Result<Option<usize>, IOError> {
        match self.fptr.hdu(extname) {
            Ok(hdu) => Ok(Some(hdu.number)),
            // BAD_HDU_NUM
            Err(fitsio::errors::Error::Fits(e)) if e.status == 301 => Ok(None),
            Err(e) => Err(self.fits_io(e, 0)),
        }
    }

    fn read_key(&mut self, hdu_num: usize, key: &str) -> Result<Option<String>, IOError> {
        self.goto(hdu_num)?;
        let keyword = CString::new(key).map_err(|_| BadKey {
            fits_filename: self.path.clone(),
            hdu_num,
            key: key.to_string(),
            value: String::new(),
            expected: "a keyword without nul bytes",
        })?;
        let mut status = 0;
        let mut long_string_ptr = ptr::null_mut();
        unsafe {
            // ffgkls = fits_read_key_longstr, this handles CONTINUE cards.
            fitsio_sys::ffgkls(
                self.fptr.as_raw(),
                keyword.as_ptr(),
                &mut long_string_ptr,
                ptr::null_mut(),
                &mut status,
            );
            // KEY_NO_EXIST | VALUE_UNDEFINED
            if status == 202 || status == 204 {
                return Ok(None);
            }
            fitsio::errors::check_status(status).map_err(|e| self.fits_io(e, hdu_num))?;
            let value = CStr::from_ptr(long_string_ptr)
                .to_string_lossy()
                .trim()
                .to_string();
            // fffree = fits_free_memory
            fitsio_sys::fffree(long_string_ptr.cast(), &mut 0);
            Ok(Some(value))
        }
    }

    fn image_shape(&mut self, hdu_num: usize) -> Result<Vec<usize>, IOError> {
        match self.goto(hdu_num)?.info {
            HduInfo::ImageInfo { shape, .. } => Ok(shape),
            _ => Err(NotFound {
                fits_filename: self.path.clone(),
                kind: "image hdu",
                name: hdu_num.to_string(),
            }),
        }
    }

    fn read_image(&mut self, hdu_num: usize) -> Result<Vec<f32>, IOError> {
        let hdu = self.goto(hdu_num)?;
        hdu.read_image(&mut self.fptr)
            .map_err(|e| self.fits_io(e, hdu_num))
    }

    fn num_rows(&mut self, hdu_num: usize) -> Result<usize, IOError> {
        match self.goto(hdu_num)?.info {
            HduInfo::TableInfo { num_rows, .. } => Ok(num_rows),
            _ => Err(NotFound {
                fits_filename: self.path.clone(),
                kind: "table hdu",
                name: hdu_num.to_string(),
            }),
        }
    }

    fn read_col_str(&mut self, hdu_num: usize, col: &str) -> Result<Vec<String>, IOError> {
        let hdu = self.goto(hdu_num)?;
        hdu.read_col(&mut self.fptr, col)
            .map_err(|e| self.fits_io(e, hdu_num))
    }

    fn read_col_f64(&mut self, hdu_num: usize, col: &str) -> Result<Vec<f64>, IOError> {
        let hdu = self.goto(hdu_num)?;
        hdu.read_col(&mut self.fptr, col)
            .map_err(|e| self.fits_io(e, hdu_num))
    }

    fn read_bit_cell(
        &mut self,
        hdu_num: usize,
        row: usize,
        num_bits: usize,
    ) -> Result<Vec<bool>, IOError> {
        self.goto(hdu_num)?;
        let mut cell: Vec<c_char> = vec![0; num_bits];
        let mut status = 0;
        unsafe {
            // ffgcx = fits_read_col_bit
            fitsio_sys::ffgcx(
                self.fptr.as_raw(),
                1,
                1 + row as i64,
                1,
                num_bits as i64,
                cell.as_mut_ptr(),
                &mut status,
            );
        }
        fitsio::errors::check_status(status).map_err(|e| self.fits_io(e, hdu_num))?;
        Ok(cell.into_iter().map(|bit| bit != 0).collect())
    }
}
