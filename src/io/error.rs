// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur in the io module

use marlu::fitsio;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur in file io operations
pub enum IOError {
    /// Error when opening a fits file.
    #[error("{source_file}:{source_line}\nCouldn't open {fits_filename}: {fits_error}")]
    FitsOpen {
        /// The [`fitsio::errors::Error`]
        fits_error: fitsio::errors::Error,
        /// The filename of the fits file
        fits_filename: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A generic error associated with the fitsio crate.
    #[error("{source_file}:{source_line}\n{fits_filename} HDU {hdu_num}: {fits_error}")]
    FitsIO {
        /// The [`fitsio::errors::Error`]
        fits_error: fitsio::errors::Error,
        /// The filename of the fits file where the error occurred
        fits_filename: String,
        /// The hdu number in the fits file where the error occurred
        hdu_num: usize,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A header key that must be present is missing.
    #[error("{fits_filename} HDU {hdu_num}: required key {key} is missing")]
    MissingKey {
        /// The filename of the fits file
        fits_filename: String,
        /// The hdu number the key was expected in
        hdu_num: usize,
        /// The key
        key: String,
    },

    /// A header key was present, but could not be parsed.
    #[error("{fits_filename} HDU {hdu_num}: couldn't parse {key}={value:?} as {expected}")]
    BadKey {
        /// The filename of the fits file
        fits_filename: String,
        /// The hdu number the key was found in
        hdu_num: usize,
        /// The key
        key: String,
        /// The raw value of the key
        value: String,
        /// A description of the expected type
        expected: &'static str,
    },

    /// An HDU or table column that was needed doesn't exist.
    #[error("{fits_filename}: no such {kind} {name}")]
    NotFound {
        /// The filename of the fits file
        fits_filename: String,
        /// What kind of thing (hdu, column)
        kind: &'static str,
        /// The name or index that was requested
        name: String,
    },

    #[error("{0}")]
    /// Error derived from [`fitsio::errors::Error`]
    FitsioError(#[from] fitsio::errors::Error),

    /// Error to describe some kind of inconsistent state within an mwaf file.
    #[error("Inconsistent mwaf file (file: {file}, expected: {expected}, found: {found})")]
    MwafInconsistent {
        /// The filename of the fits file where the error occurred
        file: String,
        /// The value that was expected
        expected: String,
        /// The unexpected value that was found
        found: String,
    },

    /// Error for a uvfits file which can't be interpreted.
    #[error("{file}: {reason}")]
    UvfitsInvalid {
        /// The filename of the uvfits file
        file: String,
        /// What went wrong
        reason: String,
    },

    /// Error derived from [`UvfitsWriteError`]
    #[error(transparent)]
    UvfitsWrite(#[from] UvfitsWriteError),

    #[error("{0}")]
    /// Error derived from [`std::io::Error`]
    StdIo(#[from] std::io::Error),
}

/// Errors that can occur while writing a uvfits file.
#[derive(Error, Debug)]
pub enum UvfitsWriteError {
    /// An error when trying to write to an unexpected row.
    #[error("Tried to write to row number {row_num}, but only {num_rows} rows are expected")]
    BadRowNum {
        /// The row number (0-indexed)
        row_num: usize,
        /// Total number of rows expected.
        num_rows: usize,
    },

    /// An error when less rows were written to an HDU than expected.
    #[error("Expected {total} uvfits rows to be written, but only {current} were written")]
    NotEnoughRowsWritten {
        /// Number of rows written
        current: usize,
        /// Total number of rows expected.
        total: usize,
    },

    /// An error associated with fitsio.
    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),

    /// An error when converting a Rust string to a C string.
    #[error(transparent)]
    BadString(#[from] std::ffi::NulError),

    /// An IO error.
    #[error(transparent)]
    IO(#[from] std::io::Error),
}
