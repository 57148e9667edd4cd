//! Core data types for the CO2 frame acquisition engine.
//!
//! This module defines the shared domain model imported by all other modules:
//! credentials, listing entries, file identities, the selection window, the
//! decoded grid and the error taxonomy. It performs no I/O.

use chrono::NaiveDate;
use ndarray::Array2;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default cap on files per request: roughly one 16-day repeat cycle of
/// daily observation pairs.
pub const DEFAULT_MAX_COUNT: usize = 30;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Earthdata Login credentials for one invocation.
///
/// The password never appears in `Debug` output, so a `Credentials` value can
/// sit inside structures that are logged without leaking it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, IngestError> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() || password.is_empty() {
            return Err(IngestError::InvalidInput(
                "username and password must both be non-empty".to_string(),
            ));
        }
        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Listing and identity types
// ---------------------------------------------------------------------------

/// A raw reference extracted from a directory-listing document.
///
/// `raw_path` is archive-relative and already stripped of the listing-page
/// suffix, e.g. `/OCO2_GEOS_L3CO2_DAY.10r/2021/oco2_GEOS_L3CO2_day_20211001_B10206Ar.nc4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub raw_path: String,
    pub inferred_extension: String,
}

impl ListingEntry {
    /// The last path segment.
    pub fn file_name(&self) -> &str {
        self.raw_path.rsplit('/').next().unwrap_or(&self.raw_path)
    }
}

/// Normalized identity of one remote file.
///
/// Built only by `select::identify`, which guarantees that
/// `(year, month, day)` is a real calendar date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileRef {
    pub archive_relative_path: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Collection id plus the version token from the file name,
    /// e.g. `OCO2_GEOS_L3CO2_DAY.10r/B10206Ar`.
    pub collection_tag: String,
    /// Path text in front of the date field. Files of one series share it.
    pub series_prefix: String,
}

impl FileRef {
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    /// Display label used for frame titles, `YYYY-MM-DD`.
    pub fn date_label(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// The caller's request: which year/month to select and how many files at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionWindow {
    pub year: i32,
    pub month: u32,
    pub max_count: usize,
}

impl SelectionWindow {
    pub fn new(year: i32, month: u32) -> Result<Self, IngestError> {
        Self::with_max_count(year, month, DEFAULT_MAX_COUNT)
    }

    pub fn with_max_count(year: i32, month: u32, max_count: usize) -> Result<Self, IngestError> {
        if !(1000..=9999).contains(&year) {
            return Err(IngestError::InvalidInput(format!("year must have 4 digits, got {}", year)));
        }
        if !(1..=12).contains(&month) {
            return Err(IngestError::InvalidInput(format!("month must be 1-12, got {}", month)));
        }
        Ok(Self { year, month, max_count })
    }
}

// ---------------------------------------------------------------------------
// Decoded payload
// ---------------------------------------------------------------------------

/// Decoded 2-D field for one file's variable of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayGrid {
    pub file_ref: FileRef,
    pub variable: String,
    /// DAP type the archive declared for the variable, e.g. `Float32`.
    pub declared_type: String,
    /// Full declared shape; `values` is the first slice when this has more
    /// than two dimensions.
    pub declared_shape: Vec<usize>,
    pub values: Array2<f64>,
}

/// Summary statistics over the finite values of a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub finite_count: usize,
}

impl ArrayGrid {
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Returns `None` when the grid holds no finite value.
    pub fn stats(&self) -> Option<GridStats> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut finite_count = 0usize;
        for &v in self.values.iter().filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            finite_count += 1;
        }
        if finite_count == 0 {
            return None;
        }
        Some(GridStats { min, max, mean: sum / finite_count as f64, finite_count })
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the engine.
///
/// `is_fatal` separates errors that end an invocation from those that are
/// isolated to one listing entry or one file.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// Credentials rejected, or the session was rejected mid-batch.
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// The archive or login host could not be reached.
    #[error("Network error: {0}")]
    Network(String),
    /// Non-2xx response for the directory listing.
    #[error("Listing fetch error: HTTP {status} for {url}")]
    ListingFetch { url: String, status: u16 },
    /// The listing document contained no data-file anchors.
    #[error("Listing parse error: {0}")]
    ListingParse(String),
    /// One file could not be retrieved.
    #[error("Fetch error for {path}: {reason}")]
    Fetch { path: String, reason: String },
    /// One file was retrieved but its payload could not be decoded.
    #[error("Decode error for {path}: {reason}")]
    Decode { path: String, reason: String },
    /// A file name did not match its collection's pattern.
    #[error("Malformed filename: {0}")]
    MalformedFilename(String),
    #[error("Run cancelled")]
    Cancelled,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IngestError::ListingParse(_)
                | IngestError::Fetch { .. }
                | IngestError::Decode { .. }
                | IngestError::MalformedFilename(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
