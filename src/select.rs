//! File identity and selection.
//!
//! Turns raw listing entries into `FileRef`s using the collection's
//! named-capture filename pattern, then keeps the files of the requested month
//! in listing order, capped at the window's `max_count`.
//!
//! A file name that does not match its pattern, or whose captured fields do not
//! form a real date, is excluded and counted rather than guessed at.

use crate::collections::Collection;
use crate::logging::{self, Stage};
use crate::model::{FileRef, IngestError, ListingEntry, SelectionWindow};
use chrono::NaiveDate;

/// Result of filtering one listing against a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Selected files, in listing order, at most `max_count`.
    pub file_refs: Vec<FileRef>,
    /// Entries excluded because their file name is malformed.
    pub malformed: usize,
    /// Files of the requested month before the cap was applied.
    pub matched: usize,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.file_refs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Derives the identity of one listing entry.
pub fn identify(entry: &ListingEntry, collection: &Collection) -> Result<FileRef, IngestError> {
    let name = entry.file_name();
    let malformed = |why: &str| IngestError::MalformedFilename(format!("{} ({})", entry.raw_path, why));

    let caps = collection
        .filename_pattern()
        .captures(name)
        .ok_or_else(|| malformed("does not match collection pattern"))?;

    // The pattern is validated to contain these groups; a group may still be
    // optional inside the regex, hence the Option handling.
    let year_match = caps.name("year").ok_or_else(|| malformed("no year"))?;
    let month_str = caps.name("month").ok_or_else(|| malformed("no month"))?.as_str();
    let day_str = caps.name("day").ok_or_else(|| malformed("no day"))?.as_str();

    let mut year: i32 = year_match.as_str().parse().map_err(|_| malformed("year is not numeric"))?;
    if year_match.as_str().len() == 2 {
        year += 2000;
    }
    let month: u32 = month_str.parse().map_err(|_| malformed("month is not numeric"))?;
    let day: u32 = day_str.parse().map_err(|_| malformed("day is not numeric"))?;

    if NaiveDate::from_ymd_opt(year, month, day).is_none() {
        return Err(malformed(&format!("{:04}-{:02}-{:02} is not a calendar date", year, month, day)));
    }

    let version = caps.name("version").map(|m| m.as_str()).unwrap_or("");
    let collection_tag = if version.is_empty() {
        collection.id.clone()
    } else {
        format!("{}/{}", collection.id, version)
    };

    let dir = &entry.raw_path[..entry.raw_path.len() - name.len()];
    let series_prefix = format!("{}{}", dir, &name[..year_match.start()]);

    Ok(FileRef {
        archive_relative_path: entry.raw_path.clone(),
        year,
        month,
        day,
        collection_tag,
        series_prefix,
    })
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Filters a listing down to the files of `window.month`.
///
/// Only files of `window.year` sharing the series prefix of the first
/// well-formed entry are eligible. Listing order is kept; the result is
/// truncated to `window.max_count`.
pub fn select_files(entries: &[ListingEntry], window: &SelectionWindow, collection: &Collection) -> Selection {
    let mut selection = Selection::default();
    let mut series: Option<String> = None;

    for entry in entries {
        let file_ref = match identify(entry, collection) {
            Ok(r) => r,
            Err(e) => {
                selection.malformed += 1;
                logging::warn(Stage::Select, Some(entry.file_name()), &e.to_string());
                continue;
            }
        };

        let prefix = series.get_or_insert_with(|| file_ref.series_prefix.clone());
        if file_ref.series_prefix != *prefix || file_ref.year != window.year || file_ref.month != window.month {
            continue;
        }

        selection.matched += 1;
        if selection.file_refs.len() < window.max_count {
            selection.file_refs.push(file_ref);
        }
    }

    logging::info(
        Stage::Select,
        None,
        &format!(
            "{:04}-{:02}: {} of {} listed files match, {} selected (cap {}), {} malformed",
            window.year,
            window.month,
            selection.matched,
            entries.len(),
            selection.file_refs.len(),
            window.max_count,
            selection.malformed
        ),
    );

    selection
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
