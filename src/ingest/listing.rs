//! Archive directory-listing client.
//!
//! Retrieves the Hyrax `contents.html` page for one collection year and
//! extracts the downloadable data files it links to.
//!
//! WATCH OUT - the listing is HTML meant for people, so this is scraping. As of
//! the current Hyrax markup every dataset row links the `.nc4.html` form page
//! twice (file name column and "html" column), which is why collections that
//! set `decimate_listing` keep every second anchor only. The pairing is checked
//! and a warning is logged when it no longer holds.

use crate::collections::Collection;
use crate::ingest::session::join_url;
use crate::logging::{self, Stage};
use crate::model::{IngestError, ListingEntry};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use std::time::Duration;

lazy_static! {
    static ref ANCHOR_RE: Regex = Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).unwrap();
}

/// Name of the listing document inside a year directory.
pub const CONTENTS_PAGE: &str = "contents.html";

/// Data files discovered in one listing document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub url: String,
    /// Matching anchors before decimation.
    pub raw_anchor_count: usize,
    pub entries: Vec<ListingEntry>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The non-fatal parse error an empty listing stands for.
    pub fn parse_error(&self) -> Option<IngestError> {
        if self.entries.is_empty() {
            Some(IngestError::ListingParse(format!("no data-file anchors in {}", self.url)))
        } else {
            None
        }
    }
}

/// URL of the listing document for one collection year.
pub fn listing_url(base_url: &str, collection: &Collection, year: i32) -> String {
    join_url(base_url, &format!("{}/{}", collection.year_path(year), CONTENTS_PAGE))
}

/// Fetches and parses the listing for `year`.
///
/// The request is unauthenticated and bounded by `timeout`.
///
/// # Errors
/// - `ListingFetch` on a non-2xx response
/// - `Network` if the request cannot be completed
///
/// A document without data-file anchors is not an error; the returned
/// `Listing` is empty and `parse_error` describes it.
pub fn list_files(
    client: &Client,
    base_url: &str,
    collection: &Collection,
    year: i32,
    timeout: Duration,
) -> Result<Listing, IngestError> {
    let url = listing_url(base_url, collection, year);
    logging::debug(Stage::Listing, Some(&collection.id), &format!("GET {}", url));

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .map_err(|e| IngestError::Network(format!("listing request {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::ListingFetch { url, status: status.as_u16() });
    }

    let html = response
        .text()
        .map_err(|e| IngestError::Network(format!("listing body {} unreadable: {}", url, e)))?;

    let mut listing = parse_listing(&html, &collection.year_path(year), collection);
    listing.url = url;

    if let Some(err) = listing.parse_error() {
        logging::warn(Stage::Listing, Some(&collection.id), &err.to_string());
    } else {
        logging::info(
            Stage::Listing,
            Some(&collection.id),
            &format!(
                "{}: {} files ({} anchors)",
                year,
                listing.entries.len(),
                listing.raw_anchor_count
            ),
        );
    }

    Ok(listing)
}

/// Extracts data-file entries from a listing document.
///
/// `year_path` is the archive directory the document lists, e.g.
/// `/OCO2_GEOS_L3CO2_DAY.10r/2021`. The returned `Listing` has an empty `url`.
pub fn parse_listing(html: &str, year_path: &str, collection: &Collection) -> Listing {
    let dir = year_path.trim_end_matches('/');

    let raw: Vec<ListingEntry> = ANCHOR_RE
        .captures_iter(html)
        .map(|cap| cap[1].trim().to_string())
        .filter(|href| href.ends_with(&collection.data_suffix))
        .map(|href| {
            let file = href[..href.len() - collection.listing_suffix.len()].to_string();
            let name = file.rsplit('/').next().unwrap_or(&file).to_string();
            let inferred_extension = name.rsplit('.').next().unwrap_or_default().to_string();
            ListingEntry {
                raw_path: format!("{}/{}", dir, name),
                inferred_extension,
            }
        })
        .collect();

    let raw_anchor_count = raw.len();
    let entries = if collection.decimate_listing {
        decimate(raw, &collection.id)
    } else {
        raw
    };

    Listing {
        url: String::new(),
        raw_anchor_count,
        entries,
    }
}

/// Keeps anchors 0, 2, 4, ... and reports pairs that were not duplicates.
fn decimate(raw: Vec<ListingEntry>, collection_id: &str) -> Vec<ListingEntry> {
    let unpaired: Vec<String> = raw
        .chunks(2)
        .filter(|pair| pair.len() == 2 && pair[0] != pair[1])
        .map(|pair| format!("{} / {}", pair[0].file_name(), pair[1].file_name()))
        .collect();

    if !unpaired.is_empty() {
        logging::warn(
            Stage::Listing,
            Some(collection_id),
            &format!(
                "{} anchor pair(s) are not duplicates, decimation drops real files; listing markup may have changed (first: {})",
                unpaired.len(),
                unpaired[0]
            ),
        );
    }
    if raw.len() % 2 == 1 {
        logging::warn(
            Stage::Listing,
            Some(collection_id),
            &format!("odd anchor count {} in a paired listing", raw.len()),
        );
    }

    raw.into_iter().step_by(2).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
