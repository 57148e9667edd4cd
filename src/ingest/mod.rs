//! Archive clients.
//!
//! Submodules:
//! - `session`: Earthdata Login handshake and the reusable session
//! - `listing`: directory-listing scraping
//! - `dap`: DAP2 binary payload decoding
//! - `fetch`: per-file grid retrieval
//!
//! `HttpArchive` wires them together behind the pipeline's `Archive` seam.

pub mod dap;
pub mod fetch;
pub mod listing;
pub mod session;

use crate::collections::Collection;
use crate::model::{ArrayGrid, Credentials, FileRef, IngestError};
use crate::pipeline::Archive;
use listing::Listing;
use reqwest::blocking::Client;
use session::{Session, SessionOptions};
use std::time::Duration;

/// The GES DISC OPeNDAP archive (or any Hyrax server behind Earthdata Login).
pub struct HttpArchive {
    base_url: String,
    listing_client: Client,
    session_options: SessionOptions,
    listing_timeout: Duration,
}

impl HttpArchive {
    pub fn new(base_url: &str, session_options: SessionOptions, listing_timeout: Duration) -> Result<Self, IngestError> {
        let listing_client = Client::builder()
            .connect_timeout(session_options.connect_timeout)
            .build()
            .map_err(|e| IngestError::Network(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            listing_client,
            session_options,
            listing_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Archive for HttpArchive {
    type Session = Session;

    fn list_files(&self, collection: &Collection, year: i32) -> Result<Listing, IngestError> {
        listing::list_files(&self.listing_client, &self.base_url, collection, year, self.listing_timeout)
    }

    fn obtain_session(&self, probe_path: &str, credentials: &Credentials) -> Result<Session, IngestError> {
        session::obtain_session(&self.base_url, probe_path, credentials, &self.session_options)
    }

    fn fetch_grid(&self, session: &Session, file_ref: &FileRef, variable: &str) -> Result<ArrayGrid, IngestError> {
        fetch::fetch_grid(session, &self.base_url, file_ref, variable)
    }
}
