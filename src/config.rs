//! Configuration for scheduled runs.
//!
//! Loaded from a TOML file (default `./co2_frames.toml`); every key has a
//! default, so an empty or missing file yields a working configuration for
//! the GES DISC archive. The request month and year may be overridden from the
//! environment, and credentials only ever come from the environment.
//!
//! ```toml
//! [archive]
//! base_url = "https://oco2.gesdisc.eosdis.nasa.gov/opendap"
//!
//! [request]
//! year = 2021
//! month = 10
//!
//! [[collections]]
//! id = "OCO2_GEOS_L3CO2_DAY.10r"
//! variable = "XCO2"
//! filename_pattern = '^oco2_GEOS_L3CO2_day_(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})_(?P<version>\w+)\.nc4$'
//! ```

use crate::collections::{find_collection, Collection, DEFAULT_COLLECTION};
use crate::ingest::session::{SessionOptions, DEFAULT_AUTH_HOST};
use crate::model::{Credentials, IngestError, SelectionWindow, DEFAULT_MAX_COUNT};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./co2_frames.toml";
pub const DEFAULT_BASE_URL: &str = "https://oco2.gesdisc.eosdis.nasa.gov/opendap";

/// Environment variables read by `credentials_from_env`.
pub const ENV_USERNAME: &str = "EARTHDATA_USERNAME";
pub const ENV_PASSWORD: &str = "EARTHDATA_PASSWORD";
/// Environment overrides for the request window.
pub const ENV_YEAR: &str = "CO2_YEAR";
pub const ENV_MONTH: &str = "CO2_MONTH";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub base_url: String,
    pub auth_host: String,
    pub max_redirects: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_host: DEFAULT_AUTH_HOST.to_string(),
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub auth_secs: u64,
    pub listing_secs: u64,
    pub fetch_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            auth_secs: 30,
            listing_secs: 30,
            fetch_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestConfig {
    pub year: i32,
    pub month: u32,
    pub collection: String,
    pub max_count: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            year: 2021,
            month: 10,
            collection: DEFAULT_COLLECTION.to_string(),
            max_count: DEFAULT_MAX_COUNT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// JSON manifest describing the delivered frames.
    pub manifest_path: String,
    pub log_file: Option<String>,
    pub log_level: String,
    pub console_timestamps: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            manifest_path: "oco2_jpeg/manifest.json".to_string(),
            log_file: None,
            log_level: "info".to_string(),
            console_timestamps: true,
        }
    }
}

fn default_data_suffix() -> String {
    ".nc4.html".to_string()
}

fn default_listing_suffix() -> String {
    ".html".to_string()
}

fn default_decimate() -> bool {
    true
}

/// A collection defined in the configuration file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CollectionConfig {
    pub id: String,
    pub title: Option<String>,
    pub variable: String,
    pub filename_pattern: String,
    #[serde(default = "default_data_suffix")]
    pub data_suffix: String,
    #[serde(default = "default_listing_suffix")]
    pub listing_suffix: String,
    #[serde(default = "default_decimate")]
    pub decimate_listing: bool,
}

impl CollectionConfig {
    fn compile(&self) -> Result<Collection, IngestError> {
        Collection::new(
            &self.id,
            self.title.as_deref().unwrap_or(&self.id),
            &self.variable,
            &self.filename_pattern,
            &self.data_suffix,
            &self.listing_suffix,
            self.decimate_listing,
        )
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub timeouts: TimeoutConfig,
    pub request: RequestConfig,
    pub output: OutputConfig,
    pub collections: Vec<CollectionConfig>,
}

/// Parses configuration text.
pub fn parse_config(text: &str) -> Result<Config, IngestError> {
    let config: Config = toml::from_str(text).map_err(|e| IngestError::Config(e.to_string()))?;
    // compile every custom collection now so a bad pattern fails at startup
    for c in &config.collections {
        c.compile()?;
    }
    Ok(config)
}

/// Loads configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, IngestError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| IngestError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_config(&text)
}

impl Config {
    /// Applies `CO2_YEAR` / `CO2_MONTH` from `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), IngestError> {
        if let Some(year) = lookup(ENV_YEAR) {
            self.request.year = year
                .trim()
                .parse()
                .map_err(|_| IngestError::Config(format!("{}='{}' is not a year", ENV_YEAR, year)))?;
        }
        if let Some(month) = lookup(ENV_MONTH) {
            self.request.month = month
                .trim()
                .parse()
                .map_err(|_| IngestError::Config(format!("{}='{}' is not a month", ENV_MONTH, month)))?;
        }
        Ok(())
    }

    /// Resolves the requested collection: configured collections first, then
    /// the built-in registry.
    pub fn collection(&self) -> Result<Collection, IngestError> {
        let id = &self.request.collection;
        if let Some(custom) = self.collections.iter().find(|c| &c.id == id) {
            return custom.compile();
        }
        let spec = find_collection(id).ok_or_else(|| IngestError::Config(format!("unknown collection '{}'", id)))?;
        Collection::from_spec(spec)
    }

    pub fn window(&self) -> Result<SelectionWindow, IngestError> {
        SelectionWindow::with_max_count(self.request.year, self.request.month, self.request.max_count)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            auth_host: self.archive.auth_host.clone(),
            max_redirects: self.archive.max_redirects,
            connect_timeout: Duration::from_secs(self.timeouts.connect_secs),
            auth_timeout: Duration::from_secs(self.timeouts.auth_secs),
            fetch_timeout: Duration::from_secs(self.timeouts.fetch_secs),
        }
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.listing_secs)
    }

    /// One-line description of the configured request, for the run log.
    ///
    /// Carries no credential material.
    pub fn describe_request(&self) -> String {
        format!(
            "Requesting {} for {:04}-{:02} from {}",
            self.request.collection, self.request.year, self.request.month, self.archive.base_url
        )
    }
}

/// Reads Earthdata credentials from `lookup` (normally the process environment).
pub fn credentials_from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials, IngestError> {
    let username = lookup(ENV_USERNAME).ok_or_else(|| IngestError::Config(format!("{} is not set", ENV_USERNAME)))?;
    let password = lookup(ENV_PASSWORD).ok_or_else(|| IngestError::Config(format!("{} is not set", ENV_PASSWORD)))?;
    Credentials::new(username, password)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
