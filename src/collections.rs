//! Collection registry for the CO2 frame acquisition engine.
//!
//! A collection is a product/version grouping on the archive whose files share
//! one filename convention. Each entry names the variable of interest, the
//! listing suffixes, and the named-capture pattern that yields a file's date.
//! All other modules look collections up here (or in the configuration, which
//! may add to or override this registry) instead of hardcoding filename offsets.

use crate::model::IngestError;
use regex::Regex;

// ---------------------------------------------------------------------------
// Static registry
// ---------------------------------------------------------------------------

/// Built-in description of one collection.
pub struct CollectionSpec {
    /// Archive directory name, also used as the collection path.
    pub id: &'static str,
    /// Frame title prefix.
    pub title: &'static str,
    /// Variable decoded from every file.
    pub variable: &'static str,
    /// Regex with named groups `year`, `month`, `day` and optionally `version`,
    /// matched against the bare file name.
    pub filename_pattern: &'static str,
    /// Suffix of data-file anchors in the listing document.
    pub data_suffix: &'static str,
    /// Part of the anchor suffix that belongs to the listing page, not the file.
    pub listing_suffix: &'static str,
    /// Whether the listing repeats every file row.
    pub decimate_listing: bool,
}

/// Collections known to the engine.
///
/// Sources:
///   - Directory layout and file names: GES DISC OPeNDAP (oco2.gesdisc.eosdis.nasa.gov/opendap)
pub static COLLECTION_REGISTRY: &[CollectionSpec] = &[CollectionSpec {
    id: "OCO2_GEOS_L3CO2_DAY.10r",
    title: "OCO2-GEOS_L3_CO2_Day",
    variable: "XCO2",
    filename_pattern: r"^oco2_GEOS_L3CO2_day_(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})_(?P<version>[A-Za-z0-9]+)\.nc4$",
    data_suffix: ".nc4.html",
    listing_suffix: ".html",
    decimate_listing: true,
}];

/// Collection used when the configuration does not name one.
pub const DEFAULT_COLLECTION: &str = "OCO2_GEOS_L3CO2_DAY.10r";

/// Looks up a built-in collection by id. Returns `None` if not found.
pub fn find_collection(id: &str) -> Option<&'static CollectionSpec> {
    COLLECTION_REGISTRY.iter().find(|c| c.id == id)
}

// ---------------------------------------------------------------------------
// Compiled collection
// ---------------------------------------------------------------------------

/// A collection with its filename pattern compiled and validated.
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: String,
    pub title: String,
    pub variable: String,
    pub data_suffix: String,
    pub listing_suffix: String,
    pub decimate_listing: bool,
    pattern: Regex,
}

impl Collection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: &str,
        title: &str,
        variable: &str,
        filename_pattern: &str,
        data_suffix: &str,
        listing_suffix: &str,
        decimate_listing: bool,
    ) -> Result<Self, IngestError> {
        if id.is_empty() || id.contains('/') {
            return Err(IngestError::Config(format!("invalid collection id '{}'", id)));
        }
        if variable.is_empty() {
            return Err(IngestError::Config(format!("collection '{}' has no variable", id)));
        }
        if !data_suffix.ends_with(listing_suffix) {
            return Err(IngestError::Config(format!(
                "collection '{}': data suffix '{}' must end with listing suffix '{}'",
                id, data_suffix, listing_suffix
            )));
        }

        let pattern = Regex::new(filename_pattern).map_err(|e| {
            IngestError::Config(format!("collection '{}': bad filename pattern: {}", id, e))
        })?;
        let names: Vec<&str> = pattern.capture_names().flatten().collect();
        for required in ["year", "month", "day"] {
            if !names.contains(&required) {
                return Err(IngestError::Config(format!(
                    "collection '{}': filename pattern lacks the '{}' group",
                    id, required
                )));
            }
        }

        Ok(Self {
            id: id.to_string(),
            title: title.to_string(),
            variable: variable.to_string(),
            data_suffix: data_suffix.to_string(),
            listing_suffix: listing_suffix.to_string(),
            decimate_listing,
            pattern,
        })
    }

    pub fn from_spec(spec: &CollectionSpec) -> Result<Self, IngestError> {
        Self::new(
            spec.id,
            spec.title,
            spec.variable,
            spec.filename_pattern,
            spec.data_suffix,
            spec.listing_suffix,
            spec.decimate_listing,
        )
    }

    pub fn filename_pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Archive path of one year's directory, e.g. `/OCO2_GEOS_L3CO2_DAY.10r/2021`.
    pub fn year_path(&self, year: i32) -> String {
        format!("/{}/{}", self.id, year)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registry_entry_compiles() {
        for spec in COLLECTION_REGISTRY {
            Collection::from_spec(spec)
                .unwrap_or_else(|e| panic!("registry entry '{}' is invalid: {}", spec.id, e));
        }
    }

    #[test]
    fn test_no_duplicate_collection_ids() {
        let mut seen = std::collections::HashSet::new();
        for spec in COLLECTION_REGISTRY {
            assert!(seen.insert(spec.id), "duplicate collection id '{}'", spec.id);
        }
    }

    #[test]
    fn test_default_collection_is_registered() {
        let spec = find_collection(DEFAULT_COLLECTION).expect("default collection must be in registry");
        assert_eq!(spec.variable, "XCO2");
    }

    #[test]
    fn test_find_collection_returns_none_for_unknown_id() {
        assert!(find_collection("OCO9_NOPE").is_none());
    }

    #[test]
    fn test_geos_pattern_extracts_date_and_version() {
        let c = Collection::from_spec(find_collection(DEFAULT_COLLECTION).unwrap()).unwrap();
        let caps = c
            .filename_pattern()
            .captures("oco2_GEOS_L3CO2_day_20211001_B10206Ar.nc4")
            .expect("canonical GEOS L3 file name should match");
        assert_eq!(&caps["year"], "2021");
        assert_eq!(&caps["month"], "10");
        assert_eq!(&caps["day"], "01");
        assert_eq!(&caps["version"], "B10206Ar");
    }

    #[test]
    fn test_pattern_without_date_groups_is_rejected() {
        let err = Collection::new("X", "X", "v", r"^x_(?P<year>\d{4})\.nc4$", ".nc4.html", ".html", false)
            .unwrap_err();
        assert!(matches!(err, IngestError::Config(ref m) if m.contains("month")), "got {:?}", err);
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        assert!(Collection::new("X", "X", "v", r"(?P<year", ".nc4.html", ".html", false).is_err());
    }

    #[test]
    fn test_data_suffix_must_contain_listing_suffix() {
        let pattern = r"(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})";
        assert!(Collection::new("X", "X", "v", pattern, ".nc4", ".html", false).is_err());
    }

    #[test]
    fn test_year_path_layout() {
        let c = Collection::from_spec(&COLLECTION_REGISTRY[0]).unwrap();
        assert_eq!(c.year_path(2021), "/OCO2_GEOS_L3CO2_DAY.10r/2021");
    }
}
