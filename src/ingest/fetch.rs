//! Per-file array retrieval through the archive's OPeNDAP interface.

use crate::ingest::dap;
use crate::ingest::session::{join_url, HopFailure, Session};
use crate::model::{ArrayGrid, FileRef, IngestError};
use reqwest::StatusCode;

/// DAP2 binary request for one variable of one file.
pub fn dods_url(base_url: &str, file_ref: &FileRef, variable: &str) -> String {
    format!("{}.dods?{}", join_url(base_url, &file_ref.archive_relative_path), variable)
}

/// A login redirect ends the session; anything else is this file's problem.
fn read_error(path: &str, failure: HopFailure) -> IngestError {
    match failure {
        HopFailure::Rejected(why) => IngestError::Authentication(why),
        HopFailure::Transport(reason) => IngestError::Fetch {
            path: path.to_string(),
            reason,
        },
    }
}

fn check_status(path: &str, status: StatusCode) -> Result<(), IngestError> {
    if status.is_success() {
        return Ok(());
    }
    Err(IngestError::Fetch {
        path: path.to_string(),
        reason: format!("HTTP {} {}", status.as_u16(), status.canonical_reason().unwrap_or("")),
    })
}

/// Fetches and decodes `variable` from one file using `session`.
///
/// # Errors
/// - `Authentication` if the archive no longer accepts the session; the caller
///   must stop using it
/// - `Fetch` for transport failures and non-2xx responses
/// - `Decode` if the response is not a readable DAP2 payload for `variable`
pub fn fetch_grid(
    session: &Session,
    base_url: &str,
    file_ref: &FileRef,
    variable: &str,
) -> Result<ArrayGrid, IngestError> {
    let path = file_ref.archive_relative_path.clone();
    let url = dods_url(base_url, file_ref, variable);

    let response = session.get(&url).map_err(|failure| read_error(&path, failure))?;
    check_status(&path, response.status())?;

    let body = response.bytes().map_err(|e| IngestError::Fetch {
        path: path.clone(),
        reason: format!("body unreadable: {}", e),
    })?;

    let (array, values) = dap::decode_dods(&body, variable).map_err(|reason| IngestError::Decode {
        path: path.clone(),
        reason,
    })?;

    Ok(ArrayGrid {
        file_ref: file_ref.clone(),
        variable: variable.to_string(),
        declared_type: array.dap_type.name().to_string(),
        declared_shape: array.shape,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dods_url_appends_suffix_and_projection() {
        let file_ref = FileRef {
            archive_relative_path: "/OCO2_GEOS_L3CO2_DAY.10r/2021/oco2_GEOS_L3CO2_day_20211001_B10206Ar.nc4".to_string(),
            year: 2021,
            month: 10,
            day: 1,
            collection_tag: "OCO2_GEOS_L3CO2_DAY.10r/B10206Ar".to_string(),
            series_prefix: "/OCO2_GEOS_L3CO2_DAY.10r/2021/oco2_GEOS_L3CO2_day_".to_string(),
        };
        assert_eq!(
            dods_url("https://oco2.gesdisc.eosdis.nasa.gov/opendap", &file_ref, "XCO2"),
            "https://oco2.gesdisc.eosdis.nasa.gov/opendap/OCO2_GEOS_L3CO2_DAY.10r/2021/oco2_GEOS_L3CO2_day_20211001_B10206Ar.nc4.dods?XCO2"
        );
    }

    const PATH: &str = "/OCO2_GEOS_L3CO2_DAY.10r/2021/oco2_GEOS_L3CO2_day_20211003_B10206Ar.nc4";

    #[test]
    fn test_login_redirect_during_read_is_fatal() {
        let err = read_error(PATH, HopFailure::Rejected("redirected to login host".to_string()));
        assert!(matches!(err, IngestError::Authentication(_)), "got {:?}", err);
        assert!(err.is_fatal(), "a rejected session must end the run");
    }

    #[test]
    fn test_transport_failure_during_read_is_isolated() {
        let err = read_error(PATH, HopFailure::Transport("request timed out".to_string()));
        assert_eq!(
            err,
            IngestError::Fetch {
                path: PATH.to_string(),
                reason: "request timed out".to_string()
            }
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_non_success_status_is_fetch_error() {
        assert!(check_status(PATH, StatusCode::OK).is_ok());
        let err = check_status(PATH, StatusCode::INTERNAL_SERVER_ERROR).unwrap_err();
        assert!(
            matches!(err, IngestError::Fetch { ref reason, .. } if reason == "HTTP 500 Internal Server Error"),
            "got {:?}",
            err
        );
        assert!(!err.is_fatal());
    }
}
