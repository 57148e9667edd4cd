//! Earthdata Login session handling.
//!
//! The archive protects its data URLs with an OAuth redirect dance through the
//! Earthdata Login host: an unauthenticated request to a data URL is redirected
//! to the login host, which accepts HTTP Basic credentials and redirects back
//! to the archive with a code; the archive then sets its session cookie.
//!
//! Redirects are followed by hand so that credentials are only ever sent to
//! the login host, and so that a later data request bounced to the login host
//! can be recognised as a rejected session instead of being silently followed.

use crate::logging::{self, Stage};
use crate::model::{Credentials, IngestError};
use reqwest::blocking::{Client, Response};
use reqwest::header::LOCATION;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;

/// Earthdata Login production host.
pub const DEFAULT_AUTH_HOST: &str = "urs.earthdata.nasa.gov";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Network settings for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub auth_host: String,
    pub max_redirects: usize,
    pub connect_timeout: Duration,
    /// Bound on each request of the login handshake.
    pub auth_timeout: Duration,
    /// Bound on each data request made with the session.
    pub fetch_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auth_host: DEFAULT_AUTH_HOST.to_string(),
            max_redirects: 10,
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(120),
        }
    }
}

// ---------------------------------------------------------------------------
// Redirect handling
// ---------------------------------------------------------------------------

/// Why a redirect walk stopped without a usable response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HopFailure {
    /// The login host refused the credentials, or the archive no longer
    /// accepts the session.
    Rejected(String),
    /// Anything else: unreachable host, timeout, broken redirect, hop limit.
    Transport(String),
}

/// What to do with one response of a redirect walk.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HopDecision {
    Follow(Url),
    Accept,
    Fail(HopFailure),
}

fn is_login_host(url: &Url, auth_host: &str) -> bool {
    url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(auth_host))
}

/// Decides the next step after receiving `status` for a request to `current`.
pub(crate) fn decide_hop(current: &Url, status: StatusCode, location: Option<&str>, auth_host: &str) -> HopDecision {
    if status.is_redirection() {
        let Some(location) = location else {
            return HopDecision::Fail(HopFailure::Transport(format!(
                "HTTP {} from {} without a Location header",
                status.as_u16(),
                current.host_str().unwrap_or("?")
            )));
        };
        return match current.join(location) {
            Ok(next) => HopDecision::Follow(next),
            Err(e) => HopDecision::Fail(HopFailure::Transport(format!(
                "unusable redirect target '{}': {}",
                location, e
            ))),
        };
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return HopDecision::Fail(HopFailure::Rejected(format!(
            "HTTP {} from {}",
            status.as_u16(),
            current.host_str().unwrap_or("?")
        )));
    }

    // A page served by the login host itself is its login form.
    if status.is_success() && is_login_host(current, auth_host) {
        return HopDecision::Fail(HopFailure::Rejected(
            "login host answered with its login page".to_string(),
        ));
    }

    HopDecision::Accept
}

fn describe_send_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

/// Walks a redirect chain starting at `start`.
///
/// With `credentials`, requests to the login host carry Basic auth. Without
/// them, reaching the login host at all means the session was rejected.
fn walk(
    client: &Client,
    start: &str,
    credentials: Option<&Credentials>,
    auth_host: &str,
    max_redirects: usize,
    timeout: Duration,
) -> Result<Response, HopFailure> {
    let mut url = Url::parse(start).map_err(|e| HopFailure::Transport(format!("invalid URL '{}': {}", start, e)))?;

    for _ in 0..=max_redirects {
        let on_login_host = is_login_host(&url, auth_host);
        let mut request = client.get(url.clone()).timeout(timeout);
        if on_login_host {
            match credentials {
                Some(c) => request = request.basic_auth(c.username(), Some(c.password())),
                None => {
                    return Err(HopFailure::Rejected(
                        "archive redirected to the login host; session no longer accepted".to_string(),
                    ))
                }
            }
        }

        let response = request.send().map_err(|e| HopFailure::Transport(describe_send_error(&e)))?;
        let location = response.headers().get(LOCATION).and_then(|v| v.to_str().ok()).map(String::from);

        match decide_hop(&url, response.status(), location.as_deref(), auth_host) {
            HopDecision::Follow(next) => url = next,
            HopDecision::Accept => return Ok(response),
            HopDecision::Fail(failure) => return Err(failure),
        }
    }

    Err(HopFailure::Transport(format!("more than {} redirects", max_redirects)))
}

/// Joins a base URL and an archive path with exactly one slash between them.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An authenticated handle for repeated reads against one archive.
///
/// Holds the HTTP client and its cookie jar. Created once per invocation and
/// never modified afterwards; pass it by reference to every fetch.
pub struct Session {
    client: Client,
    base_url: String,
    credentials: Credentials,
    options: SessionOptions,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("auth_host", &self.options.auth_host)
            .finish()
    }
}

impl Session {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn username(&self) -> &str {
        self.credentials.username()
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.options.fetch_timeout
    }

    /// GET with the session's cookies, following archive-side redirects.
    pub(crate) fn get(&self, url: &str) -> Result<Response, HopFailure> {
        walk(
            &self.client,
            url,
            None,
            &self.options.auth_host,
            self.options.max_redirects,
            self.options.fetch_timeout,
        )
    }
}

fn handshake_error(failure: HopFailure) -> IngestError {
    match failure {
        HopFailure::Rejected(why) => IngestError::Authentication(why),
        HopFailure::Transport(why) => IngestError::Network(why),
    }
}

/// The probe must end in a 2xx once the redirect chain settles.
fn check_probe_status(probe_url: &str, status: StatusCode) -> Result<(), IngestError> {
    if status.is_success() {
        return Ok(());
    }
    Err(IngestError::Network(format!(
        "handshake probe {} returned HTTP {}",
        probe_url,
        status.as_u16()
    )))
}

/// Builds the blocking client shared by the handshake and all data reads.
pub fn build_client(options: &SessionOptions) -> Result<Client, IngestError> {
    let jar = Arc::new(reqwest::cookie::Jar::default());
    Client::builder()
        .cookie_provider(jar)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(options.connect_timeout)
        .build()
        .map_err(|e| IngestError::Network(format!("could not build HTTP client: {}", e)))
}

/// Performs the login handshake against `base_url + probe_path`.
///
/// # Errors
/// - `Authentication` if the login host rejects the credentials
/// - `Network` if either host is unreachable or the probe fails otherwise
pub fn obtain_session(
    base_url: &str,
    probe_path: &str,
    credentials: &Credentials,
    options: &SessionOptions,
) -> Result<Session, IngestError> {
    if credentials.username().is_empty() || credentials.password().is_empty() {
        return Err(IngestError::InvalidInput("credentials must be non-empty".to_string()));
    }

    let client = build_client(options)?;
    let probe_url = join_url(base_url, probe_path);
    logging::debug(Stage::Session, Some(probe_path), &format!("handshake via {}", options.auth_host));

    let response = walk(
        &client,
        &probe_url,
        Some(credentials),
        &options.auth_host,
        options.max_redirects,
        options.auth_timeout,
    )
    .map_err(handshake_error)?;
    check_probe_status(&probe_url, response.status())?;

    logging::info(Stage::Session, None, &format!("session established for {}", base_url));

    Ok(Session {
        client,
        base_url: base_url.to_string(),
        credentials: credentials.clone(),
        options: options.clone(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    const ARCHIVE: &str = "https://oco2.gesdisc.eosdis.nasa.gov/opendap/OCO2_GEOS_L3CO2_DAY.10r/2021/f.nc4";

    #[test]
    fn test_redirect_to_login_host_is_followed() {
        let d = decide_hop(
            &url(ARCHIVE),
            StatusCode::FOUND,
            Some("https://urs.earthdata.nasa.gov/oauth/authorize?client_id=abc"),
            DEFAULT_AUTH_HOST,
        );
        assert_eq!(d, HopDecision::Follow(url("https://urs.earthdata.nasa.gov/oauth/authorize?client_id=abc")));
    }

    #[test]
    fn test_relative_redirect_is_resolved_against_current_url() {
        let d = decide_hop(&url(ARCHIVE), StatusCode::SEE_OTHER, Some("/opendap/login?code=1"), DEFAULT_AUTH_HOST);
        assert_eq!(d, HopDecision::Follow(url("https://oco2.gesdisc.eosdis.nasa.gov/opendap/login?code=1")));
    }

    #[test]
    fn test_redirect_without_location_is_transport_failure() {
        let d = decide_hop(&url(ARCHIVE), StatusCode::FOUND, None, DEFAULT_AUTH_HOST);
        assert!(matches!(d, HopDecision::Fail(HopFailure::Transport(_))), "got {:?}", d);
    }

    #[test]
    fn test_unauthorized_is_rejection() {
        let login = url("https://urs.earthdata.nasa.gov/oauth/authorize");
        let d = decide_hop(&login, StatusCode::UNAUTHORIZED, None, DEFAULT_AUTH_HOST);
        assert!(matches!(d, HopDecision::Fail(HopFailure::Rejected(_))), "got {:?}", d);
    }

    #[test]
    fn test_login_page_is_rejection() {
        let login = url("https://URS.earthdata.nasa.gov/home");
        let d = decide_hop(&login, StatusCode::OK, None, DEFAULT_AUTH_HOST);
        assert!(matches!(d, HopDecision::Fail(HopFailure::Rejected(_))), "got {:?}", d);
    }

    #[test]
    fn test_archive_success_is_accepted() {
        assert_eq!(decide_hop(&url(ARCHIVE), StatusCode::OK, None, DEFAULT_AUTH_HOST), HopDecision::Accept);
    }

    #[test]
    fn test_archive_error_status_is_left_to_caller() {
        // 404 and 500 are not authentication problems; the caller maps them.
        assert_eq!(decide_hop(&url(ARCHIVE), StatusCode::NOT_FOUND, None, DEFAULT_AUTH_HOST), HopDecision::Accept);
        assert_eq!(
            decide_hop(&url(ARCHIVE), StatusCode::INTERNAL_SERVER_ERROR, None, DEFAULT_AUTH_HOST),
            HopDecision::Accept
        );
    }

    #[test]
    fn test_join_url_normalizes_slashes() {
        assert_eq!(join_url("https://h/opendap/", "/C/2021/f.nc4"), "https://h/opendap/C/2021/f.nc4");
        assert_eq!(join_url("https://h/opendap", "C/2021"), "https://h/opendap/C/2021");
    }

    #[test]
    fn test_session_debug_redacts_password() {
        let options = SessionOptions::default();
        let session = Session {
            client: build_client(&options).unwrap(),
            base_url: "https://h/opendap".to_string(),
            credentials: Credentials::new("alice", "s3cret").unwrap(),
            options,
        };
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("s3cret"), "password leaked: {}", rendered);
        assert_eq!(session.username(), "alice");
    }

    #[test]
    fn test_handshake_rejection_maps_to_authentication() {
        let err = handshake_error(HopFailure::Rejected("401 from login host".to_string()));
        assert_eq!(err, IngestError::Authentication("401 from login host".to_string()));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_handshake_transport_failure_maps_to_network() {
        let err = handshake_error(HopFailure::Transport("connection failed".to_string()));
        assert!(matches!(err, IngestError::Network(ref m) if m == "connection failed"), "got {:?}", err);
    }

    #[test]
    fn test_probe_must_settle_on_success() {
        assert!(check_probe_status(ARCHIVE, StatusCode::OK).is_ok());
        let err = check_probe_status(ARCHIVE, StatusCode::NOT_FOUND).unwrap_err();
        assert!(matches!(err, IngestError::Network(ref m) if m.contains("HTTP 404")), "got {:?}", err);
    }
}
