//! Player configuration.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::accesslog::{LogStream, Parser};
use crate::error::{ReplayError, Result};
use crate::scenario::Request;

/// Consecutive-failure count at which a session halts, unless overridden.
pub const DEFAULT_HALT_THRESHOLD: usize = 1 << 7;

/// How the player reacts to redirect responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectBehavior {
    /// Return the redirect response itself without following it.
    #[default]
    NoFollow,

    /// Follow redirects only when the target host and port equal those
    /// of the request being redirected.
    FollowSameHost,

    /// Follow all redirects. Not recommended during load tests.
    FollowRedirect,
}

impl FromStr for RedirectBehavior {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nofollow" => Ok(RedirectBehavior::NoFollow),
            "samehost" => Ok(RedirectBehavior::FollowSameHost),
            "follow" => Ok(RedirectBehavior::FollowRedirect),
            other => Err(ReplayError::InvalidRedirectBehavior(other.to_string())),
        }
    }
}

/// Options initialize a player.
///
/// All fields are optional; an all-default options value describes a
/// player whose scenario is empty.
#[derive(Default)]
pub struct Options {
    /// Requests to be executed by the player in the specified order.
    /// When combined with an access log, these form the fixed tail of
    /// the scenario, after the log-derived entries.
    pub requests: Vec<Request>,

    /// A source of scenario entries. By default it is expected to be a
    /// stream of Apache Combined access log entries with the Skipper
    /// duration and host extension fields.
    ///
    /// On continuous play the log is read only once and memoized for
    /// subsequent passes, so the parsed log must fit in memory.
    pub access_log: Option<LogStream>,

    /// Overrides the built-in parser expression. The named capture
    /// groups `method`, `path` and `host` populate the corresponding
    /// fields of the parsed requests. Ignored when `parser` is set.
    pub access_log_format: Option<String>,

    /// A custom parser for access log lines, e.g. for JSON logs. Takes
    /// precedence over `access_log_format`.
    pub parser: Option<Box<dyn Parser>>,

    /// Network address to send the requests to. When empty, the address
    /// is taken from each descriptor's host, falling back to localhost.
    pub server: Option<String>,

    /// Scheme prepended to addresses that carry none. Defaults to http.
    pub default_scheme: String,

    /// How many concurrent sessions replay the scenario. Defaults to 1.
    pub concurrent_sessions: usize,

    /// How the player acts on redirect responses.
    pub redirect_behavior: RedirectBehavior,

    /// Halt the session when consecutive 5xx responses reach the halt
    /// threshold. Transport errors halt regardless of this flag.
    pub halt_on_500: bool,

    /// Consecutive-failure count at which the session halts. Zero means
    /// [`DEFAULT_HALT_THRESHOLD`].
    pub halt_threshold: usize,

    /// Ceiling on the overall outgoing request rate, in requests per
    /// second, spread evenly across the sessions. Zero or negative
    /// disables throttling.
    pub throttle: f64,

    /// Average payload size to send with POST, PUT and PATCH requests
    /// read from the access log.
    pub post_content_length: usize,

    /// How much the actual payload size of a request read from the
    /// access log may deviate from `post_content_length`.
    pub post_content_length_deviation: f64,

    /// Whether log-derived payload requests set the Content-Length
    /// header explicitly instead of chunking.
    pub post_set_content_length: bool,
}

#[derive(Deserialize)]
struct RequestsFile {
    #[serde(default)]
    requests: Vec<Request>,
}

/// Loads an explicit request list from a YAML or TOML file with a
/// top-level `requests` key; the format follows the file extension.
pub fn load_requests<P: AsRef<Path>>(path: P) -> Result<Vec<Request>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ReplayError::Config(format!("failed to read request file {:?}: {}", path, e)))?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");
    let file: RequestsFile = match extension {
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .map_err(|e| ReplayError::Config(format!("failed to parse request file: {}", e)))?,
        "toml" => toml::from_str(&content)
            .map_err(|e| ReplayError::Config(format!("failed to parse request file: {}", e)))?,
        other => {
            return Err(ReplayError::Config(format!(
                "unsupported request file format: {}",
                other
            )))
        }
    };

    Ok(file.requests)
}
