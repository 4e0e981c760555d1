//! The HTTP client adapter.
//!
//! Issues one HTTP/1.1 request per dispatched descriptor and classifies
//! the outcome. The underlying reqwest client, and with it the connection
//! pool, is built once and shared read-only by every session worker.

use bytes::Bytes;
use futures::stream;
use reqwest::header::HOST;
use reqwest::redirect;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ReplayError, Result};
use crate::options::RedirectBehavior;
use crate::payload;
use crate::scenario::Request;

/// Classification of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The server answered below the 5xx range. 4xx responses are an
    /// expected experimental observation, not a failure.
    Delivered,

    /// The server answered with a 5xx status.
    ServerStatus,

    /// The request could not be constructed or sent, or its response
    /// body could not be read.
    TransportFailed,
}

/// Shared dispatcher for all session workers.
#[derive(Clone)]
pub(crate) struct HttpClient {
    http: reqwest::Client,
    server: Option<String>,
    default_scheme: String,
}

impl HttpClient {
    pub(crate) fn new(
        server: Option<String>,
        default_scheme: String,
        behavior: RedirectBehavior,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(redirect_policy(behavior))
            .build()
            .map_err(|e| ReplayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            server,
            default_scheme,
        })
    }

    /// Issues one request and classifies the result. The response body is
    /// fully drained on success so the connection returns to the pool.
    pub(crate) async fn dispatch(&self, request: &Request) -> Outcome {
        let url = match self.target_url(request) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, host = %request.host, "failed to construct request target");
                return Outcome::TransportFailed;
            }
        };

        let method = match reqwest::Method::from_bytes(request.method_or_get().as_bytes()) {
            Ok(method) => method,
            Err(err) => {
                warn!(error = %err, method = %request.method, "invalid request method");
                return Outcome::TransportFailed;
            }
        };

        debug!(method = %method, url = %url, "dispatching request");

        let mut builder = self
            .http
            .request(method, url.clone())
            .header(HOST, self.host_header(request));

        if request.has_content() {
            let length =
                payload::deviated_length(request.content_length, request.content_length_deviation);
            let body = payload::random_text(length);
            builder = if request.set_content_length {
                // A sized body makes reqwest emit the Content-Length
                // header with the exact payload size.
                builder.body(body)
            } else {
                // A streamed body has no known length, so the payload
                // goes out with chunked transfer encoding.
                let chunks = stream::iter([Ok::<Bytes, std::io::Error>(body)]);
                builder.body(reqwest::Body::wrap_stream(chunks))
            };
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, url = %url, "error while making request");
                return Outcome::TransportFailed;
            }
        };

        if response.status().as_u16() >= 500 {
            return Outcome::ServerStatus;
        }

        match response.bytes().await {
            Ok(_) => Outcome::Delivered,
            Err(err) => {
                warn!(error = %err, url = %url, "error while reading response body");
                Outcome::TransportFailed
            }
        }
    }

    /// The request target: the configured server wins, then the
    /// descriptor's host, then localhost; the default scheme is
    /// prepended when the chosen base carries none.
    fn target_url(&self, request: &Request) -> std::result::Result<Url, url::ParseError> {
        let base = match &self.server {
            Some(server) => server.clone(),
            None if !request.host.is_empty() => request.host.clone(),
            None => "localhost".to_string(),
        };

        let mut url = Url::parse(&self.with_scheme(base))?;
        url.set_path(&request.path);
        Ok(url)
    }

    fn with_scheme(&self, address: String) -> String {
        if address.contains("://") {
            address
        } else {
            format!("{}://{}", self.default_scheme, address)
        }
    }

    /// The Host header value: the descriptor's host, then the configured
    /// server, then localhost; schemes are stripped, explicit ports kept.
    fn host_header(&self, request: &Request) -> String {
        let host = if !request.host.is_empty() {
            &request.host
        } else if let Some(server) = &self.server {
            server
        } else {
            "localhost"
        };

        authority(host)
    }
}

/// Reduces an address that may carry a scheme or path to its host[:port].
fn authority(address: &str) -> String {
    if !address.contains("://") {
        return address.to_string();
    }

    match Url::parse(address) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => address.to_string(),
        },
        Err(_) => address.to_string(),
    }
}

fn redirect_policy(behavior: RedirectBehavior) -> redirect::Policy {
    match behavior {
        RedirectBehavior::NoFollow => redirect::Policy::none(),
        RedirectBehavior::FollowRedirect => redirect::Policy::limited(10),
        RedirectBehavior::FollowSameHost => redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > 10 {
                return attempt.stop();
            }

            let original = &attempt.previous()[0];
            let target = attempt.url();
            let same_host = target.host_str() == original.host_str()
                && target.port_or_known_default() == original.port_or_known_default();
            if same_host {
                attempt.follow()
            } else {
                attempt.stop()
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: Option<&str>) -> HttpClient {
        HttpClient::new(
            server.map(str::to_string),
            "http".to_string(),
            RedirectBehavior::NoFollow,
        )
        .unwrap()
    }

    fn descriptor(host: &str, path: &str) -> Request {
        Request {
            host: host.to_string(),
            path: path.to_string(),
            ..Request::default()
        }
    }

    #[test]
    fn configured_server_wins_over_descriptor_host() {
        let client = client(Some("http://127.0.0.1:8080"));
        let url = client
            .target_url(&descriptor("www.example.org", "/foo"))
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/foo");
    }

    #[test]
    fn descriptor_host_gets_the_default_scheme() {
        let client = client(None);
        let url = client
            .target_url(&descriptor("www.example.org", "/foo"))
            .unwrap();
        assert_eq!(url.as_str(), "http://www.example.org/foo");
    }

    #[test]
    fn descriptor_host_may_carry_its_own_scheme() {
        let client = client(None);
        let url = client
            .target_url(&descriptor("https://www.example.org", "/foo"))
            .unwrap();
        assert_eq!(url.as_str(), "https://www.example.org/foo");
    }

    #[test]
    fn empty_host_and_server_fall_back_to_localhost() {
        let client = client(None);
        let url = client.target_url(&descriptor("", "/foo")).unwrap();
        assert_eq!(url.as_str(), "http://localhost/foo");
    }

    #[test]
    fn server_without_scheme_is_accepted() {
        let client = client(Some("example.org:8080"));
        let url = client.target_url(&descriptor("", "/foo")).unwrap();
        assert_eq!(url.as_str(), "http://example.org:8080/foo");
    }

    #[test]
    fn host_header_prefers_the_descriptor() {
        let client = client(Some("http://127.0.0.1:8080"));
        assert_eq!(
            client.host_header(&descriptor("www.example.org", "/")),
            "www.example.org"
        );
        assert_eq!(client.host_header(&descriptor("", "/")), "127.0.0.1:8080");
        assert_eq!(authority("http://www.example.org/ignored"), "www.example.org");
    }

    #[test]
    fn host_header_falls_back_to_localhost() {
        let client = client(None);
        assert_eq!(client.host_header(&descriptor("", "/")), "localhost");
    }
}
