//! Scenario storage and the position cursor.
//!
//! A scenario is the ordered concatenation of a lazily memoized access-log
//! prefix and a fixed, user-supplied suffix. The prefix grows only by
//! append while the log reader is live and is frozen once the reader
//! signals end-of-stream; order is stable across passes. Positions are
//! zero-based over the concatenation. Every lookup goes through the
//! session driver, which is the cursor's only mutator.

use std::io;

use serde::{Deserialize, Serialize};

use crate::accesslog::LogReader;

/// Describes one HTTP request to be issued by the player.
///
/// Descriptors are immutable once handed to a session worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// HTTP method of the request. Defaults to GET when empty.
    pub method: String,

    /// Set as the Host header of the request. When no explicit server is
    /// configured in the player options, the host also becomes the
    /// network address of the request.
    pub host: String,

    /// HTTP path of the request.
    pub path: String,

    /// Size of the randomly generated request payload.
    pub content_length: usize,

    /// How much the actual payload size may deviate from
    /// `content_length`, as a fraction of it.
    pub content_length_deviation: f64,

    /// Whether to set the Content-Length header explicitly. When false,
    /// payloads are sent with chunked transfer encoding.
    pub set_content_length: bool,
}

impl Request {
    /// Whether a random payload must be attached on dispatch.
    pub(crate) fn has_content(&self) -> bool {
        self.content_length > 0 || self.content_length_deviation > 0.0
    }

    pub(crate) fn method_or_get(&self) -> &str {
        if self.method.is_empty() {
            "GET"
        } else {
            &self.method
        }
    }
}

/// Content settings overlaid on POST, PUT and PATCH entries read from the
/// access log, which carries no payload sizes of its own.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ContentOverlay {
    pub(crate) content_length: usize,
    pub(crate) content_length_deviation: f64,
    pub(crate) set_content_length: bool,
}

/// The scenario cursor: maps position indices to request descriptors,
/// growing the memoized prefix from the log reader on first traversal.
pub(crate) struct Scenario {
    prefix: Vec<Request>,
    suffix: Vec<Request>,
    reader: Option<LogReader>,
    overlay: ContentOverlay,
}

impl Scenario {
    pub(crate) fn new(
        suffix: Vec<Request>,
        reader: Option<LogReader>,
        overlay: ContentOverlay,
    ) -> Self {
        Self {
            prefix: Vec::new(),
            suffix,
            reader,
            overlay,
        }
    }

    /// Resolves a position to a descriptor copy. `Ok(None)` marks the end
    /// of the scenario; errors are log read failures, in which case the
    /// position stays unresolved and may be retried.
    pub(crate) async fn request_at(&mut self, position: usize) -> io::Result<Option<Request>> {
        loop {
            if position < self.prefix.len() {
                return Ok(Some(self.overlaid(&self.prefix[position])));
            }

            let Some(reader) = self.reader.as_mut() else {
                let suffix_index = position - self.prefix.len();
                return Ok(self.suffix.get(suffix_index).cloned());
            };

            match reader.next().await? {
                Some(entry) => self.prefix.push(entry),
                // The log is exhausted: the prefix is frozen from here on
                // and positions past it resolve against the suffix.
                None => self.reader = None,
            }
        }
    }

    fn overlaid(&self, entry: &Request) -> Request {
        let mut request = entry.clone();
        if matches!(request.method.as_str(), "POST" | "PUT" | "PATCH") {
            request.content_length = self.overlay.content_length;
            request.content_length_deviation = self.overlay.content_length_deviation;
            request.set_content_length = self.overlay.set_content_length;
        }

        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accesslog::RegexParser;

    const FORMAT: &str = r"^(?P<method>\S+)\s+(?P<path>\S+)\s+(?P<host>\S+)$";

    fn log_reader(text: &'static str) -> LogReader {
        LogReader::new(
            Box::new(text.as_bytes()),
            Box::new(RegexParser::new(FORMAT).unwrap()),
        )
    }

    fn named(path: &str) -> Request {
        Request {
            path: path.to_string(),
            ..Request::default()
        }
    }

    #[tokio::test]
    async fn serves_prefix_then_suffix_in_order() {
        let mut scenario = Scenario::new(
            vec![named("/user-1"), named("/user-2")],
            Some(log_reader("GET /log-1 a.example.org\nGET /log-2 b.example.org\n")),
            ContentOverlay::default(),
        );

        let paths: Vec<String> = {
            let mut paths = Vec::new();
            for position in 0.. {
                match scenario.request_at(position).await.unwrap() {
                    Some(request) => paths.push(request.path),
                    None => break,
                }
            }
            paths
        };

        assert_eq!(paths, vec!["/log-1", "/log-2", "/user-1", "/user-2"]);
    }

    #[tokio::test]
    async fn memoized_prefix_is_stable_across_passes() {
        let mut scenario = Scenario::new(
            Vec::new(),
            Some(log_reader("GET /a h1\nGET /b h2\n")),
            ContentOverlay::default(),
        );

        let first_pass = (
            scenario.request_at(0).await.unwrap().unwrap(),
            scenario.request_at(1).await.unwrap().unwrap(),
        );
        assert!(scenario.request_at(2).await.unwrap().is_none());

        // The reader is retired now; a second traversal must serve the
        // same memoized entries.
        assert_eq!(scenario.request_at(0).await.unwrap().unwrap(), first_pass.0);
        assert_eq!(scenario.request_at(1).await.unwrap().unwrap(), first_pass.1);
        assert!(scenario.request_at(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lagging_position_is_served_from_the_memo() {
        let mut scenario = Scenario::new(
            Vec::new(),
            Some(log_reader("GET /a h\nGET /b h\nGET /c h\n")),
            ContentOverlay::default(),
        );

        // A fast worker pulls ahead; a lagging one must still observe the
        // scenario from the top.
        assert_eq!(scenario.request_at(2).await.unwrap().unwrap().path, "/c");
        assert_eq!(scenario.request_at(0).await.unwrap().unwrap().path, "/a");
        assert_eq!(scenario.request_at(1).await.unwrap().unwrap().path, "/b");
    }

    #[tokio::test]
    async fn overlays_content_settings_on_log_mutations() {
        let overlay = ContentOverlay {
            content_length: 500,
            content_length_deviation: 0.1,
            set_content_length: true,
        };
        let mut scenario = Scenario::new(
            vec![named("/user")],
            Some(log_reader("POST /p h\nGET /g h\nPUT /u h\nPATCH /m h\n")),
            overlay,
        );

        let post = scenario.request_at(0).await.unwrap().unwrap();
        assert_eq!(post.content_length, 500);
        assert_eq!(post.content_length_deviation, 0.1);
        assert!(post.set_content_length);

        let get = scenario.request_at(1).await.unwrap().unwrap();
        assert_eq!(get.content_length, 0);
        assert!(!get.set_content_length);

        assert!(scenario.request_at(2).await.unwrap().unwrap().set_content_length);
        assert!(scenario.request_at(3).await.unwrap().unwrap().set_content_length);

        // User-supplied requests carry their own content settings.
        let user = scenario.request_at(4).await.unwrap().unwrap();
        assert_eq!(user.content_length, 0);
        assert!(!user.set_content_length);
    }

    #[tokio::test]
    async fn empty_scenario_ends_at_position_zero() {
        let mut scenario = Scenario::new(Vec::new(), None, ContentOverlay::default());
        assert!(scenario.request_at(0).await.unwrap().is_none());

        let mut scenario = Scenario::new(
            Vec::new(),
            Some(log_reader("")),
            ContentOverlay::default(),
        );
        assert!(scenario.request_at(0).await.unwrap().is_none());
    }
}
