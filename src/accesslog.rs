//! Access log ingestion.
//!
//! Turns a byte stream of access log lines into request descriptors. The
//! built-in parser is a regular expression with named captures for the
//! method, path and host of each entry; its default expression understands
//! the Apache Combined log format extended with the two trailing Skipper
//! fields (request duration and host). A custom [`Parser`] implementation
//! replaces the expression entirely, e.g. for JSON-shaped logs.

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::debug;

use crate::error::Result;
use crate::scenario::Request;

/// The byte stream an access log is read from.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Parses one access log line into a request descriptor.
///
/// Implementations must not fail: lines they cannot make sense of map to
/// an empty descriptor.
pub trait Parser: Send {
    /// Parses a log line.
    fn parse(&self, line: &str) -> Request;
}

/// Apache Combined log format with the Skipper access log extension: a
/// duration integer and the request host trail the user agent.
///
/// Known bugs, kept for compatibility: escaped double quotes inside the
/// HTTP message are not handled, and neither are paths with whitespace.
const DEFAULT_FORMAT: &str = concat!(
    "^",
    // remote address list
    r"(([0-9.]+(\s*,\s*[0-9.]+)*)|-)\s*",
    // client identity
    r"([A-Za-z0-9_.]+|-)\s*",
    // user id
    r"([A-Za-z0-9_.]+|-)\s*",
    // timestamp
    r"(\[[^\]]*\]|-)\s*",
    // HTTP message
    r#""(?P<method>[^ "]+)\s+(?P<path>[^ "]+)\s+([^ "]+)"\s*"#,
    // status
    r"([0-9]+)\s*",
    // response size
    r"([0-9]+)\s*",
    // referrer, with the trailing comma that shows up in the wild
    r#"("([^"]+)",?\s*)?"#,
    // user agent
    r#"("([^"]+)"\s*)?"#,
    // duration
    r"(([0-9]+)\s*)?",
    // host
    r"((?P<host>\S+)\s*)?",
    "$",
);

/// The built-in, expression-driven line parser.
pub struct RegexParser {
    format: Regex,
}

impl RegexParser {
    /// Compiles a custom format expression. The named capture groups
    /// `method`, `path` and `host` populate the corresponding descriptor
    /// fields; missing groups leave their field empty.
    pub fn new(format: &str) -> Result<Self> {
        Ok(Self {
            format: Regex::new(format)?,
        })
    }

    /// The default parser for the extended Apache Combined format.
    pub fn combined() -> Self {
        Self {
            format: Regex::new(DEFAULT_FORMAT).expect("default access log format compiles"),
        }
    }
}

impl Parser for RegexParser {
    fn parse(&self, line: &str) -> Request {
        let Some(captures) = self.format.captures(line) else {
            debug!(line, "access log line did not match the format");
            return Request::default();
        };

        let capture = |name: &str| {
            captures
                .name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };

        Request {
            method: capture("method"),
            host: capture("host"),
            path: capture("path"),
            ..Request::default()
        }
    }
}

/// Reads request descriptors lazily from an access log stream.
///
/// The reader is one-shot: the driver pulls it until end-of-stream and
/// retires it, memoizing every descriptor along the way.
pub(crate) struct LogReader {
    lines: Lines<BufReader<LogStream>>,
    parser: Box<dyn Parser>,
}

impl LogReader {
    pub(crate) fn new(input: LogStream, parser: Box<dyn Parser>) -> Self {
        Self {
            lines: BufReader::new(input).lines(),
            parser,
        }
    }

    /// The next parsed descriptor, or `None` at end-of-stream. Blank
    /// lines are skipped.
    pub(crate) async fn next(&mut self) -> std::io::Result<Option<Request>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!(line, "scanning access log entry");
            return Ok(Some(self.parser.parse(line)));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMBINED_LINE: &str = r#"1.2.3.4, 5.6.7.8, 9.0.1.2 - - [02/Mar/2017:11:43:00 +0000] "GET /foo HTTP/1.1" 200 566 "https://www.example.org/bar.html", "Mozilla/5.0 (iPhone; CPU iPHone OS 10_2_1 like Mac OS X) AppleWebKit/600.1.4 (KHTML, like Gecko) GSA/23.0.1234 Mobile/14D27 Safari/600.1.4" 1 www.example.org"#;

    fn reader(text: &'static str, parser: Box<dyn Parser>) -> LogReader {
        LogReader::new(Box::new(text.as_bytes()), parser)
    }

    #[test]
    fn parses_combined_format_with_skipper_extension() {
        let parsed = RegexParser::combined().parse(COMBINED_LINE);
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/foo");
        assert_eq!(parsed.host, "www.example.org");
    }

    #[test]
    fn parses_combined_format_without_host_field() {
        let line = r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "POST /apache_pb.gif HTTP/1.0" 200 2326 "http://www.example.com/start.html" "Mozilla/4.08 [en] (Win98; I ;Nav)""#;
        let parsed = RegexParser::combined().parse(line);
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.path, "/apache_pb.gif");
        assert_eq!(parsed.host, "");
    }

    #[test]
    fn unmatched_line_yields_empty_descriptor() {
        let parsed = RegexParser::combined().parse("not an access log line");
        assert_eq!(parsed, Request::default());
    }

    #[test]
    fn custom_format_captures_named_groups() {
        let parser = RegexParser::new(r"^(?P<method>\S+)\s+(?P<path>\S+)\s+(?P<host>\S+)$").unwrap();
        let parsed = parser.parse("PUT /api/foo api.example.org");
        assert_eq!(parsed.method, "PUT");
        assert_eq!(parsed.path, "/api/foo");
        assert_eq!(parsed.host, "api.example.org");
    }

    #[test]
    fn custom_format_may_omit_groups() {
        let parser = RegexParser::new(r"^(?P<method>\S+)\s+(?P<path>\S+)$").unwrap();
        let parsed = parser.parse("GET /foo");
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/foo");
        assert_eq!(parsed.host, "");
    }

    #[test]
    fn invalid_format_is_rejected() {
        assert!(RegexParser::new(r"\").is_err());
    }

    #[tokio::test]
    async fn reader_skips_blank_lines_and_reports_eof() {
        let mut reader = reader(
            "\nGET /foo www.example.org\n   \n\nPOST /bar api.example.org\n\n",
            Box::new(RegexParser::new(r"^(?P<method>\S+)\s+(?P<path>\S+)\s+(?P<host>\S+)$").unwrap()),
        );

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.path, "/foo");
        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.path, "/bar");
        assert!(reader.next().await.unwrap().is_none());
        assert!(reader.next().await.unwrap().is_none());
    }
}
