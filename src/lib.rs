//! Reprise - Programmable HTTP Traffic Replayer
//!
//! Replays an HTTP request scenario — an explicit request list and/or an
//! access log parsed lazily — against a target server from any number of
//! concurrent client sessions, once through or in an unbounded loop.
//! Reprise is a load and regression test harness, not a general HTTP
//! client library:
//!
//! - **Scenario sources**: in-memory request lists, Apache Combined
//!   access logs (with the Skipper duration/host extension), custom
//!   format expressions, or fully custom line parsers
//! - **Concurrency**: N sessions replay the scenario N times over,
//!   sharing one connection pool and one memoized scenario
//! - **Control**: play, one-pass, pause and resume, stop — all with
//!   bounded latency and well-defined terminal errors
//! - **Safety rails**: consecutive-failure halting and a global request
//!   rate ceiling
//!
//! # Quick Start
//!
//! ```no_run
//! use reprise::{Options, Player, Request};
//!
//! #[tokio::main]
//! async fn main() -> reprise::Result<()> {
//!     let player = Player::new(Options {
//!         requests: vec![Request {
//!             path: "/health".into(),
//!             ..Request::default()
//!         }],
//!         server: Some("http://localhost:8080".into()),
//!         concurrent_sessions: 4,
//!         ..Options::default()
//!     })?;
//!
//!     player.once().await
//! }
//! ```
//!
//! # Scenario semantics
//!
//! The scenario is the concatenation of the memoized access-log prefix
//! and the user-supplied request list. The log is read only once, on the
//! first traversal, and every pass observes the same order. Concurrent
//! sessions each hold their own cursor over the shared scenario, so
//! concurrency multiplies throughput, not coverage.

pub mod accesslog;
pub mod error;
pub mod options;
pub mod player;
pub mod scenario;

mod client;
mod payload;
mod session;

pub use accesslog::{LogStream, Parser, RegexParser};
pub use error::{ReplayError, Result};
pub use options::{load_requests, Options, RedirectBehavior, DEFAULT_HALT_THRESHOLD};
pub use player::Player;
pub use scenario::Request;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
