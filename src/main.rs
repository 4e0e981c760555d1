//! Reprise - Programmable HTTP Traffic Replayer
//!
//! Command line front-end for the reprise library.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use reprise::{
    load_requests, LogStream, Options, Player, RedirectBehavior, ReplayError,
    DEFAULT_HALT_THRESHOLD, NAME, VERSION,
};
use tokio::io::AsyncBufReadExt;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Reprise - Programmable HTTP Traffic Replayer
#[derive(Parser)]
#[command(name = NAME)]
#[command(version = VERSION)]
#[command(about = "Replay HTTP requests from access logs against a target server")]
struct Cli {
    /// Access log file; piped stdin is read when omitted
    file: Option<PathBuf>,

    /// Request list file (YAML or TOML with a top-level `requests` key),
    /// replayed after the access log entries
    #[arg(long)]
    requests: Option<PathBuf>,

    /// Regexp for parsing log entries; defaults to the Apache Combined
    /// log format with the Skipper extensions (duration and host)
    #[arg(long)]
    access_log_format: Option<String>,

    /// HTTP network address to send the requests to; taken from the
    /// request definitions when omitted, defaulting to localhost
    #[arg(short, long)]
    server: Option<String>,

    /// Scheme used when not inferrable from the server option or the
    /// log entry
    #[arg(long, default_value = "http")]
    default_scheme: String,

    /// Number of concurrent sessions to run
    #[arg(short = 'n', long, default_value_t = 1)]
    concurrent_sessions: usize,

    /// Behavior on redirect responses (nofollow, samehost, follow)
    #[arg(long, default_value = "nofollow")]
    redirect_behavior: RedirectBehavior,

    /// Content length to be sent with POST, PUT and PATCH requests read
    /// from the access log
    #[arg(long, default_value_t = 0)]
    post_content_length: usize,

    /// Variance in the content length sent with P* requests
    #[arg(long, default_value_t = 0.0)]
    post_content_length_deviation: f64,

    /// Set the HTTP Content-Length header instead of chunking
    #[arg(long)]
    post_set_content_length: bool,

    /// Halt on 5xx responses, not only on request errors
    #[arg(long)]
    halt_on_500: bool,

    /// Continuous-failure count that makes the player halt
    #[arg(long, default_value_t = DEFAULT_HALT_THRESHOLD)]
    halt_threshold: usize,

    /// Maximum outgoing overall request per second rate
    #[arg(long, default_value_t = 0.0)]
    throttle: f64,

    /// Replay the input scenario only once and exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> reprise::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let requests = match &cli.requests {
        Some(path) => load_requests(path)?,
        None => Vec::new(),
    };

    let (access_log, interactive) = input(&cli)?;
    if access_log.is_none() && requests.is_empty() {
        return Err(ReplayError::Config("no input defined".to_string()));
    }

    let player = Player::new(Options {
        requests,
        access_log,
        access_log_format: cli.access_log_format.clone(),
        server: cli.server.clone(),
        default_scheme: cli.default_scheme.clone(),
        concurrent_sessions: cli.concurrent_sessions,
        redirect_behavior: cli.redirect_behavior,
        halt_on_500: cli.halt_on_500,
        halt_threshold: cli.halt_threshold,
        throttle: cli.throttle,
        post_content_length: cli.post_content_length,
        post_content_length_deviation: cli.post_content_length_deviation,
        post_set_content_length: cli.post_set_content_length,
        ..Options::default()
    })?;

    if interactive {
        play_control(player, cli.once).await
    } else {
        play(&player, cli.once).await
    }
}

/// Initialize logging based on the CLI level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", NAME, level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// Selects the access log source: the file argument when given, piped
/// stdin otherwise. The interactive pause/resume toggle is available
/// only when the log comes from a file and stdin stays a terminal.
fn input(cli: &Cli) -> reprise::Result<(Option<LogStream>, bool)> {
    if let Some(path) = &cli.file {
        let file = std::fs::File::open(path)?;
        let stream: LogStream = Box::new(tokio::fs::File::from_std(file));
        return Ok((Some(stream), std::io::stdin().is_terminal()));
    }

    if !std::io::stdin().is_terminal() {
        return Ok((Some(Box::new(tokio::io::stdin())), false));
    }

    Ok((None, false))
}

async fn play(player: &Player, once: bool) -> reprise::Result<()> {
    if once {
        player.once().await
    } else {
        player.play().await
    }
}

/// Interactive control: the replay starts immediately and every Enter
/// keypress toggles between pause and resume. The process exits when the
/// session terminates on its own.
async fn play_control(player: Player, once: bool) -> reprise::Result<()> {
    info!("press Enter to pause or resume");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut playing = false;

    loop {
        if playing {
            player.pause().await;
            info!("paused");
            playing = false;
        } else {
            let player = player.clone();
            tokio::spawn(async move {
                match play(&player, once).await {
                    Ok(()) => {
                        info!("session finished");
                        std::process::exit(0);
                    }
                    Err(err) => {
                        error!(error = %err, "session halted");
                        std::process::exit(1);
                    }
                }
            });
            info!("playing");
            playing = true;
        }

        if lines.next_line().await?.is_none() {
            return Ok(());
        }
    }
}
