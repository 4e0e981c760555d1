//! The replay controller.
//!
//! [`Player`] is the public handle; each session runs a single driver
//! task that owns the scenario cursor, answers worker offers in one
//! global order, accounts consecutive failures, and multiplexes the
//! play/once/pause/stop signals. At most one driver runs at a time: the
//! admission slot in the shared state is occupied exactly while a session
//! is live, and emptying it is the driver's last externally visible act
//! before releasing its waiters.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::accesslog::{LogReader, Parser, RegexParser};
use crate::client::{HttpClient, Outcome};
use crate::error::{ReplayError, Result};
use crate::options::{Options, DEFAULT_HALT_THRESHOLD};
use crate::scenario::{ContentOverlay, Scenario};
use crate::session::{Feed, Offer, Pacer, SessionWorker};

/// Replays HTTP requests explicitly specified and/or read from an access
/// log. Handles are cheap to clone; pause and stop are usually driven
/// from a different task than the blocking play or once call.
#[derive(Clone)]
pub struct Player {
    shared: Arc<PlayerShared>,
}

struct PlayerShared {
    settings: Settings,
    client: HttpClient,
    scenario: tokio::sync::Mutex<Scenario>,
    session: Mutex<Option<SessionHandle>>,
}

struct Settings {
    concurrent_sessions: usize,
    halt_on_500: bool,
    halt_threshold: usize,
    throttle: f64,
}

/// Senders into a live session's driver.
#[derive(Clone)]
struct SessionHandle {
    play: mpsc::Sender<Waiter>,
    once: mpsc::Sender<Waiter>,
    pause: mpsc::Sender<Ack>,
    stop: mpsc::Sender<Ack>,
}

type Waiter = oneshot::Sender<Result<()>>;
type Ack = oneshot::Sender<()>;

/// Session mode; follows the most recent play or once signal.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Loop,
    Once,
}

/// Terminal failure kinds of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Halt {
    NoRequests,
    Request,
    Server,
}

impl Halt {
    fn into_error(self) -> ReplayError {
        match self {
            Halt::NoRequests => ReplayError::NoRequests,
            Halt::Request => ReplayError::RequestError,
            Halt::Server => ReplayError::ServerError,
        }
    }
}

/// Why the driver leaves its signal loop.
enum Exit {
    /// The scenario ran to completion in once mode.
    Finished,

    /// A terminal failure threshold was crossed, or the scenario turned
    /// out to be empty.
    Halted(Halt),

    /// An external stop; the ack is sent once the workers have exited.
    Stopped(Ack),
}

impl Player {
    /// Configures an idle player.
    ///
    /// Fails when a custom access log format expression is invalid; the
    /// expression is ignored, and not validated, when a custom parser
    /// overrides it or no access log is given.
    pub fn new(options: Options) -> Result<Player> {
        let Options {
            requests,
            access_log,
            access_log_format,
            parser,
            server,
            default_scheme,
            concurrent_sessions,
            redirect_behavior,
            halt_on_500,
            halt_threshold,
            throttle,
            post_content_length,
            post_content_length_deviation,
            post_set_content_length,
        } = options;

        let reader = match access_log {
            Some(input) => {
                let line_parser: Box<dyn Parser> = match parser {
                    Some(parser) => parser,
                    None => match access_log_format.as_deref().filter(|f| !f.is_empty()) {
                        Some(format) => Box::new(RegexParser::new(format)?),
                        None => Box::new(RegexParser::combined()),
                    },
                };
                Some(LogReader::new(input, line_parser))
            }
            None => None,
        };

        let overlay = ContentOverlay {
            content_length: post_content_length,
            content_length_deviation: post_content_length_deviation,
            set_content_length: post_set_content_length,
        };

        let default_scheme = if default_scheme.is_empty() {
            "http".to_string()
        } else {
            default_scheme
        };
        let client = HttpClient::new(
            server.filter(|s| !s.is_empty()),
            default_scheme,
            redirect_behavior,
        )?;

        let settings = Settings {
            concurrent_sessions: concurrent_sessions.max(1),
            halt_on_500,
            halt_threshold: if halt_threshold == 0 {
                DEFAULT_HALT_THRESHOLD
            } else {
                halt_threshold
            },
            throttle,
        };

        Ok(Player {
            shared: Arc::new(PlayerShared {
                settings,
                client,
                scenario: tokio::sync::Mutex::new(Scenario::new(requests, reader, overlay)),
                session: Mutex::new(None),
            }),
        })
    }

    /// Replays the scenario in an unbounded loop with the configured
    /// concurrency, blocking until the session terminates.
    ///
    /// On a running session this attaches the caller as an additional
    /// waiter and switches the session to loop mode; all waiters are
    /// released with the same terminal result. The terminal errors are
    /// [`ReplayError::NoRequests`], [`ReplayError::RequestError`] and
    /// [`ReplayError::ServerError`]; a stop releases the waiters with
    /// `Ok(())`.
    pub async fn play(&self) -> Result<()> {
        self.subscribe(Mode::Loop).await
    }

    /// Replays the scenario once through, blocking until every session
    /// worker has completed its pass or the session halts.
    pub async fn once(&self) -> Result<()> {
        self.subscribe(Mode::Once).await
    }

    /// Pauses the replay: the driver stops feeding the workers until a
    /// subsequent [`play`](Self::play) or [`once`](Self::once). Returns
    /// as soon as feeding has stopped; requests already in flight still
    /// complete. A pause on an idle player has no effect.
    pub async fn pause(&self) {
        let Some(handle) = self.shared.session.lock().clone() else {
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if handle.pause.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Stops the session, releasing every waiting play and once caller
    /// with `Ok(())`. Returns only after all session workers have
    /// exited; requests already in flight complete and their results are
    /// discarded. Stopping an idle player is a harmless no-op.
    pub async fn stop(&self) {
        let Some(handle) = self.shared.session.lock().clone() else {
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if handle.stop.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Subscribes the caller to a session, starting one when idle. The
    /// retry loop covers the window in which a terminating driver has
    /// already stopped listening but not yet emptied the admission slot.
    async fn subscribe(&self, mode: Mode) -> Result<()> {
        loop {
            let handle = self.admit();
            let signal = match mode {
                Mode::Loop => &handle.play,
                Mode::Once => &handle.once,
            };

            let (done_tx, done_rx) = oneshot::channel();
            if signal.send(done_tx).await.is_err() {
                continue;
            }

            match done_rx.await {
                Ok(result) => return result,
                Err(_) => continue,
            }
        }
    }

    /// Returns the live session's handle, spawning a driver when idle.
    fn admit(&self) -> SessionHandle {
        let mut slot = self.shared.session.lock();
        if let Some(handle) = slot.as_ref() {
            return handle.clone();
        }

        let (handle, driver) = Driver::new(self.shared.clone());
        *slot = Some(handle.clone());
        tokio::spawn(driver.run());
        handle
    }
}

struct Driver {
    shared: Arc<PlayerShared>,
    play_rx: mpsc::Receiver<Waiter>,
    once_rx: mpsc::Receiver<Waiter>,
    pause_rx: mpsc::Receiver<Ack>,
    stop_rx: mpsc::Receiver<Ack>,
    offer_rx: mpsc::Receiver<Offer>,
    results_rx: mpsc::Receiver<Outcome>,
    offer_tx: Option<mpsc::Sender<Offer>>,
    results_tx: Option<mpsc::Sender<Outcome>>,
    workers: Vec<JoinHandle<()>>,
    waiters: Vec<Waiter>,
    mode: Mode,
    feeding: bool,
    live_workers: usize,
    request_errors: usize,
    server_errors: usize,
}

impl Driver {
    fn new(shared: Arc<PlayerShared>) -> (SessionHandle, Driver) {
        let (play_tx, play_rx) = mpsc::channel(4);
        let (once_tx, once_rx) = mpsc::channel(4);
        let (pause_tx, pause_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = mpsc::channel(4);
        let (offer_tx, offer_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = mpsc::channel(1);

        let handle = SessionHandle {
            play: play_tx,
            once: once_tx,
            pause: pause_tx,
            stop: stop_tx,
        };

        let driver = Driver {
            shared,
            play_rx,
            once_rx,
            pause_rx,
            stop_rx,
            offer_rx,
            results_rx,
            offer_tx: Some(offer_tx),
            results_tx: Some(results_tx),
            workers: Vec::new(),
            waiters: Vec::new(),
            mode: Mode::Loop,
            feeding: false,
            live_workers: 0,
            request_errors: 0,
            server_errors: 0,
        };

        (handle, driver)
    }

    async fn run(mut self) {
        debug!("session driver started");

        // Pending results take priority over offers so that failure
        // accounting never trails a session-ending offer.
        let exit = loop {
            tokio::select! {
                biased;

                Some(ack) = self.stop_rx.recv() => break Exit::Stopped(ack),
                Some(ack) = self.pause_rx.recv() => {
                    debug!("pausing");
                    self.feeding = false;
                    let _ = ack.send(());
                }
                Some(waiter) = self.play_rx.recv() => {
                    self.waiters.push(waiter);
                    self.mode = Mode::Loop;
                    self.resume();
                }
                Some(waiter) = self.once_rx.recv() => {
                    self.waiters.push(waiter);
                    self.mode = Mode::Once;
                    self.resume();
                }
                Some(outcome) = self.results_rx.recv() => {
                    if let Some(exit) = self.account(outcome) {
                        break exit;
                    }
                }
                Some(offer) = self.offer_rx.recv(), if self.feeding => {
                    if let Some(exit) = self.answer(offer).await {
                        break exit;
                    }
                }
            }
        };

        self.shutdown(exit).await;
    }

    fn resume(&mut self) {
        self.feeding = true;
        if self.workers.is_empty() {
            self.start_workers();
        }
    }

    fn start_workers(&mut self) {
        let (Some(offer_tx), Some(results_tx)) = (self.offer_tx.take(), self.results_tx.take())
        else {
            return;
        };

        let sessions = self.shared.settings.concurrent_sessions;
        info!(sessions, "starting session workers");

        for _ in 0..sessions {
            let worker = SessionWorker::new(
                offer_tx.clone(),
                results_tx.clone(),
                self.shared.client.clone(),
                Pacer::new(self.shared.settings.throttle, sessions),
            );
            self.workers.push(tokio::spawn(worker.run()));
        }

        self.live_workers = sessions;
    }

    /// Answers one worker offer from the scenario cursor.
    async fn answer(&mut self, offer: Offer) -> Option<Exit> {
        let lookup = {
            let mut scenario = self.shared.scenario.lock().await;
            scenario.request_at(offer.position).await
        };

        match lookup {
            Ok(Some(request)) => {
                let _ = offer.reply.send(Feed::Serve(request));
                None
            }
            Ok(None) if self.mode == Mode::Once => {
                // This worker has finished its pass; the last one to do
                // so ends the session.
                if self.live_workers <= 1 {
                    return Some(Exit::Finished);
                }

                self.live_workers -= 1;
                debug!(live = self.live_workers, "session worker finished its pass");
                drop(offer.reply);
                None
            }
            Ok(None) => {
                if offer.position == 0 {
                    // Nothing at the very first position: the scenario is
                    // empty and looping would spin forever.
                    return Some(Exit::Halted(Halt::NoRequests));
                }

                let _ = offer.reply.send(Feed::Rewind);
                None
            }
            Err(err) => {
                warn!(error = %err, "error while reading access log");
                let _ = offer.reply.send(Feed::Retry);
                self.count_request_error()
            }
        }
    }

    /// Folds one reported outcome into the consecutive-failure counters.
    fn account(&mut self, outcome: Outcome) -> Option<Exit> {
        match outcome {
            Outcome::Delivered => {
                self.request_errors = 0;
                self.server_errors = 0;
                None
            }
            Outcome::ServerStatus => {
                self.server_errors += 1;
                if self.shared.settings.halt_on_500
                    && self.server_errors >= self.shared.settings.halt_threshold
                {
                    error!("server errors exceeded the halt threshold");
                    return Some(Exit::Halted(Halt::Server));
                }
                None
            }
            Outcome::TransportFailed => self.count_request_error(),
        }
    }

    fn count_request_error(&mut self) -> Option<Exit> {
        self.request_errors += 1;
        if self.request_errors >= self.shared.settings.halt_threshold {
            error!("request errors exceeded the halt threshold");
            return Some(Exit::Halted(Halt::Request));
        }

        None
    }

    /// Tears the session down: closes every worker's path back to the
    /// driver, waits for the workers to exit, frees the admission slot,
    /// then releases every waiter with the terminal result.
    async fn shutdown(mut self, exit: Exit) {
        // Workers observe the closed channels at their next offer or
        // report and exit; requests already in flight complete first and
        // their results are discarded.
        drop(self.offer_rx);
        drop(self.results_rx);
        drop(self.offer_tx);
        drop(self.results_tx);

        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }

        *self.shared.session.lock() = None;

        // Callers that raced the teardown.
        while let Ok(waiter) = self.play_rx.try_recv() {
            self.waiters.push(waiter);
        }
        while let Ok(waiter) = self.once_rx.try_recv() {
            self.waiters.push(waiter);
        }
        while let Ok(ack) = self.pause_rx.try_recv() {
            let _ = ack.send(());
        }

        let halted = match &exit {
            Exit::Halted(halt) => Some(*halt),
            Exit::Finished | Exit::Stopped(_) => None,
        };
        match halted {
            Some(halt) => info!(error = %halt.into_error(), "session halted"),
            None => info!("session finished"),
        }

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(match halted {
                Some(halt) => Err(halt.into_error()),
                None => Ok(()),
            });
        }

        if let Exit::Stopped(ack) = exit {
            let _ = ack.send(());
        }
        while let Ok(ack) = self.stop_rx.try_recv() {
            let _ = ack.send(());
        }
    }
}
