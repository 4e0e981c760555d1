//! Session workers.
//!
//! A session worker repeatedly offers its scenario position to the
//! driver, dispatches the descriptor it receives back, paces itself
//! against its share of the global throttle, and reports the outcome.
//! Workers share nothing with each other; the driver owns the scenario
//! cursor and answers offers serially, so the memoized prefix grows in a
//! single global order no matter how many workers run.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::client::{HttpClient, Outcome};
use crate::scenario::Request;

/// A worker's request for the descriptor at its current position.
pub(crate) struct Offer {
    pub(crate) position: usize,
    pub(crate) reply: oneshot::Sender<Feed>,
}

/// The driver's answer to an offer. Dropping the reply sender instead of
/// answering terminates the worker.
pub(crate) enum Feed {
    /// Dispatch this descriptor and advance.
    Serve(Request),

    /// End of the scenario in loop mode: restart from position zero.
    Rewind,

    /// The lookup failed upstream; offer the same position again.
    Retry,
}

pub(crate) struct SessionWorker {
    offers: mpsc::Sender<Offer>,
    results: mpsc::Sender<Outcome>,
    client: HttpClient,
    pacer: Pacer,
    position: usize,
}

impl SessionWorker {
    pub(crate) fn new(
        offers: mpsc::Sender<Offer>,
        results: mpsc::Sender<Outcome>,
        client: HttpClient,
        pacer: Pacer,
    ) -> Self {
        Self {
            offers,
            results,
            client,
            pacer,
            position: 0,
        }
    }

    /// Runs until the driver closes the offer path or drops a reply.
    /// In-flight work always completes before the worker observes either.
    pub(crate) async fn run(mut self) {
        loop {
            let (reply_tx, reply_rx) = oneshot::channel();
            let offer = Offer {
                position: self.position,
                reply: reply_tx,
            };
            if self.offers.send(offer).await.is_err() {
                return;
            }

            let request = match reply_rx.await {
                Ok(Feed::Serve(request)) => request,
                Ok(Feed::Rewind) => {
                    debug!("end of scenario, rewinding");
                    self.position = 0;
                    continue;
                }
                Ok(Feed::Retry) => continue,
                Err(_) => return,
            };

            self.position += 1;

            let started = Instant::now();
            let outcome = self.client.dispatch(&request).await;
            if let Some(pause) = self.pacer.pace(started.elapsed()) {
                tokio::time::sleep(pause).await;
            }

            if self.results.send(outcome).await.is_err() {
                return;
            }
        }
    }
}

/// Spreads the global requests-per-second target across the concurrent
/// workers: each worker gets a time budget per request and tracks a
/// signed lag against it, without any cross-worker coordination.
pub(crate) struct Pacer {
    budget: Option<Duration>,
    lag_nanos: i64,
}

impl Pacer {
    /// `throttle` is the global target; zero or negative disables pacing.
    pub(crate) fn new(throttle: f64, sessions: usize) -> Self {
        let budget = if throttle > 0.0 {
            Some(Duration::from_secs_f64(sessions as f64 / throttle))
        } else {
            None
        };

        Self {
            budget,
            lag_nanos: 0,
        }
    }

    /// Folds one request's elapsed time into the lag and returns how long
    /// the worker must sleep, if at all.
    ///
    /// The lag goes negative while requests run over budget, letting a
    /// subsequent fast stretch catch up instead of sleeping; a negative
    /// lag hit by a further over-budget request is zeroed rather than
    /// accumulating unbounded debt.
    pub(crate) fn pace(&mut self, elapsed: Duration) -> Option<Duration> {
        let budget = self.budget?;

        let slack = budget.as_nanos() as i64 - elapsed.as_nanos() as i64;
        let was_behind = self.lag_nanos < 0;
        self.lag_nanos += slack;
        if was_behind && slack < 0 {
            self.lag_nanos = 0;
        }

        if self.lag_nanos > 0 {
            let pause = Duration::from_nanos(self.lag_nanos as u64);
            self.lag_nanos = 0;
            return Some(pause);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn disabled_without_a_throttle() {
        let mut pacer = Pacer::new(0.0, 1);
        assert_eq!(pacer.pace(Duration::ZERO), None);

        let mut pacer = Pacer::new(-3.0, 4);
        assert_eq!(pacer.pace(Duration::ZERO), None);
    }

    #[test]
    fn budget_is_the_global_rate_split_across_sessions() {
        // 100 rps over 4 sessions: every worker gets 40ms per request.
        let pacer = Pacer::new(100.0, 4);
        assert_eq!(pacer.budget, Some(Duration::from_millis(40)));
    }

    #[test]
    fn fast_requests_sleep_off_the_slack() {
        let mut pacer = Pacer::new(100.0, 1);
        assert_eq!(pacer.pace(3 * MS), Some(7 * MS));
        // The lag was reset by the sleep; the next request starts fresh.
        assert_eq!(pacer.pace(2 * MS), Some(8 * MS));
    }

    #[test]
    fn slow_requests_accrue_debt_before_sleeping_again() {
        let mut pacer = Pacer::new(100.0, 1);

        // 25ms against a 10ms budget: 15ms of debt, no sleep.
        assert_eq!(pacer.pace(25 * MS), None);
        assert_eq!(pacer.lag_nanos, -((15 * MS).as_nanos() as i64));

        // A fast request repays part of the debt without sleeping.
        assert_eq!(pacer.pace(2 * MS), None);
        assert_eq!(pacer.lag_nanos, -((7 * MS).as_nanos() as i64));

        // Once the debt is repaid, the remainder is slept off.
        assert_eq!(pacer.pace(MS), Some(2 * MS));
    }

    #[test]
    fn debt_does_not_accumulate_across_consecutive_overruns() {
        let mut pacer = Pacer::new(100.0, 1);

        assert_eq!(pacer.pace(25 * MS), None);
        assert!(pacer.lag_nanos < 0);

        // A second overrun while behind zeroes the lag instead of
        // deepening it.
        assert_eq!(pacer.pace(30 * MS), None);
        assert_eq!(pacer.lag_nanos, 0);

        // The very next fast request sleeps again.
        assert_eq!(pacer.pace(4 * MS), Some(6 * MS));
    }
}
