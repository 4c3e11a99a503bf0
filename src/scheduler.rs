//! Scheduler trigger
//!
//! Fires dispatcher ticks on wall-clock boundaries and resets the daily flags once a day. Ticks
//! run on their own task, a slow tick never delays the next boundary. A tick arriving while the
//! previous one is still running is skipped.

use std::time::Duration;

use chrono::DateTime;
use chrono::NaiveTime;
use chrono::TimeDelta;
use chrono::Timelike;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatch;
use crate::dispatch::Dispatcher;
use crate::messaging::Messenger;
use crate::storage::Storage;

/// Hour (UTC) of the daily reset
pub const DAILY_RESET_HOUR: u32 = 0;

/// Minute of the daily reset
pub const DAILY_RESET_MINUTE: u32 = 5;

/// Start of the hour containing `now`
fn top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|time| time.with_second(0))
        .and_then(|time| time.with_nanosecond(0))
        .unwrap_or(now)
}

/// First tick strictly after `now`
///
/// The smallest multiple of the interval, counted from the top of the current hour, that lies
/// after `now`. Intervals dividing 60 land on the same minutes every hour.
pub fn next_tick_boundary(now: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let interval = i64::from(interval_minutes.max(1));
    let top_of_hour = top_of_hour(now);
    let elapsed = (now - top_of_hour).num_minutes();

    top_of_hour + TimeDelta::minutes((elapsed / interval + 1) * interval)
}

/// Next daily reset strictly after `now`
pub fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let reset_time = NaiveTime::from_hms_opt(DAILY_RESET_HOUR, DAILY_RESET_MINUTE, 0)
        .unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(reset_time).and_utc();

    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// Time left until `at`, zero when it already passed
fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or_default()
}

/// Scheduler driving a dispatcher
pub struct Scheduler<S: Storage, M: Messenger> {
    dispatcher: Dispatcher<S, M>,
    interval_minutes: u32,
    tick_on_startup: bool,
}

impl<S: Storage, M: Messenger> Scheduler<S, M> {
    pub fn new(dispatcher: Dispatcher<S, M>, interval_minutes: u32, tick_on_startup: bool) -> Self {
        Self {
            dispatcher,
            interval_minutes: interval_minutes.max(1),
            tick_on_startup,
        }
    }

    /// Start both triggers, they stop when the token is cancelled
    pub fn start(self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        if self.tick_on_startup {
            tracing::info!("Running a tick on startup");
            spawn_tick(&self.dispatcher);
        }

        vec![
            tokio::spawn(run_ticks(
                self.dispatcher.clone(),
                self.interval_minutes,
                shutdown.clone(),
            )),
            tokio::spawn(run_daily_reset(self.dispatcher, shutdown.clone())),
        ]
    }
}

/// Run a tick on its own task
fn spawn_tick<S: Storage, M: Messenger>(dispatcher: &Dispatcher<S, M>) {
    let dispatcher = dispatcher.clone();

    tokio::spawn(async move {
        match dispatcher.tick().await {
            Ok(_) => {}
            Err(dispatch::Error::TickInProgress) => {
                tracing::warn!("Previous tick is still running, skipping this one");
            }
            Err(err) => tracing::error!("Tick failed: {err}"),
        }
    });
}

/// Fire ticks on a fixed period, the first one on the next boundary
async fn run_ticks<S: Storage, M: Messenger>(
    dispatcher: Dispatcher<S, M>,
    interval_minutes: u32,
    shutdown: CancellationToken,
) {
    let first_tick = next_tick_boundary(Utc::now(), interval_minutes);
    let period = Duration::from_secs(u64::from(interval_minutes) * 60);

    tracing::info!("Ticking every {interval_minutes} minute(s), first tick at {first_tick}");

    let mut interval = tokio::time::interval_at(Instant::now() + until(first_tick), period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => spawn_tick(&dispatcher),
        }
    }

    tracing::debug!("Tick trigger stopped");
}

/// Reset the daily flags at the same time every day
async fn run_daily_reset<S: Storage, M: Messenger>(
    dispatcher: Dispatcher<S, M>,
    shutdown: CancellationToken,
) {
    loop {
        let next_reset = next_daily_reset(Utc::now());

        tracing::debug!("Next daily reset at {next_reset}");

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(until(next_reset)) => {
                if let Err(err) = dispatcher.reset_daily_flags().await {
                    tracing::error!("Daily reset failed: {err}");
                }
            }
        }
    }

    tracing::debug!("Daily reset trigger stopped");
}
