//! Backoff-aware polling for live-updating views
//!
//! A [`SmartPoller`] runs a callback on a timer. Failures stretch the interval
//! (exponentially or linearly, up to a ceiling) and a success snaps it back to
//! the base interval, so a recovering service is still noticed without being
//! hammered while it is down.
//!
//! The interval arithmetic lives in [`PollSchedule`], which has no timers and
//! is tested on its own. The spawned task only sleeps, watches visibility and
//! listens for shutdown.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// How the interval grows after a failure
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Multiply by `factor` (values below 1 are treated as 1)
    Exponential { factor: f64 },

    /// Add `step`
    Linear { step: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential { factor: 2.0 }
    }
}

/// Poller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Interval while the callback keeps succeeding
    pub base_interval: Duration,

    /// Ceiling for the backed-off interval
    pub max_interval: Duration,

    pub backoff: Backoff,

    /// Stop polling while the view reports hidden
    pub pause_when_hidden: bool,

    /// Pause after this many consecutive failures until resumed.
    /// `None` keeps polling at the backed-off interval forever.
    pub pause_after_errors: Option<u32>,

    /// Run the callback as soon as the poller starts or becomes visible again
    pub immediate: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            backoff: Backoff::default(),
            pause_when_hidden: true,
            pause_after_errors: None,
            immediate: true,
        }
    }
}

/// Interval state machine
#[derive(Debug, Clone)]
pub struct PollSchedule {
    base: Duration,
    max: Duration,
    backoff: Backoff,
    pause_after_errors: Option<u32>,
    current: Duration,
    consecutive_errors: u32,
}

impl PollSchedule {
    pub fn new(config: &PollerConfig) -> Self {
        let max = config.max_interval.max(config.base_interval);
        Self {
            base: config.base_interval,
            max,
            backoff: config.backoff,
            pause_after_errors: config.pause_after_errors,
            current: config.base_interval,
            consecutive_errors: 0,
        }
    }

    /// Delay before the next poll
    pub fn interval(&self) -> Duration {
        self.current
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Back to the base interval
    pub fn on_success(&mut self) {
        self.current = self.base;
        self.consecutive_errors = 0;
    }

    /// Grow the interval, returning the new delay
    pub fn on_failure(&mut self) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        let next = match self.backoff {
            Backoff::Exponential { factor } => {
                Duration::try_from_secs_f64(self.current.as_secs_f64() * factor.max(1.0))
                    .unwrap_or(self.max)
            }
            Backoff::Linear { step } => self.current.saturating_add(step),
        };
        self.current = next.min(self.max);
        self.current
    }

    /// Whether the failure streak has reached the configured pause threshold
    pub fn should_pause(&self) -> bool {
        self.pause_after_errors
            .is_some_and(|limit| self.consecutive_errors >= limit.max(1))
    }

    /// Forget the failure streak
    pub fn reset(&mut self) {
        self.on_success();
    }
}

/// What the poller is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Running,
    PausedHidden,
    PausedErrors,
    Stopped,
}

/// Spawns pollers
pub struct SmartPoller;

impl SmartPoller {
    /// Start polling `callback`.
    ///
    /// `visibility` reports `true` while the consumer is visible. A closed
    /// channel freezes the last reported value.
    pub fn spawn<F, Fut, E>(
        config: PollerConfig,
        visibility: watch::Receiver<bool>,
        callback: F,
    ) -> PollerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (state_tx, state_rx) = watch::channel(PollState::Running);
        let resume = Arc::new(Notify::new());

        let task = tokio::spawn(run(
            config,
            visibility,
            callback,
            shutdown_rx,
            Arc::clone(&resume),
            state_tx,
        ));

        PollerHandle {
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            resume,
            state: state_rx,
        }
    }
}

/// Owner of one poller task; dropping it stops the poller
pub struct PollerHandle {
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    resume: Arc<Notify>,
    state: watch::Receiver<PollState>,
}

impl PollerHandle {
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Resume a poller paused by `pause_after_errors`
    pub fn resume(&self) {
        if self.state() == PollState::PausedErrors {
            self.resume.notify_one();
        }
    }

    /// Stop the poller and wait for it to finish its current callback
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<F, Fut, E>(
    config: PollerConfig,
    mut visibility: watch::Receiver<bool>,
    mut callback: F,
    mut shutdown_rx: mpsc::Receiver<()>,
    resume: Arc<Notify>,
    state_tx: watch::Sender<PollState>,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut schedule = PollSchedule::new(&config);
    let mut visible = *visibility.borrow_and_update();
    let mut visibility_open = true;
    let mut poll_now = config.immediate;

    debug!(
        base_ms = config.base_interval.as_millis() as u64,
        max_ms = config.max_interval.as_millis() as u64,
        "Starting poller"
    );

    'poll: loop {
        if config.pause_when_hidden && !visible {
            state_tx.send_replace(PollState::PausedHidden);
            debug!("Poller paused while hidden");

            if !visibility_open {
                // Hidden for good; only shutdown can end this
                let _ = shutdown_rx.recv().await;
                break;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                changed = visibility.changed() => match changed {
                    Ok(()) => {
                        visible = *visibility.borrow_and_update();
                        poll_now = visible && config.immediate;
                    }
                    Err(_) => visibility_open = false,
                },
            }
            continue;
        }

        if schedule.should_pause() {
            state_tx.send_replace(PollState::PausedErrors);
            warn!(
                consecutive_errors = schedule.consecutive_errors(),
                "Poller paused after repeated errors"
            );

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = resume.notified() => {
                    info!("Poller resumed");
                    schedule.reset();
                    poll_now = true;
                }
            }
            continue;
        }

        state_tx.send_replace(PollState::Running);

        if !poll_now {
            // One deadline per cycle; visibility updates must not push it back
            let deadline = Instant::now() + schedule.interval();
            let mut went_hidden = false;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break 'poll,
                    _ = sleep_until(deadline) => break,
                    changed = visibility.changed(), if visibility_open => {
                        match changed {
                            Ok(()) => visible = *visibility.borrow_and_update(),
                            Err(_) => visibility_open = false,
                        }
                        if config.pause_when_hidden && !visible {
                            went_hidden = true;
                            break;
                        }
                    }
                }
            }
            if went_hidden {
                continue;
            }
        }
        poll_now = false;

        match callback().await {
            Ok(()) => schedule.on_success(),
            Err(err) => {
                let next = schedule.on_failure();
                warn!(
                    error = %err,
                    consecutive_errors = schedule.consecutive_errors(),
                    next_ms = next.as_millis() as u64,
                    "Poll failed, backing off"
                );
            }
        }
    }

    state_tx.send_replace(PollState::Stopped);
    debug!("Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    fn config(base_ms: u64, max_ms: u64) -> PollerConfig {
        PollerConfig {
            base_interval: Duration::from_millis(base_ms),
            max_interval: Duration::from_millis(max_ms),
            ..Default::default()
        }
    }

    /// Callback that records call times and fails while `fail` is set
    fn recorder(
        fail: Arc<std::sync::atomic::AtomicBool>,
    ) -> (
        Arc<Mutex<Vec<Instant>>>,
        impl FnMut() -> std::future::Ready<Result<(), String>> + Send + 'static,
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let callback = move || {
            sink.lock().unwrap().push(Instant::now());
            if fail.load(Ordering::SeqCst) {
                std::future::ready(Err("service unavailable".to_string()))
            } else {
                std::future::ready(Ok(()))
            }
        };
        (calls, callback)
    }

    fn gaps(calls: &[Instant]) -> Vec<u64> {
        calls
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect()
    }

    #[test]
    fn test_exponential_schedule() {
        let mut schedule = PollSchedule::new(&config(100, 400));

        assert_eq!(schedule.interval(), Duration::from_millis(100));
        assert_eq!(schedule.on_failure(), Duration::from_millis(200));
        assert_eq!(schedule.on_failure(), Duration::from_millis(400));
        assert_eq!(schedule.on_failure(), Duration::from_millis(400));
        assert_eq!(schedule.consecutive_errors(), 3);

        schedule.on_success();
        assert_eq!(schedule.interval(), Duration::from_millis(100));
        assert_eq!(schedule.consecutive_errors(), 0);
    }

    #[test]
    fn test_linear_schedule() {
        let mut schedule = PollSchedule::new(&PollerConfig {
            backoff: Backoff::Linear {
                step: Duration::from_millis(150),
            },
            ..config(100, 500)
        });

        assert_eq!(schedule.on_failure(), Duration::from_millis(250));
        assert_eq!(schedule.on_failure(), Duration::from_millis(400));
        assert_eq!(schedule.on_failure(), Duration::from_millis(500));
    }

    #[test]
    fn test_factor_below_one_never_shrinks() {
        let mut schedule = PollSchedule::new(&PollerConfig {
            backoff: Backoff::Exponential { factor: 0.5 },
            ..config(100, 500)
        });

        assert_eq!(schedule.on_failure(), Duration::from_millis(100));
    }

    #[test]
    fn test_never_pauses_by_default() {
        let mut schedule = PollSchedule::new(&config(100, 400));
        for _ in 0..100 {
            schedule.on_failure();
        }
        assert!(!schedule.should_pause());
    }

    #[test]
    fn test_pause_threshold() {
        let mut schedule = PollSchedule::new(&PollerConfig {
            pause_after_errors: Some(2),
            ..config(100, 400)
        });

        schedule.on_failure();
        assert!(!schedule.should_pause());
        schedule.on_failure();
        assert!(schedule.should_pause());

        schedule.reset();
        assert!(!schedule.should_pause());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_to_ceiling() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let (calls, callback) = recorder(fail);
        let (_vis_tx, vis_rx) = watch::channel(true);

        let handle = SmartPoller::spawn(config(100, 400), vis_rx, callback);
        sleep(Duration::from_millis(1050)).await;

        // Immediate call, then 200, 400, 400 (capped)
        assert_eq!(gaps(&calls.lock().unwrap()), vec![200, 400, 400]);
        assert_eq!(handle.state(), PollState::Running);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_interval() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let (calls, callback) = recorder(fail.clone());
        let (_vis_tx, vis_rx) = watch::channel(true);

        let handle = SmartPoller::spawn(config(100, 1000), vis_rx, callback);

        // Calls at 0 and 200 fail; the next one is due at 600
        sleep(Duration::from_millis(250)).await;
        fail.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(600)).await;

        // 600 succeeds, then base interval again: 700, 800
        assert_eq!(gaps(&calls.lock().unwrap()), vec![200, 400, 100, 100]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_pauses_and_visible_resumes() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (calls, callback) = recorder(fail);
        let (vis_tx, vis_rx) = watch::channel(true);

        let handle = SmartPoller::spawn(config(100, 400), vis_rx, callback);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);

        vis_tx.send(false).unwrap();
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(handle.state(), PollState::PausedHidden);

        vis_tx.send(true).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(handle.state(), PollState::Running);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_visible_updates_keep_the_timer() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (calls, callback) = recorder(fail);
        let (vis_tx, vis_rx) = watch::channel(true);

        let handle = SmartPoller::spawn(
            PollerConfig {
                immediate: false,
                ..config(100, 400)
            },
            vis_rx,
            callback,
        );

        // A chatty visibility source re-sends "visible" faster than the interval
        for _ in 0..20 {
            sleep(Duration::from_millis(60)).await;
            vis_tx.send(true).unwrap();
        }

        let calls = calls.lock().unwrap().clone();
        assert!(calls.len() >= 10, "only {} polls in 1200ms", calls.len());
        assert!(gaps(&calls).iter().all(|&gap| gap == 100));
        assert_eq!(handle.state(), PollState::Running);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_changes_ignored_when_not_configured() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let (vis_tx, vis_rx) = watch::channel(true);

        let handle = SmartPoller::spawn(
            PollerConfig {
                pause_when_hidden: false,
                immediate: false,
                ..config(100, 400)
            },
            vis_rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), String>(()) }
            },
        );

        for i in 0..10 {
            sleep(Duration::from_millis(45)).await;
            vis_tx.send(i % 2 == 0).unwrap();
        }
        sleep(Duration::from_millis(20)).await;

        // Polls at 100, 200, 300 and 400 regardless of the toggling
        assert_eq!(count.load(Ordering::SeqCst), 4);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_ignored_when_not_configured() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let (vis_tx, vis_rx) = watch::channel(false);

        let handle = SmartPoller::spawn(
            PollerConfig {
                pause_when_hidden: false,
                ..config(100, 400)
            },
            vis_rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), String>(()) }
            },
        );
        sleep(Duration::from_millis(350)).await;

        assert_eq!(count.load(Ordering::SeqCst), 4);
        drop(vis_tx);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_after_errors_until_resumed() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let (calls, callback) = recorder(fail.clone());
        let (_vis_tx, vis_rx) = watch::channel(true);

        let handle = SmartPoller::spawn(
            PollerConfig {
                pause_after_errors: Some(2),
                ..config(100, 400)
            },
            vis_rx,
            callback,
        );
        sleep(Duration::from_millis(2000)).await;

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(handle.state(), PollState::PausedErrors);

        fail.store(false, Ordering::SeqCst);
        handle.resume();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(handle.state(), PollState::Running);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let (_vis_tx, vis_rx) = watch::channel(true);

        let handle = SmartPoller::spawn(config(100, 400), vis_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), String>(()) }
        });
        sleep(Duration::from_millis(150)).await;
        drop(handle);

        let seen = count.load(Ordering::SeqCst);
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_stopped() {
        let (_vis_tx, vis_rx) = watch::channel(true);
        let handle = SmartPoller::spawn(config(100, 400), vis_rx, || async {
            Ok::<(), String>(())
        });
        let mut state = handle.state.clone();

        handle.shutdown().await;

        assert_eq!(*state.borrow_and_update(), PollState::Stopped);
    }
}
