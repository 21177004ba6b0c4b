use crate::read_executor::ReadError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Source of power samples, polled once per tick.
#[async_trait]
pub trait PowerPoller: Send + Sync + 'static {
    /// Instantaneous power in W.
    async fn poll_power(&self) -> Result<f64, ReadError>;
}

/// Min/avg/max of a completed measurement window. All zero when nothing was sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerSnapshot {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub sample_count: usize,
}

/// Running statistics of the window currently being measured.
#[derive(Debug, Clone)]
pub struct PowerWindowAggregate {
    min: f64,
    avg: f64,
    max: f64,
    window_start: Instant,
    sample_count: usize,
    sum_for_avg: f64,
}

impl PowerWindowAggregate {
    pub fn new(window_start: Instant) -> Self {
        Self {
            min: 0.0,
            avg: 0.0,
            max: 0.0,
            window_start,
            sample_count: 0,
            sum_for_avg: 0.0,
        }
    }

    /// Adds a sample to the window. Non-finite values are rejected and leave it untouched.
    pub fn fold(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.sample_count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum_for_avg += value;
        self.sample_count += 1;
        #[allow(clippy::cast_precision_loss)]
        let mean = self.sum_for_avg / self.sample_count as f64;
        // Rounding in the sum must not push the mean outside the observed range.
        self.avg = mean.clamp(self.min, self.max);
        true
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    pub fn snapshot(&self) -> PowerSnapshot {
        PowerSnapshot {
            min: self.min,
            avg: self.avg,
            max: self.max,
            sample_count: self.sample_count,
        }
    }

    /// Closes the window once `measurement_interval` has elapsed, starting a fresh one at `now`.
    pub fn roll_over(
        &mut self,
        now: Instant,
        measurement_interval: Duration,
    ) -> Option<PowerSnapshot> {
        if now.saturating_duration_since(self.window_start) < measurement_interval {
            return None;
        }
        let snapshot = self.snapshot();
        *self = Self::new(now);
        Some(snapshot)
    }
}

struct Schedule {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Polls power on a fixed interval and publishes min/avg/max per measurement window.
pub struct PowerSampler {
    appliance_id: String,
    published: watch::Sender<PowerSnapshot>,
    schedule: Mutex<Option<Schedule>>,
}

impl PowerSampler {
    pub fn new(appliance_id: impl Into<String>) -> Self {
        let (published, _) = watch::channel(PowerSnapshot::default());
        Self {
            appliance_id: appliance_id.into(),
            published,
            schedule: Mutex::new(None),
        }
    }

    /// Starts polling. Returns `false` without side effects if already running
    /// or if `poll_interval` is zero.
    ///
    /// The first tick fires one poll interval after the call. Must be called
    /// from within a Tokio runtime.
    pub fn start(
        &self,
        poll_interval: Duration,
        measurement_interval: Duration,
        poller: Arc<dyn PowerPoller>,
    ) -> bool {
        if poll_interval.is_zero() {
            warn!(appliance_id = %self.appliance_id, "refusing to poll with a zero interval");
            return false;
        }
        let mut schedule = self.schedule.lock();
        if schedule
            .as_ref()
            .is_some_and(|schedule| !schedule.handle.is_finished())
        {
            return false;
        }
        debug!(
            appliance_id = %self.appliance_id,
            ?poll_interval,
            ?measurement_interval,
            "starting power sampler"
        );
        let (shutdown, shutdown_rx) = oneshot::channel();
        let tick_handler = TickHandler {
            appliance_id: self.appliance_id.clone(),
            published: self.published.clone(),
            poller,
            poll_interval,
            measurement_interval,
        };
        let handle = tokio::spawn(tick_handler.run(Instant::now(), shutdown_rx));
        *schedule = Some(Schedule { shutdown, handle });
        true
    }

    /// Stops polling and drops the window in progress. Returns `false` if not running.
    ///
    /// A read already in flight completes but is not folded.
    pub fn stop(&self) -> bool {
        let Some(schedule) = self.schedule.lock().take() else {
            return false;
        };
        debug!(appliance_id = %self.appliance_id, "stopping power sampler");
        // The tick handler may already have exited on its own.
        let _ = schedule.shutdown.send(());
        true
    }

    pub fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .as_ref()
            .is_some_and(|schedule| !schedule.handle.is_finished())
    }

    /// The most recently published window.
    pub fn snapshot(&self) -> PowerSnapshot {
        *self.published.borrow()
    }

    /// Notifies on every published window.
    pub fn subscribe(&self) -> watch::Receiver<PowerSnapshot> {
        self.published.subscribe()
    }

    /// Minimum power in W of the last completed window.
    pub fn min_power(&self) -> f64 {
        self.snapshot().min
    }

    /// Average power in W of the last completed window.
    pub fn average_power(&self) -> f64 {
        self.snapshot().avg
    }

    /// Maximum power in W of the last completed window.
    pub fn max_power(&self) -> f64 {
        self.snapshot().max
    }
}

impl Drop for PowerSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TickHandler {
    appliance_id: String,
    published: watch::Sender<PowerSnapshot>,
    poller: Arc<dyn PowerPoller>,
    poll_interval: Duration,
    measurement_interval: Duration,
}

impl TickHandler {
    async fn run(self, start: Instant, mut shutdown: oneshot::Receiver<()>) {
        let mut window = PowerWindowAggregate::new(start);
        let mut ticks = interval_at(start + self.poll_interval, self.poll_interval);
        // Ticks never overlap: a slow read delays the next tick instead of queueing a burst.
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticks.tick() => {}
            }

            let sample = self.poller.poll_power().await;
            if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            match sample {
                Ok(power) => {
                    if !window.fold(power) {
                        warn!(appliance_id = %self.appliance_id, power, "ignoring non-finite power sample");
                    }
                }
                Err(error) => {
                    warn!(appliance_id = %self.appliance_id, %error, "no power sample this cycle");
                }
            }

            if let Some(snapshot) = window.roll_over(Instant::now(), self.measurement_interval) {
                debug!(
                    appliance_id = %self.appliance_id,
                    min = snapshot.min,
                    avg = snapshot.avg,
                    max = snapshot.max,
                    samples = snapshot.sample_count,
                    "measurement window closed"
                );
                self.published.send_replace(snapshot);
            }
        }
        debug!(appliance_id = %self.appliance_id, "power sampler stopped");
    }
}
