use crate::register_read::MeterValueName;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Where energy figures come from, fixed when the accumulator is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergySource {
    /// Integrate power samples (W) over elapsed time.
    IntegratePower,
    /// Difference consecutive readings of an energy counter register (Wh).
    EnergyRegister,
}

impl EnergySource {
    /// The quantity that has to be observed for this source.
    pub fn observed_quantity(self) -> MeterValueName {
        match self {
            Self::IntegratePower => MeterValueName::Power,
            Self::EnergyRegister => MeterValueName::Energy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnergyState {
    /// Wh accumulated since the last reset.
    pub cumulative_energy: f64,
    pub last_observed_at: Instant,
    pub running: bool,
    /// Last energy register reading, unset until the first reading after start or reset.
    last_reading: Option<f64>,
}

/// Running energy total with explicit start, stop and reset.
///
/// The total only grows while running and is readable without taking the state lock.
pub struct EnergyAccumulator {
    appliance_id: String,
    source: EnergySource,
    state: Mutex<EnergyState>,
    /// `f64` bits of `state.cumulative_energy`.
    total: AtomicU64,
}

impl EnergyAccumulator {
    pub fn new(appliance_id: impl Into<String>, source: EnergySource) -> Self {
        Self {
            appliance_id: appliance_id.into(),
            source,
            state: Mutex::new(EnergyState {
                cumulative_energy: 0.0,
                last_observed_at: Instant::now(),
                running: false,
                last_reading: None,
            }),
            total: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn source(&self) -> EnergySource {
        self.source
    }

    /// Energy in Wh.
    pub fn energy(&self) -> f64 {
        f64::from_bits(self.total.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn state(&self) -> EnergyState {
        self.state.lock().clone()
    }

    pub fn start_energy_counter(&self) {
        self.start_at(Instant::now());
    }

    /// Starts accumulating from `now`; nothing before it is counted. No-op while running.
    pub fn start_at(&self, now: Instant) {
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        debug!(appliance_id = %self.appliance_id, "starting energy counter");
        state.running = true;
        state.last_observed_at = now;
        state.last_reading = None;
    }

    /// Freezes the total. No-op while stopped.
    pub fn stop_energy_counter(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        debug!(
            appliance_id = %self.appliance_id,
            energy = state.cumulative_energy,
            "stopping energy counter"
        );
        state.running = false;
    }

    pub fn reset_energy_counter(&self) {
        self.reset_at(Instant::now());
    }

    /// Zeroes the total regardless of whether the counter is running.
    pub fn reset_at(&self, now: Instant) {
        let mut state = self.state.lock();
        debug!(appliance_id = %self.appliance_id, "resetting energy counter");
        state.cumulative_energy = 0.0;
        state.last_observed_at = now;
        state.last_reading = None;
        self.publish(&state);
    }

    /// Folds in a power sample (W) or an energy register reading (Wh), per the source.
    ///
    /// Non-finite values are skipped; the next finite one covers the elapsed time.
    pub fn observe(&self, value: f64, now: Instant) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        if !value.is_finite() {
            warn!(appliance_id = %self.appliance_id, value, "ignoring non-finite energy observation");
            return;
        }
        let increment = match self.source {
            EnergySource::IntegratePower => {
                let elapsed = now.saturating_duration_since(state.last_observed_at);
                power_to_energy(value, elapsed)
            }
            EnergySource::EnergyRegister => {
                let increment = state
                    .last_reading
                    .map_or(0.0, |last_reading| (value - last_reading).max(0.0));
                state.last_reading = Some(value);
                increment
            }
        };
        state.last_observed_at = now;
        state.cumulative_energy += increment;
        self.publish(&state);
    }

    fn publish(&self, state: &EnergyState) {
        self.total
            .store(state.cumulative_energy.to_bits(), Ordering::Release);
    }
}

/// Energy in Wh delivered by `power` W over `elapsed`. Negative power counts as none.
fn power_to_energy(power: f64, elapsed: Duration) -> f64 {
    power.max(0.0) * elapsed.as_secs_f64() / SECONDS_PER_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn secs(seconds: u64) -> Duration {
        Duration::from_secs(seconds)
    }

    #[test]
    fn test_integrates_power_over_time() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::IntegratePower);
        let start = Instant::now();
        accumulator.start_at(start);

        accumulator.observe(1200.0, start + secs(60));
        assert!((accumulator.energy() - 20.0).abs() < EPSILON);

        accumulator.observe(3600.0, start + secs(70));
        assert!((accumulator.energy() - 30.0).abs() < EPSILON);
    }

    #[test]
    fn test_ignored_while_stopped() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::IntegratePower);
        let start = Instant::now();
        accumulator.observe(1000.0, start + secs(3600));
        assert_eq!(accumulator.energy(), 0.0);

        accumulator.start_at(start);
        accumulator.observe(1000.0, start + secs(36));
        accumulator.stop_energy_counter();
        accumulator.observe(1000.0, start + secs(3600));

        assert!((accumulator.energy() - 10.0).abs() < EPSILON);
        assert!(!accumulator.is_running());
    }

    #[test]
    fn test_monotonic_while_running() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::IntegratePower);
        let start = Instant::now();
        accumulator.start_at(start);
        let mut previous = accumulator.energy();
        for (tick, power) in [500.0, -200.0, 0.0, 1500.0, -1.0, 20.0].into_iter().enumerate() {
            accumulator.observe(power, start + secs(10 * (tick as u64 + 1)));
            assert!(accumulator.energy() >= previous);
            previous = accumulator.energy();
        }
    }

    #[test]
    fn test_non_finite_observations_are_skipped() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::IntegratePower);
        let start = Instant::now();
        accumulator.start_at(start);

        accumulator.observe(f64::NAN, start + secs(30));
        accumulator.observe(f64::INFINITY, start + secs(45));
        assert_eq!(accumulator.energy(), 0.0);

        accumulator.observe(1200.0, start + secs(60));
        assert!((accumulator.energy() - 20.0).abs() < EPSILON);

        let accumulator = EnergyAccumulator::new("meter", EnergySource::EnergyRegister);
        accumulator.start_at(start);
        accumulator.observe(100.0, start + secs(10));
        accumulator.observe(f64::NAN, start + secs(20));
        accumulator.observe(104.0, start + secs(30));
        assert!((accumulator.energy() - 4.0).abs() < EPSILON);
    }

    #[test]
    fn test_reset_then_start_integrates_from_zero() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::IntegratePower);
        let start = Instant::now();
        accumulator.start_at(start);
        accumulator.observe(1000.0, start + secs(360));
        accumulator.stop_energy_counter();
        assert!(accumulator.energy() > 0.0);

        accumulator.reset_at(start + secs(400));
        assert_eq!(accumulator.energy(), 0.0);

        // The gap between reset and start is not counted.
        accumulator.start_at(start + secs(1000));
        accumulator.observe(3600.0, start + secs(1010));
        assert!((accumulator.energy() - 10.0).abs() < EPSILON);
    }

    #[test]
    fn test_reset_while_running() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::IntegratePower);
        let start = Instant::now();
        accumulator.start_at(start);
        accumulator.observe(1000.0, start + secs(360));

        accumulator.reset_at(start + secs(720));
        assert_eq!(accumulator.energy(), 0.0);
        assert!(accumulator.is_running());

        accumulator.observe(1000.0, start + secs(756));
        assert!((accumulator.energy() - 10.0).abs() < EPSILON);
    }

    #[test]
    fn test_start_is_idempotent() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::IntegratePower);
        let start = Instant::now();
        accumulator.start_at(start);
        accumulator.start_at(start + secs(30));
        accumulator.observe(360.0, start + secs(60));
        assert!((accumulator.energy() - 6.0).abs() < EPSILON);
    }

    #[test]
    fn test_energy_register_differences() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::EnergyRegister);
        let start = Instant::now();
        accumulator.start_at(start);

        accumulator.observe(15_000.0, start + secs(10));
        assert_eq!(accumulator.energy(), 0.0);

        accumulator.observe(15_020.5, start + secs(20));
        accumulator.observe(15_030.5, start + secs(30));
        assert!((accumulator.energy() - 30.5).abs() < EPSILON);

        // A counter that wraps or is reset on the device re-baselines.
        accumulator.observe(3.0, start + secs(40));
        accumulator.observe(5.0, start + secs(50));
        assert!((accumulator.energy() - 32.5).abs() < EPSILON);
    }

    #[test]
    fn test_energy_register_rebaselines_after_restart() {
        let accumulator = EnergyAccumulator::new("meter", EnergySource::EnergyRegister);
        let start = Instant::now();
        accumulator.start_at(start);
        accumulator.observe(100.0, start + secs(10));
        accumulator.observe(110.0, start + secs(20));
        accumulator.stop_energy_counter();

        accumulator.start_at(start + secs(100));
        accumulator.observe(500.0, start + secs(110));
        accumulator.observe(502.0, start + secs(120));

        assert!((accumulator.energy() - 12.0).abs() < EPSILON);
    }

    #[test]
    fn test_observed_quantity() {
        assert_eq!(
            EnergySource::IntegratePower.observed_quantity(),
            MeterValueName::Power
        );
        assert_eq!(
            EnergySource::EnergyRegister.observed_quantity(),
            MeterValueName::Energy
        );
    }
}
