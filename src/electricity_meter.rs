use crate::config::MeterConfig;
use crate::configuration_validator::{
    validate, validate_intervals, validate_optional, ValidationResult,
};
use crate::energy_accumulator::{EnergyAccumulator, EnergySource};
use crate::modbus_session::Session;
use crate::power_sampler::{PowerPoller, PowerSampler, PowerSnapshot};
use crate::read_executor::{executor_for, ReadError, ReadExecutor};
use crate::register_read::{first_register_read, MeterValueName, RegisterReadSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Poll interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Measurement interval used when none is configured.
pub const DEFAULT_MEASUREMENT_INTERVAL: Duration = Duration::from_secs(60);

/// An electricity meter polled over a persistent Modbus session.
///
/// Power is sampled every poll interval and reported as min/avg/max of the last
/// completed measurement interval. Energy is taken from an `Energy` register read
/// when one is declared and integrated from power samples otherwise.
pub struct ModbusElectricityMeter<S> {
    appliance_id: String,
    register_reads: Vec<RegisterReadSpec>,
    poll_interval: Duration,
    measurement_interval: Duration,
    poller: Arc<MeterPoller<S>>,
    power_sampler: PowerSampler,
}

impl<S: Session + 'static> ModbusElectricityMeter<S> {
    pub fn new(
        appliance_id: impl Into<String>,
        session: S,
        register_reads: Vec<RegisterReadSpec>,
    ) -> Self {
        let appliance_id = appliance_id.into();
        let energy_source = if first_register_read(MeterValueName::Energy, &register_reads).is_some()
        {
            EnergySource::EnergyRegister
        } else {
            EnergySource::IntegratePower
        };
        let poller = MeterPoller {
            appliance_id: appliance_id.clone(),
            session: Mutex::new(session),
            power: first_register_read(MeterValueName::Power, &register_reads).map(executor_for),
            energy: first_register_read(MeterValueName::Energy, &register_reads).map(executor_for),
            energy_accumulator: EnergyAccumulator::new(appliance_id.clone(), energy_source),
        };
        Self {
            power_sampler: PowerSampler::new(appliance_id.clone()),
            appliance_id,
            register_reads,
            poll_interval: DEFAULT_POLL_INTERVAL,
            measurement_interval: DEFAULT_MEASUREMENT_INTERVAL,
            poller: Arc::new(poller),
        }
    }

    pub fn from_config(config: &MeterConfig, session: S) -> Self {
        Self::new(
            config.appliance_id.clone(),
            session,
            config.register_reads.clone(),
        )
        .with_poll_interval(config.poll_interval())
        .with_measurement_interval(config.measurement_interval())
    }

    /// How often power is read.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Length of the window min/avg/max are reported over.
    pub fn with_measurement_interval(mut self, measurement_interval: Duration) -> Self {
        self.measurement_interval = measurement_interval;
        self
    }

    pub fn appliance_id(&self) -> &str {
        &self.appliance_id
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn measurement_interval(&self) -> Duration {
        self.measurement_interval
    }

    pub fn energy_source(&self) -> EnergySource {
        self.poller.energy_accumulator.source()
    }

    /// Checks that power can be read, that a declared energy read is usable and
    /// that the intervals make sense.
    pub fn validate(&self) -> ValidationResult {
        debug!(
            appliance_id = %self.appliance_id,
            poll_interval = ?self.poll_interval,
            measurement_interval = ?self.measurement_interval,
            "validating configuration"
        );
        validate(
            &self.appliance_id,
            &[MeterValueName::Power],
            &self.register_reads,
        )
        .merge(validate_optional(
            &self.appliance_id,
            MeterValueName::Energy,
            &self.register_reads,
        ))
        .merge(validate_intervals(
            &self.appliance_id,
            self.poll_interval,
            self.measurement_interval,
        ))
    }

    /// Validates the configuration and starts sampling. Starting a running meter is a no-op.
    pub fn start(&self) -> Result<(), ValidationResult> {
        self.validate().into_result()?;
        debug!(appliance_id = %self.appliance_id, "starting");
        self.power_sampler.start(
            self.poll_interval,
            self.measurement_interval,
            self.poller.clone(),
        );
        Ok(())
    }

    /// Stops sampling; the window in progress is discarded.
    pub fn stop(&self) {
        debug!(appliance_id = %self.appliance_id, "stopping");
        self.power_sampler.stop();
    }

    pub fn is_running(&self) -> bool {
        self.power_sampler.is_running()
    }

    /// Average power in W of the last completed measurement window.
    pub fn average_power(&self) -> i32 {
        let power = watts(self.power_sampler.average_power());
        debug!(appliance_id = %self.appliance_id, power, "average power");
        power
    }

    /// Minimum power in W of the last completed measurement window.
    pub fn min_power(&self) -> i32 {
        let power = watts(self.power_sampler.min_power());
        debug!(appliance_id = %self.appliance_id, power, "min power");
        power
    }

    /// Maximum power in W of the last completed measurement window.
    pub fn max_power(&self) -> i32 {
        let power = watts(self.power_sampler.max_power());
        debug!(appliance_id = %self.appliance_id, power, "max power");
        power
    }

    /// Unrounded statistics of the last completed measurement window.
    pub fn power_snapshot(&self) -> PowerSnapshot {
        self.power_sampler.snapshot()
    }

    /// Notifies on every completed measurement window.
    pub fn subscribe_power(&self) -> watch::Receiver<PowerSnapshot> {
        self.power_sampler.subscribe()
    }

    /// Whether the appliance currently draws power, judged by a fresh read.
    pub async fn is_on(&self) -> bool {
        match self.poll_power().await {
            Ok(power) => power > 0.0,
            Err(error) => {
                warn!(appliance_id = %self.appliance_id, %error, "cannot tell whether the appliance is on");
                false
            }
        }
    }

    /// Reads the instantaneous power in W.
    pub async fn poll_power(&self) -> Result<f64, ReadError> {
        self.poller.read(MeterValueName::Power).await
    }

    /// Reads the energy register in Wh.
    pub async fn poll_energy(&self) -> Result<f64, ReadError> {
        self.poller.read(MeterValueName::Energy).await
    }

    /// Energy in Wh counted since the last reset.
    pub fn energy(&self) -> f64 {
        self.poller.energy_accumulator.energy()
    }

    pub fn start_energy_meter(&self) {
        debug!(appliance_id = %self.appliance_id, "start energy meter");
        self.poller.energy_accumulator.start_energy_counter();
    }

    pub fn stop_energy_meter(&self) {
        debug!(appliance_id = %self.appliance_id, "stop energy meter");
        self.poller.energy_accumulator.stop_energy_counter();
    }

    pub fn reset_energy_meter(&self) {
        debug!(appliance_id = %self.appliance_id, "reset energy meter");
        self.poller.energy_accumulator.reset_energy_counter();
    }
}

#[allow(clippy::cast_possible_truncation)]
fn watts(power: f64) -> i32 {
    power.round() as i32
}

/// Owns the session and the declared reads; every read goes through the session lock.
struct MeterPoller<S> {
    appliance_id: String,
    session: Mutex<S>,
    power: Option<Box<dyn ReadExecutor>>,
    energy: Option<Box<dyn ReadExecutor>>,
    energy_accumulator: EnergyAccumulator,
}

impl<S: Session> MeterPoller<S> {
    async fn read(&self, name: MeterValueName) -> Result<f64, ReadError> {
        let executor = match name {
            MeterValueName::Power => self.power.as_deref(),
            MeterValueName::Energy => self.energy.as_deref(),
        }
        .ok_or(ReadError::NotConfigured(name))?;
        let mut session = self.session.lock().await;
        executor.execute(&mut *session).await
    }
}

#[async_trait]
impl<S: Session + 'static> PowerPoller for MeterPoller<S> {
    /// Reads power and feeds the energy accumulator within the same tick.
    async fn poll_power(&self) -> Result<f64, ReadError> {
        let power = self.read(MeterValueName::Power).await;
        match self.energy_accumulator.source() {
            EnergySource::IntegratePower => {
                if let Ok(power) = power {
                    self.energy_accumulator.observe(power, Instant::now());
                }
            }
            EnergySource::EnergyRegister => {
                if self.energy_accumulator.is_running() {
                    match self.read(MeterValueName::Energy).await {
                        Ok(energy) => self.energy_accumulator.observe(energy, Instant::now()),
                        Err(error) => {
                            warn!(appliance_id = %self.appliance_id, %error, "no energy reading this cycle");
                        }
                    }
                }
            }
        }
        power
    }
}
