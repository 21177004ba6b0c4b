//! Modbus Electricity Meter Library
//!
//! This library polls an electricity meter over a persistent Modbus TCP connection,
//! decodes its power and energy registers, and derives min/avg/max power per
//! measurement interval as well as an energy counter that can be started, stopped
//! and reset.

pub mod config;
pub mod configuration_validator;
pub mod electricity_meter;
pub mod energy_accumulator;
pub mod modbus_session;
pub mod power_sampler;
pub mod read_executor;
pub mod register_decoder;
pub mod register_read;

// Re-export commonly used types for easier access
pub use config::MeterConfig;
pub use configuration_validator::{ConfigurationError, ValidationResult};
pub use electricity_meter::ModbusElectricityMeter;
pub use energy_accumulator::{EnergyAccumulator, EnergySource};
pub use modbus_session::{Session, TcpSession, TransactionError};
pub use power_sampler::{PowerSampler, PowerSnapshot};
pub use read_executor::ReadError;
pub use register_decoder::{ByteOrder, DecodeError, Decoding};
pub use register_read::{MeterValueName, RegisterReadSpec, RegisterType};
