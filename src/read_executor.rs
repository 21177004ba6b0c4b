use crate::modbus_session::{Session, TransactionError};
use crate::register_decoder::{decode, DecodeError, Decoding};
use crate::register_read::{MeterValueName, RegisterReadSpec};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    #[error("reading register {address} failed: {source}")]
    Transaction {
        address: u16,
        #[source]
        source: TransactionError,
    },
    #[error("decoding register {address} failed: {source}")]
    Decode {
        address: u16,
        #[source]
        source: DecodeError,
    },
    #[error("no register read is configured for {0}")]
    NotConfigured(MeterValueName),
}

/// Reads one declared register and turns the response into a value.
#[async_trait]
pub trait ReadExecutor: Send + Sync {
    fn register_read(&self) -> &RegisterReadSpec;

    fn decode(&self, raw: &[u8]) -> Result<f64, DecodeError>;

    async fn execute(&self, session: &mut dyn Session) -> Result<f64, ReadError> {
        let read = self.register_read();
        let raw = session
            .read_registers(read.register_type, read.address, read.bytes)
            .await
            .map_err(|source| ReadError::Transaction {
                address: read.address,
                source,
            })?;
        let value = self.decode(&raw).map_err(|source| ReadError::Decode {
            address: read.address,
            source,
        })?;
        debug!(address = read.address, name = %read.name, value, "decoded register");
        Ok(value)
    }
}

pub struct FloatReadExecutor {
    register_read: RegisterReadSpec,
}

impl ReadExecutor for FloatReadExecutor {
    fn register_read(&self) -> &RegisterReadSpec {
        &self.register_read
    }

    fn decode(&self, raw: &[u8]) -> Result<f64, DecodeError> {
        let read = &self.register_read;
        decode(raw, Decoding::Float, read.byte_order, read.factor_to_value)
    }
}

pub struct DecimalReadExecutor {
    register_read: RegisterReadSpec,
}

impl ReadExecutor for DecimalReadExecutor {
    fn register_read(&self) -> &RegisterReadSpec {
        &self.register_read
    }

    fn decode(&self, raw: &[u8]) -> Result<f64, DecodeError> {
        let read = &self.register_read;
        decode(raw, Decoding::Decimal, read.byte_order, read.factor_to_value)
    }
}

/// Picks the executor variant for the read's declared decoding.
pub fn executor_for(register_read: &RegisterReadSpec) -> Box<dyn ReadExecutor> {
    let register_read = register_read.clone();
    match register_read.decoding {
        Decoding::Float => Box::new(FloatReadExecutor { register_read }),
        Decoding::Decimal => Box::new(DecimalReadExecutor { register_read }),
    }
}
