use crate::register_read::RegisterType;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_modbus::prelude::*;

/// Failure of a single read transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("device responded with exception {0}")]
    Exception(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("expected {expected} registers in the response, got {actual}")]
    MalformedResponse { expected: usize, actual: usize },
}

/// A connected request/response session with one device.
///
/// Implementations are not expected to be reentrant: callers serialize access.
#[async_trait]
pub trait Session: Send {
    /// Reads `byte_length` bytes starting at `address`, in the order the device sends them.
    async fn read_registers(
        &mut self,
        register_type: RegisterType,
        address: u16,
        byte_length: u16,
    ) -> Result<Vec<u8>, TransactionError>;
}

/// Modbus TCP session that stays connected across polls.
pub struct TcpSession {
    context: client::Context,
    read_timeout: Duration,
}

impl TcpSession {
    const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(context: client::Context) -> Self {
        Self {
            context,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
        }
    }

    /// Opens a TCP connection, addressing `slave_id` when given.
    pub async fn connect(address: SocketAddr, slave_id: Option<u8>) -> std::io::Result<Self> {
        let context = match slave_id {
            Some(slave_id) => tcp::connect_slave(address, Slave(slave_id)).await?,
            None => tcp::connect(address).await?,
        };
        Ok(Self::new(context))
    }

    /// Overrides the per-read timeout (10 s by default).
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

#[async_trait]
impl Session for TcpSession {
    async fn read_registers(
        &mut self,
        register_type: RegisterType,
        address: u16,
        byte_length: u16,
    ) -> Result<Vec<u8>, TransactionError> {
        let word_count = byte_length.div_ceil(2);
        let read = match register_type {
            RegisterType::Input => self.context.read_input_registers(address, word_count),
            RegisterType::Holding => self.context.read_holding_registers(address, word_count),
        };
        // tokio-modbus returns Result<Result<Vec<u16>, ExceptionCode>, Error>
        let words = timeout(self.read_timeout, read)
            .await
            .map_err(|_| TransactionError::Timeout(self.read_timeout))?
            .map_err(|error| TransactionError::Transport(error.to_string()))?
            .map_err(|exception| TransactionError::Exception(format!("{exception:?}")))?;
        words_to_bytes(&words, byte_length)
    }
}

/// Flattens register words into bytes, high byte first as they travel on the wire.
pub fn words_to_bytes(words: &[u16], byte_length: u16) -> Result<Vec<u8>, TransactionError> {
    let expected = usize::from(byte_length.div_ceil(2));
    if words.len() != expected {
        return Err(TransactionError::MalformedResponse {
            expected,
            actual: words.len(),
        });
    }
    let mut bytes: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();
    bytes.truncate(usize::from(byte_length));
    Ok(bytes)
}
