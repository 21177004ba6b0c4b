use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Order of the bytes of a multi-register value as delivered by the device.
///
/// Uses the ABCD notation, where A is the most significant byte. For the
/// 32-bit value `0x12345678`:
/// - `BigEndian` (ABCD): `[0x12, 0x34, 0x56, 0x78]`
/// - `LittleEndian` (DCBA): `[0x78, 0x56, 0x34, 0x12]`
/// - `BigEndianSwap` (CDAB): `[0x56, 0x78, 0x12, 0x34]`
/// - `LittleEndianSwap` (BADC): `[0x34, 0x12, 0x78, 0x56]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    #[serde(alias = "ABCD")]
    BigEndian,
    #[serde(alias = "DCBA")]
    LittleEndian,
    /// Big-endian words in reversed word order, common among Modbus meters.
    #[serde(alias = "CDAB")]
    BigEndianSwap,
    #[serde(alias = "BADC")]
    LittleEndianSwap,
}

impl ByteOrder {
    /// Rearranges `raw` into most-significant-byte-first order.
    fn to_big_endian(self, raw: &[u8]) -> Vec<u8> {
        match self {
            Self::BigEndian => raw.to_vec(),
            Self::LittleEndian => raw.iter().rev().copied().collect(),
            Self::BigEndianSwap => raw.chunks(2).rev().flatten().copied().collect(),
            Self::LittleEndianSwap => raw
                .chunks(2)
                .flat_map(|word| word.iter().rev())
                .copied()
                .collect(),
        }
    }

    /// Inverse of [`Self::to_big_endian`]: lays out big-endian bytes the way the device would.
    pub fn from_big_endian(self, big_endian: &[u8]) -> Vec<u8> {
        // Every permutation is its own inverse.
        self.to_big_endian(big_endian)
    }
}

/// Numeric encoding of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decoding {
    /// IEEE 754 binary32 or binary64.
    Float,
    /// Two's complement integer multiplied by the scale factor.
    Decimal,
}

impl Decoding {
    /// Whether a value of `byte_length` bytes can be decoded with this encoding.
    pub fn supports_width(self, byte_length: usize) -> bool {
        match self {
            Self::Float => matches!(byte_length, 4 | 8),
            Self::Decimal => matches!(byte_length, 2 | 4 | 8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{byte_length} bytes cannot be decoded as {decoding:?}")]
    UnsupportedWidth {
        decoding: Decoding,
        byte_length: usize,
    },
    /// NaN or infinity, which meters report when a value is not available.
    #[error("register does not hold a finite value")]
    NonFinite,
}

/// Decodes raw register bytes into a physical value.
///
/// The scale factor is applied to both encodings; floats usually carry `1.0`.
pub fn decode(
    raw: &[u8],
    decoding: Decoding,
    byte_order: ByteOrder,
    scale_factor: f64,
) -> Result<f64, DecodeError> {
    if !decoding.supports_width(raw.len()) {
        return Err(DecodeError::UnsupportedWidth {
            decoding,
            byte_length: raw.len(),
        });
    }
    let bytes = byte_order.to_big_endian(raw);
    let value = match (decoding, bytes.as_slice()) {
        (Decoding::Float, &[a, b, c, d]) => f64::from(f32::from_be_bytes([a, b, c, d])),
        (Decoding::Float, &[a, b, c, d, e, f, g, h]) => f64::from_be_bytes([a, b, c, d, e, f, g, h]),
        (Decoding::Decimal, &[a, b]) => f64::from(i16::from_be_bytes([a, b])),
        (Decoding::Decimal, &[a, b, c, d]) => f64::from(i32::from_be_bytes([a, b, c, d])),
        #[allow(clippy::cast_precision_loss)]
        (Decoding::Decimal, &[a, b, c, d, e, f, g, h]) => {
            i64::from_be_bytes([a, b, c, d, e, f, g, h]) as f64
        }
        _ => {
            return Err(DecodeError::UnsupportedWidth {
                decoding,
                byte_length: raw.len(),
            })
        }
    };
    let value = value * scale_factor;
    if !value.is_finite() {
        return Err(DecodeError::NonFinite);
    }
    Ok(value)
}
