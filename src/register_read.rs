use crate::register_decoder::{ByteOrder, Decoding};
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Logical quantity a register read provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeterValueName {
    /// Instantaneous power in W.
    Power,
    /// Energy counter in Wh.
    Energy,
}

impl fmt::Display for MeterValueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power => f.write_str("Power"),
            Self::Energy => f.write_str("Energy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegisterType {
    #[default]
    #[serde(alias = "ReadInputRegister")]
    Input,
    #[serde(alias = "ReadHoldingRegister")]
    Holding,
}

/// Declaration of a single register read, as loaded from the meter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReadSpec {
    pub name: MeterValueName,
    pub address: u16,
    #[serde(default, rename = "type")]
    pub register_type: RegisterType,
    pub bytes: u16,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_factor_to_value")]
    pub factor_to_value: f64,
    pub decoding: Decoding,
}

fn default_factor_to_value() -> f64 {
    1.0
}

impl RegisterReadSpec {
    /// Input register read in big-endian order with a scale factor of 1.
    pub fn new(name: MeterValueName, address: u16, bytes: u16, decoding: Decoding) -> Self {
        Self {
            name,
            address,
            register_type: RegisterType::default(),
            bytes,
            byte_order: ByteOrder::default(),
            factor_to_value: default_factor_to_value(),
            decoding,
        }
    }

    /// Reads holding instead of input registers, or back.
    pub fn with_register_type(mut self, register_type: RegisterType) -> Self {
        self.register_type = register_type;
        self
    }

    /// Byte order the device uses for this value.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Scale factor applied to the decoded value.
    pub fn with_factor_to_value(mut self, factor_to_value: f64) -> Self {
        self.factor_to_value = factor_to_value;
        self
    }
}

/// Selects the read for `name`: the first one in declaration order wins, later duplicates are ignored.
pub fn first_register_read(
    name: MeterValueName,
    register_reads: &[RegisterReadSpec],
) -> Option<&RegisterReadSpec> {
    register_reads.iter().find(|read| read.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_declared_read_wins() {
        let reads = vec![
            RegisterReadSpec::new(MeterValueName::Energy, 300, 4, Decoding::Decimal),
            RegisterReadSpec::new(MeterValueName::Power, 100, 4, Decoding::Float),
            RegisterReadSpec::new(MeterValueName::Power, 200, 2, Decoding::Decimal),
        ];

        let power = first_register_read(MeterValueName::Power, &reads).unwrap();
        assert_eq!(power.address, 100);
        assert_eq!(power.decoding, Decoding::Float);

        let energy = first_register_read(MeterValueName::Energy, &reads).unwrap();
        assert_eq!(energy.address, 300);
    }

    #[test]
    fn test_no_matching_read() {
        let reads = vec![RegisterReadSpec::new(
            MeterValueName::Power,
            100,
            4,
            Decoding::Float,
        )];
        assert!(first_register_read(MeterValueName::Energy, &reads).is_none());
        assert!(first_register_read(MeterValueName::Power, &[]).is_none());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let read: RegisterReadSpec = serde_json::from_str(
            r#"{ "name": "Power", "address": 12, "bytes": 4, "decoding": "Float" }"#,
        )
        .unwrap();
        assert_eq!(read.register_type, RegisterType::Input);
        assert_eq!(read.byte_order, ByteOrder::BigEndian);
        assert_eq!(read.factor_to_value, 1.0);

        let read: RegisterReadSpec = serde_json::from_str(
            r#"{
                "name": "Energy",
                "address": 40,
                "type": "Holding",
                "bytes": 4,
                "byteOrder": "CDAB",
                "factorToValue": 0.1,
                "decoding": "Decimal"
            }"#,
        )
        .unwrap();
        assert_eq!(read.register_type, RegisterType::Holding);
        assert_eq!(read.byte_order, ByteOrder::BigEndianSwap);
        assert_eq!(read.factor_to_value, 0.1);
    }
}
