//! Byte sizes written the way people write them in config files

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid size '{0}'")]
    InvalidFormat(String),

    #[error("Unknown size unit '{0}'")]
    InvalidUnit(String),

    #[error("Size '{0}' overflows u64")]
    Overflow(String),
}

const KIB: u64 = 1024;
const UNITS: &[(&str, u64)] = &[("B", 1), ("KB", KIB), ("MB", KIB * KIB), ("GB", KIB * KIB * KIB)];

/// Byte count accepting `1048576`, `"1MB"`, `"512 KiB"` and similar (binary multiples)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

fn multiplier(unit: &str) -> Option<u64> {
    let unit = unit.trim().to_ascii_uppercase();
    let unit = unit.strip_suffix("IB").map(|u| format!("{u}B")).unwrap_or(unit);
    let unit = if unit.len() == 1 && unit != "B" {
        format!("{unit}B")
    } else {
        unit
    };
    UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, factor)| *factor)
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);

        let value: u64 = digits
            .parse()
            .map_err(|_| ParseError::InvalidFormat(s.to_string()))?;

        if unit.trim().is_empty() {
            return Ok(ByteSize(value));
        }

        let factor = multiplier(unit).ok_or_else(|| ParseError::InvalidUnit(unit.trim().to_string()))?;
        value
            .checked_mul(factor)
            .map(ByteSize)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte count or a size string such as \"1MB\"")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ByteSize(v))
            }

            // config and TOML hand integers over as i64
            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size cannot be negative: {v}")))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, factor) = UNITS
            .iter()
            .rev()
            .find(|(_, factor)| self.0 >= *factor && self.0 % factor == 0)
            .copied()
            .unwrap_or(("B", 1));
        write!(f, "{}{}", self.0 / factor, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_units() {
        assert_eq!("1048576".parse::<ByteSize>().unwrap().as_u64(), 1_048_576);
        assert_eq!("1MB".parse::<ByteSize>().unwrap().as_u64(), 1_048_576);
        assert_eq!("1 MiB".parse::<ByteSize>().unwrap().as_u64(), 1_048_576);
        assert_eq!("512k".parse::<ByteSize>().unwrap().as_u64(), 512 * 1024);
        assert_eq!("20B".parse::<ByteSize>().unwrap().as_u64(), 20);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("MB".parse::<ByteSize>(), Err(ParseError::InvalidFormat(_))));
        assert!(matches!("5XB".parse::<ByteSize>(), Err(ParseError::InvalidUnit(_))));
        assert!(matches!(
            "99999999999999GB".parse::<ByteSize>(),
            Err(ParseError::Overflow(_))
        ));
    }

    #[test]
    fn test_deserialize_forms() {
        #[derive(Deserialize)]
        struct Limits {
            size: ByteSize,
        }
        let parsed: Limits = serde_json::from_str(r#"{"size": "10MB"}"#).unwrap();
        assert_eq!(parsed.size.as_u64(), 10 * 1024 * 1024);
        let parsed: Limits = serde_json::from_str(r#"{"size": 1000}"#).unwrap();
        assert_eq!(parsed.size.as_u64(), 1000);
        assert!(serde_json::from_str::<Limits>(r#"{"size": -1}"#).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteSize(1_048_576).to_string(), "1MB");
        assert_eq!(ByteSize(1_000_000).to_string(), "1000000B");
        assert_eq!(ByteSize(3 * 1024).to_string(), "3KB");
        assert_eq!(ByteSize(0).to_string(), "0B");
    }
}
