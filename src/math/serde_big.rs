//! Decimal-string serde adapters for big integers.
//!
//! On-chain quantities exceed every JSON number type, so state and event
//! payloads carry them as base-10 strings: `"1000000000000000000"`.

use num_bigint::{BigInt, BigUint};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

pub mod uint {
    use super::*;

    pub fn serialize<S: Serializer>(v: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(d)?;
        BigUint::parse_bytes(raw.trim().as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid unsigned integer: {raw}")))
    }
}

pub mod int {
    use super::*;

    pub fn serialize<S: Serializer>(v: &BigInt, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigInt, D::Error> {
        let raw = String::deserialize(d)?;
        BigInt::parse_bytes(raw.trim().as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid signed integer: {raw}")))
    }
}

pub mod uint_vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(v: &[BigUint], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(v.len()))?;
        for item in v {
            seq.serialize_element(&item.to_str_radix(10))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<BigUint>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.iter()
            .map(|r| {
                BigUint::parse_bytes(r.trim().as_bytes(), 10)
                    .ok_or_else(|| D::Error::custom(format!("invalid unsigned integer: {r}")))
            })
            .collect()
    }
}

/// Parse a base-10 unsigned integer, used by config and storage decoding.
pub fn parse_uint(raw: &str) -> Option<BigUint> {
    BigUint::parse_bytes(raw.trim().as_bytes(), 10)
}

pub fn parse_int(raw: &str) -> Option<BigInt> {
    BigInt::parse_bytes(raw.trim().as_bytes(), 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "uint")]
        amount: BigUint,
        #[serde(with = "int")]
        pnl: BigInt,
        #[serde(with = "uint_vec")]
        reserves: Vec<BigUint>,
    }

    #[test]
    fn test_strings_on_the_wire() {
        let h = Holder {
            amount: BigUint::parse_bytes(b"123456789012345678901234567890", 10).unwrap(),
            pnl: BigInt::from(-42),
            reserves: vec![BigUint::from(1u8), BigUint::from(2u8)],
        };
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(
            json,
            r#"{"amount":"123456789012345678901234567890","pnl":"-42","reserves":["1","2"]}"#
        );
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_rejects_garbage() {
        let bad = r#"{"amount":"12x","pnl":"0","reserves":[]}"#;
        assert!(serde_json::from_str::<Holder>(bad).is_err());
    }
}
