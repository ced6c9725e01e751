//! Narrow lookups the projector needs from outside: collateral decimals and
//! condition -> position-id derivation. Both are resolved once per pool at
//! creation and cached on the pool.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use num_bigint::BigUint;

use crate::math::serde_big;

pub const DEFAULT_COLLATERAL_DECIMALS: u32 = 18;

pub trait CollateralRegistry {
    /// Decimal count of the collateral asset, `None` when unknown.
    fn decimals(&self, collateral: &str) -> Option<u32>;
}

pub trait PositionIdResolver {
    /// Position id for an outcome slot of a condition, `None` when the
    /// condition is unknown.
    fn position_id(&self, condition: &str, outcome_index: usize) -> Option<BigUint>;

    fn knows_condition(&self, condition: &str) -> bool {
        self.position_id(condition, 0).is_some()
    }
}

/// Borrowed bundle handed to the reducer.
#[derive(Clone, Copy)]
pub struct Lookups<'a> {
    pub collateral: &'a dyn CollateralRegistry,
    pub positions: &'a dyn PositionIdResolver,
}

#[derive(Debug, Clone, Default)]
pub struct StaticCollateralRegistry {
    decimals: HashMap<String, u32>,
}

impl StaticCollateralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collateral: &str, decimals: u32) {
        self.decimals.insert(collateral.to_lowercase(), decimals);
    }

    /// Parse `addr:decimals,addr:decimals`. Malformed entries are skipped.
    pub fn from_spec(spec: &str) -> Self {
        let mut reg = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some((addr, dec)) = entry.split_once(':') {
                if let Ok(dec) = dec.trim().parse() {
                    reg.insert(addr.trim(), dec);
                }
            }
        }
        reg
    }
}

impl CollateralRegistry for StaticCollateralRegistry {
    fn decimals(&self, collateral: &str) -> Option<u32> {
        self.decimals.get(&collateral.to_lowercase()).copied()
    }
}

/// Precomputed condition -> position ids, indexed by outcome slot.
#[derive(Debug, Clone, Default)]
pub struct PositionIdTable {
    ids: HashMap<String, Vec<BigUint>>,
}

impl PositionIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, condition: &str, ids: Vec<BigUint>) {
        self.ids.insert(condition.to_lowercase(), ids);
    }

    /// Load a JSON object of `{"<condition>": ["<id0>", "<id1>", ...]}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading position ids from {}", path.display()))?;
        let parsed: HashMap<String, Vec<String>> =
            serde_json::from_str(&raw).context("parsing position id table")?;
        let mut table = Self::new();
        for (condition, ids) in parsed {
            let ids = ids
                .iter()
                .map(|id| {
                    serde_big::parse_uint(id)
                        .with_context(|| format!("bad position id {id} for {condition}"))
                })
                .collect::<Result<Vec<_>>>()?;
            table.insert(&condition, ids);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl PositionIdResolver for PositionIdTable {
    fn position_id(&self, condition: &str, outcome_index: usize) -> Option<BigUint> {
        self.ids
            .get(&condition.to_lowercase())
            .and_then(|ids| ids.get(outcome_index))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_registry_spec_parsing() {
        let reg = StaticCollateralRegistry::from_spec("0xAbC:6, 0xdef:18,broken,0x1:x");
        assert_eq!(reg.decimals("0xabc"), Some(6));
        assert_eq!(reg.decimals("0xDEF"), Some(18));
        assert_eq!(reg.decimals("0x1"), None);
    }

    #[test]
    fn test_position_table_lookup() {
        let mut t = PositionIdTable::new();
        t.insert("0xCond", vec![BigUint::from(11u8), BigUint::from(12u8)]);
        assert_eq!(t.position_id("0xcond", 1), Some(BigUint::from(12u8)));
        assert_eq!(t.position_id("0xcond", 2), None);
        assert_eq!(t.position_id("0xother", 0), None);
    }

    #[test]
    fn test_position_table_load() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"0xc1": ["123456789012345678901234567890", "7"]}}"#).unwrap();
        let t = PositionIdTable::load(f.path()).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.position_id("0xc1", 1), Some(BigUint::from(7u8)));
    }

    #[test]
    fn test_position_table_rejects_bad_ids() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"0xc1": ["12a"]}}"#).unwrap();
        assert!(PositionIdTable::load(f.path()).is_err());
    }
}
