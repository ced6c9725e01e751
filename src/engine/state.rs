//! Projected entities and the state container, with a deterministic digest
//! for replay validation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::events::{Address, Cursor, Timestamp};
use super::volume::VolumeLedger;
use crate::math::{serde_big, Decimal};

/// Market-maker pool, one per contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: Address,
    pub creator: Address,
    pub creation_timestamp: Timestamp,
    pub creation_tx_hash: String,
    pub conditional_tokens: Address,
    pub collateral_token: Address,
    #[serde(with = "serde_big::uint")]
    pub fee: BigUint,

    /// Set at creation, never changes.
    pub conditions: Vec<String>,
    /// Cached outcome index -> position id.
    #[serde(with = "serde_big::uint_vec")]
    pub position_ids: Vec<BigUint>,

    pub collateral_decimals: u32,
    #[serde(with = "serde_big::uint")]
    pub collateral_scale: BigUint,

    #[serde(with = "serde_big::uint_vec")]
    pub reserves: Vec<BigUint>,
    pub prices: Vec<Decimal>,
    #[serde(with = "serde_big::uint")]
    pub liquidity_parameter: BigUint,
    pub scaled_liquidity_parameter: Decimal,
    #[serde(with = "serde_big::uint")]
    pub total_supply: BigUint,

    pub ledger: VolumeLedger,
}

impl Pool {
    pub fn outcome_count(&self) -> usize {
        self.reserves.len()
    }
}

/// What a position is denominated in: an outcome token or a pool's LP share.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenId {
    Outcome(BigUint),
    PoolShare(Address),
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenId::Outcome(id) => write!(f, "outcome:{}", id.to_str_radix(10)),
            TokenId::PoolShare(pool) => write!(f, "share:{pool}"),
        }
    }
}

impl FromStr for TokenId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("outcome:") {
            return serde_big::parse_uint(id)
                .map(TokenId::Outcome)
                .ok_or_else(|| format!("bad outcome token id: {s}"));
        }
        if let Some(pool) = s.strip_prefix("share:") {
            return Ok(TokenId::PoolShare(pool.to_string()));
        }
        Err(format!("unknown token id: {s}"))
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Weighted-average-cost ledger for one user and token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub user: Address,
    pub token: TokenId,
    #[serde(with = "serde_big::uint")]
    pub amount: BigUint,
    /// Fixed point over the collateral unit. Meaningful only while `amount > 0`.
    #[serde(with = "serde_big::uint")]
    pub avg_price: BigUint,
    #[serde(with = "serde_big::uint")]
    pub total_bought: BigUint,
    #[serde(with = "serde_big::int")]
    pub realized_pnl: BigInt,
}

impl Position {
    pub fn new(user: &str, token: TokenId) -> Self {
        Self {
            user: user.to_string(),
            token,
            amount: BigUint::zero(),
            avg_price: BigUint::zero(),
            total_bought: BigUint::zero(),
            realized_pnl: BigInt::zero(),
        }
    }

    pub fn key(&self) -> String {
        position_key(&self.user, &self.token)
    }
}

pub fn position_key(user: &str, token: &TokenId) -> String {
    format!("{user}-{token}")
}

/// Running LP-share balance of one holder in one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMembership {
    pub pool: Address,
    pub holder: Address,
    #[serde(with = "serde_big::int")]
    pub amount: BigInt,
}

impl PoolMembership {
    pub fn new(pool: &str, holder: &str) -> Self {
        Self {
            pool: pool.to_string(),
            holder: holder.to_string(),
            amount: BigInt::zero(),
        }
    }

    pub fn key(&self) -> String {
        membership_key(&self.pool, &self.holder)
    }
}

pub fn membership_key(pool: &str, holder: &str) -> String {
    format!("{pool}-{holder}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Buy,
    Sell,
    AddLiquidity,
    RemoveLiquidity,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Buy => "Buy",
            TxType::Sell => "Sell",
            TxType::AddLiquidity => "AddLiquidity",
            TxType::RemoveLiquidity => "RemoveLiquidity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub tx_type: TxType,
    pub timestamp: Timestamp,
    pub market: Address,
    pub actor: Address,
    #[serde(with = "serde_big::uint")]
    pub trade_amount: BigUint,
    #[serde(with = "serde_big::uint")]
    pub fee_amount: BigUint,
    pub outcome_index: Option<usize>,
    #[serde(with = "serde_big::uint")]
    pub outcome_token_amount: BigUint,
}

/// Cross-market totals. Only the reducer commit writes these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub trades: u64,
    pub buys: u64,
    pub sells: u64,
    pub liquidity_adds: u64,
    pub liquidity_removes: u64,
    #[serde(with = "serde_big::uint")]
    pub collateral_volume: BigUint,
    #[serde(with = "serde_big::uint")]
    pub fee_volume: BigUint,
}

/// Everything one event changes, staged before it touches state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub event_id: String,
    pub cursor: Cursor,
    pub pool: Option<Pool>,
    pub positions: Vec<Position>,
    pub memberships: Vec<PoolMembership>,
    pub transaction: Option<TransactionRecord>,
    pub global: Option<GlobalStats>,
}

impl Transition {
    pub fn new(event_id: String, cursor: Cursor) -> Self {
        Self {
            event_id,
            cursor,
            pool: None,
            positions: Vec::new(),
            memberships: Vec::new(),
            transaction: None,
            global: None,
        }
    }
}

/// Full projection. Ordered maps keep serialization, and so the digest, canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionState {
    pub pools: BTreeMap<Address, Pool>,
    pub positions: BTreeMap<String, Position>,
    pub memberships: BTreeMap<String, PoolMembership>,
    pub global: GlobalStats,
    pub cursor: Option<Cursor>,
    /// Events applied.
    pub seq: u64,
}

impl ProjectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, user: &str, token: &TokenId) -> Option<&Position> {
        self.positions.get(&position_key(user, token))
    }

    pub fn membership(&self, pool: &str, holder: &str) -> Option<&PoolMembership> {
        self.memberships.get(&membership_key(pool, holder))
    }

    /// Apply a fully staged transition. Nothing here can fail.
    pub fn commit(&mut self, t: &Transition) {
        if let Some(pool) = &t.pool {
            self.pools.insert(pool.id.clone(), pool.clone());
        }
        for p in &t.positions {
            self.positions.insert(p.key(), p.clone());
        }
        for m in &t.memberships {
            self.memberships.insert(m.key(), m.clone());
        }
        if let Some(g) = &t.global {
            self.global = g.clone();
        }
        self.cursor = Some(t.cursor);
        self.seq += 1;
    }

    /// Hex SHA-256 over the canonical JSON encoding.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
