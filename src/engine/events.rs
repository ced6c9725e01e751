//! Input events for the market-maker projection.
//!
//! One JSON object per event, for example:
//! ```text
//! {"pool":"0xabc","block_number":10,"timestamp":1700000000,"tx_hash":"0x01","log_index":3,
//!  "type":"buy","buyer":"0xu1","outcome_index":0,"investment_amount":"50",
//!  "fee_amount":"0","outcome_tokens_bought":"30"}
//! ```

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::math::serde_big;

pub type Address = String;
pub type Timestamp = u64;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub fn is_zero_address(addr: &str) -> bool {
    addr.eq_ignore_ascii_case(ZERO_ADDRESS)
}

/// Position of an event in the collaborator-provided total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub block_number: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Emitting market-maker contract.
    pub pool: Address,
    #[serde(default)]
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub tx_hash: String,
    pub log_index: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PoolCreated {
        creator: Address,
        conditional_tokens: Address,
        collateral_token: Address,
        #[serde(with = "serde_big::uint")]
        fee: BigUint,
        conditions: Vec<String>,
        outcome_slot_count: usize,
    },
    Buy {
        buyer: Address,
        outcome_index: usize,
        #[serde(with = "serde_big::uint")]
        investment_amount: BigUint,
        #[serde(with = "serde_big::uint")]
        fee_amount: BigUint,
        #[serde(with = "serde_big::uint")]
        outcome_tokens_bought: BigUint,
    },
    Sell {
        seller: Address,
        outcome_index: usize,
        #[serde(with = "serde_big::uint")]
        return_amount: BigUint,
        #[serde(with = "serde_big::uint")]
        fee_amount: BigUint,
        #[serde(with = "serde_big::uint")]
        outcome_tokens_sold: BigUint,
    },
    AddLiquidity {
        funder: Address,
        #[serde(with = "serde_big::uint_vec")]
        amounts_added: Vec<BigUint>,
        #[serde(with = "serde_big::uint")]
        shares_minted: BigUint,
    },
    RemoveLiquidity {
        funder: Address,
        #[serde(with = "serde_big::uint_vec")]
        amounts_removed: Vec<BigUint>,
        #[serde(with = "serde_big::uint")]
        collateral_removed_from_fee_pool: BigUint,
        #[serde(with = "serde_big::uint")]
        shares_burnt: BigUint,
    },
    ShareTransfer {
        from: Address,
        to: Address,
        #[serde(with = "serde_big::uint")]
        value: BigUint,
    },
    /// Order-book fill on the exchange; `pool` carries the exchange address.
    /// Asset id 0 is collateral.
    OrderFilled {
        order_hash: String,
        maker: Address,
        taker: Address,
        #[serde(with = "serde_big::uint")]
        maker_asset_id: BigUint,
        #[serde(with = "serde_big::uint")]
        taker_asset_id: BigUint,
        #[serde(with = "serde_big::uint")]
        maker_amount_filled: BigUint,
        #[serde(with = "serde_big::uint")]
        taker_amount_filled: BigUint,
        #[serde(with = "serde_big::uint")]
        fee: BigUint,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PoolCreated { .. } => "pool_created",
            EventKind::Buy { .. } => "buy",
            EventKind::Sell { .. } => "sell",
            EventKind::AddLiquidity { .. } => "add_liquidity",
            EventKind::RemoveLiquidity { .. } => "remove_liquidity",
            EventKind::ShareTransfer { .. } => "share_transfer",
            EventKind::OrderFilled { .. } => "order_filled",
        }
    }
}

impl Event {
    /// Stable identifier: transaction hash plus log index.
    pub fn id(&self) -> String {
        event_id(&self.tx_hash, self.log_index)
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

pub fn event_id(tx_hash: &str, log_index: u64) -> String {
    format!("{tx_hash}_{log_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_buy_line() {
        let line = r#"{"pool":"0xabc","block_number":10,"timestamp":1700000000,"tx_hash":"0x01","log_index":3,"type":"buy","buyer":"0xu1","outcome_index":0,"investment_amount":"50","fee_amount":"0","outcome_tokens_bought":"30"}"#;
        let ev: Event = serde_json::from_str(line).unwrap();
        assert_eq!(ev.id(), "0x01_3");
        assert_eq!(ev.kind.name(), "buy");
        match ev.kind {
            EventKind::Buy { outcome_tokens_bought, .. } => {
                assert_eq!(outcome_tokens_bought, BigUint::from(30u8))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_serialized_form_reparses() {
        let ev = Event {
            pool: "0xpool".into(),
            block_number: 1,
            timestamp: 86_400,
            tx_hash: "0xaa".into(),
            log_index: 0,
            kind: EventKind::AddLiquidity {
                funder: "0xf".into(),
                amounts_added: vec![BigUint::from(100u8), BigUint::from(60u8)],
                shares_minted: BigUint::from(100u8),
            },
        };
        let line = serde_json::to_string(&ev).unwrap();
        assert!(line.contains(r#""type":"add_liquidity""#));
        assert_eq!(serde_json::from_str::<Event>(&line).unwrap(), ev);
    }

    #[test]
    fn test_parse_order_filled_line() {
        let line = r#"{"pool":"0xexchange","block_number":12,"timestamp":1700000000,"tx_hash":"0x02","log_index":7,"type":"order_filled","order_hash":"0xord","maker":"0xm","taker":"0xt","maker_asset_id":"0","taker_asset_id":"1234","maker_amount_filled":"300000","taker_amount_filled":"500000","fee":"0"}"#;
        let ev: Event = serde_json::from_str(line).unwrap();
        assert_eq!(ev.kind.name(), "order_filled");
        match ev.kind {
            EventKind::OrderFilled { taker_asset_id, maker_amount_filled, .. } => {
                assert_eq!(taker_asset_id, BigUint::from(1234u32));
                assert_eq!(maker_amount_filled, BigUint::from(300_000u32));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cursor_orders_by_block_then_log() {
        let a = Cursor { block_number: 5, log_index: 9 };
        let b = Cursor { block_number: 6, log_index: 0 };
        assert!(a < b);
    }

    #[test]
    fn test_zero_address_case_insensitive() {
        assert!(is_zero_address("0x0000000000000000000000000000000000000000"));
        assert!(!is_zero_address("0x00000000000000000000000000000000000000a1"));
    }
}
