//! Cumulative trade, fee and liquidity counters carried on each pool.
//!
//! Every raw counter has a scaled decimal mirror: `raw / 10^collateral_decimals`.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::math::int::day_index;
use crate::math::{serde_big, Decimal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLedger {
    pub trades_quantity: u64,
    pub buys_quantity: u64,
    pub sells_quantity: u64,
    pub liquidity_add_quantity: u64,
    pub liquidity_remove_quantity: u64,

    #[serde(with = "serde_big::uint")]
    pub collateral_volume: BigUint,
    pub scaled_collateral_volume: Decimal,
    #[serde(with = "serde_big::uint")]
    pub collateral_buy_volume: BigUint,
    pub scaled_collateral_buy_volume: Decimal,
    #[serde(with = "serde_big::uint")]
    pub collateral_sell_volume: BigUint,
    pub scaled_collateral_sell_volume: Decimal,
    #[serde(with = "serde_big::uint")]
    pub fee_volume: BigUint,
    pub scaled_fee_volume: Decimal,

    pub last_active_day: u64,
}

impl VolumeLedger {
    pub fn new(created_at: u64) -> Self {
        Self {
            last_active_day: day_index(created_at),
            ..Default::default()
        }
    }

    /// Stamp the day of activity. Out-of-order deliveries overwrite with the
    /// older day rather than keeping the maximum.
    pub fn touch_day(&mut self, timestamp: u64) {
        let day = day_index(timestamp);
        if day != self.last_active_day {
            self.last_active_day = day;
        }
    }

    /// Count one trade of gross size `trade_size` (fees included) and its fee.
    pub fn record_trade(
        &mut self,
        side: TradeSide,
        trade_size: &BigUint,
        fee: &BigUint,
        timestamp: u64,
        decimals: u32,
    ) {
        self.touch_day(timestamp);

        self.trades_quantity += 1;
        self.collateral_volume += trade_size;
        self.scaled_collateral_volume = Decimal::from_scaled_int(&self.collateral_volume, decimals);

        match side {
            TradeSide::Buy => {
                self.buys_quantity += 1;
                self.collateral_buy_volume += trade_size;
                self.scaled_collateral_buy_volume =
                    Decimal::from_scaled_int(&self.collateral_buy_volume, decimals);
            }
            TradeSide::Sell => {
                self.sells_quantity += 1;
                self.collateral_sell_volume += trade_size;
                self.scaled_collateral_sell_volume =
                    Decimal::from_scaled_int(&self.collateral_sell_volume, decimals);
            }
        }

        self.fee_volume += fee;
        self.scaled_fee_volume = Decimal::from_scaled_int(&self.fee_volume, decimals);
    }

    pub fn record_liquidity_add(&mut self) {
        self.liquidity_add_quantity += 1;
    }

    pub fn record_liquidity_remove(&mut self) {
        self.liquidity_remove_quantity += 1;
    }
}
