//! Weighted-average-cost bookkeeping and the prices implied by trades.
//!
//! Prices are integers over the collateral unit (`1_000_000` = 1.0 with the
//! default unit). Acquisitions move the average cost; disposals only book
//! realized PnL against it.

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;

use super::state::Position;
use super::volume::TradeSide;
use crate::errors::{ProjectionError, ProjectionResult};
use crate::math::int::saturating_sub;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposal {
    /// Zero quantity or nothing held.
    Skipped,
    Applied,
    /// Lenient mode: more was sold than held, booked against the held amount.
    Clamped { requested: BigUint, applied: BigUint },
}

pub fn record_acquisition(position: &mut Position, price: &BigUint, quantity: &BigUint) {
    if quantity.is_zero() {
        return;
    }
    let amount = &position.amount + quantity;
    let cost = &position.avg_price * &position.amount + price * quantity;
    position.avg_price = cost / &amount;
    position.amount = amount;
    position.total_bought += quantity;
}

/// Tokens arriving by transfer, priced at the sender's cost basis. Unlike
/// a purchase this leaves `total_bought` alone.
pub fn record_transfer_in(position: &mut Position, basis: &BigUint, quantity: &BigUint) {
    let bought = position.total_bought.clone();
    record_acquisition(position, basis, quantity);
    position.total_bought = bought;
}

/// Book a disposal. With `strict`, selling more than is held is an
/// [`ProjectionError::InsufficientPosition`] and nothing changes.
pub fn record_disposal(
    position: &mut Position,
    price: &BigUint,
    quantity: &BigUint,
    strict: bool,
) -> ProjectionResult<Disposal> {
    if quantity.is_zero() || position.amount.is_zero() {
        return Ok(Disposal::Skipped);
    }

    let (applied, outcome) = if quantity > &position.amount {
        if strict {
            return Err(ProjectionError::InsufficientPosition {
                user: position.user.clone(),
                token: position.token.to_string(),
                held: position.amount.clone(),
                requested: quantity.clone(),
            });
        }
        let held = position.amount.clone();
        (
            held.clone(),
            Disposal::Clamped { requested: quantity.clone(), applied: held },
        )
    } else {
        (quantity.clone(), Disposal::Applied)
    };

    let edge = BigInt::from(price.clone()) - BigInt::from(position.avg_price.clone());
    position.realized_pnl += BigInt::from(applied.clone()) * edge;
    position.amount -= &applied;
    Ok(outcome)
}

/// One side of an exchange order fill, seen from the account trading
/// outcome tokens against collateral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub account: String,
    pub side: TradeSide,
    pub position_id: BigUint,
    /// Outcome tokens.
    pub base_amount: BigUint,
    /// Collateral.
    pub quote_amount: BigUint,
}

/// A maker giving collateral (asset id 0) is buying. Otherwise the maker is
/// selling tokens and the sale is booked to the taker's account.
pub fn order_fill(
    maker: &str,
    taker: &str,
    maker_asset_id: &BigUint,
    taker_asset_id: &BigUint,
    maker_amount_filled: &BigUint,
    taker_amount_filled: &BigUint,
) -> Fill {
    if maker_asset_id.is_zero() {
        Fill {
            account: maker.to_string(),
            side: TradeSide::Buy,
            position_id: taker_asset_id.clone(),
            base_amount: taker_amount_filled.clone(),
            quote_amount: maker_amount_filled.clone(),
        }
    } else {
        Fill {
            account: taker.to_string(),
            side: TradeSide::Sell,
            position_id: maker_asset_id.clone(),
            base_amount: maker_amount_filled.clone(),
            quote_amount: taker_amount_filled.clone(),
        }
    }
}

/// `counter_amount * unit / quantity`; zero for a zero-size fill.
pub fn trade_price(counter_amount: &BigUint, quantity: &BigUint, unit: &BigUint) -> BigUint {
    if quantity.is_zero() {
        return BigUint::zero();
    }
    counter_amount * unit / quantity
}

/// Collateral value of `quantity` tokens at a unit price.
pub fn token_cost(quantity: &BigUint, price: &BigUint, unit: &BigUint) -> BigUint {
    if unit.is_zero() {
        return BigUint::zero();
    }
    quantity * price / unit
}

/// Price of LP shares once the token portion of a funding is carved out.
/// Negative residuals clamp to zero.
pub fn lp_share_price(
    collateral: &BigUint,
    tokens_cost: &BigUint,
    shares: &BigUint,
    unit: &BigUint,
) -> BigUint {
    trade_price(&saturating_sub(collateral, tokens_cost), shares, unit)
}

/// Tokens sent back to a funder when added amounts are unbalanced:
/// every outcome below the maximum returns the difference.
pub fn funding_refunds(amounts_added: &[BigUint]) -> (BigUint, Vec<(usize, BigUint)>) {
    let spend = amounts_added.iter().max().cloned().unwrap_or_default();
    let refunds = amounts_added
        .iter()
        .enumerate()
        .filter(|(_, a)| *a < &spend)
        .map(|(i, a)| (i, &spend - a))
        .collect();
    (spend, refunds)
}
