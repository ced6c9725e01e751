//! Bonding-curve transitions for a fixed-product market maker.
//!
//! Transitions are computed against a borrowed pool and returned as a
//! [`CurveUpdate`]; nothing is written until [`Pool::apply_curve`] runs on the
//! staged copy, so a failed step leaves the pool untouched.

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};

use super::state::Pool;
use crate::errors::{ProjectionError, ProjectionResult};
use crate::math::int::{self, checked_sub, nth_root};
use crate::math::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveParams {
    /// Fractional digits carried by stored prices.
    pub price_decimals: u32,
    pub max_root_iterations: u32,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            price_decimals: 18,
            max_root_iterations: int::DEFAULT_MAX_ROOT_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveUpdate {
    pub reserves: Vec<BigUint>,
    /// `None` leaves the stored prices as they are.
    pub prices: Option<Vec<Decimal>>,
    pub liquidity_parameter: BigUint,
    pub total_supply: Option<BigUint>,
}

/// For each outcome, the product of every other reserve, plus their sum.
fn leave_one_out(reserves: &[BigUint]) -> (Vec<BigUint>, BigUint) {
    let n = reserves.len();
    let mut prefix = vec![BigUint::one(); n + 1];
    for i in 0..n {
        prefix[i + 1] = &prefix[i] * &reserves[i];
    }
    let mut others = vec![BigUint::zero(); n];
    let mut suffix = BigUint::one();
    for i in (0..n).rev() {
        others[i] = &prefix[i] * &suffix;
        suffix *= &reserves[i];
    }
    let denom = int::sum(&others);
    (others, denom)
}

/// Implied outcome probabilities.
///
/// `price[i] = Π_{j≠i} r_j / Σ_k Π_{j≠k} r_k`, which for strictly positive
/// reserves is `product / (r_i * Σ product / r_k)`. Each price is truncated
/// to `decimals` digits, so a vector of `n` prices may sum to less than one by
/// fewer than `n` units in the last place. Empty markets price at zero.
pub fn derive_prices(reserves: &[BigUint], decimals: u32) -> Vec<Decimal> {
    let zeros = || vec![Decimal::new(BigInt::zero(), decimals); reserves.len()];
    if int::sum(reserves).is_zero() {
        return zeros();
    }
    let (others, denom) = leave_one_out(reserves);
    if denom.is_zero() {
        return zeros();
    }
    let denom = BigInt::from(denom);
    others
        .into_iter()
        .map(|o| {
            Decimal::from_ratio(&BigInt::from(o), &denom, decimals)
                .unwrap_or_else(|_| Decimal::new(BigInt::zero(), decimals))
        })
        .collect()
}

/// Same prices as [`derive_prices`], as integers over `unit` (floor).
pub fn derive_unit_prices(reserves: &[BigUint], unit: &BigUint) -> Vec<BigUint> {
    let (others, denom) = leave_one_out(reserves);
    if denom.is_zero() || int::sum(reserves).is_zero() {
        return vec![BigUint::zero(); reserves.len()];
    }
    others.iter().map(|o| o * unit / &denom).collect()
}

impl Pool {
    fn check_outcome(&self, outcome_index: usize) -> ProjectionResult<()> {
        if outcome_index >= self.outcome_count() {
            return Err(ProjectionError::InvalidTrade(format!(
                "outcome {outcome_index} out of range for {} outcomes",
                self.outcome_count()
            )));
        }
        Ok(())
    }

    fn check_arity(&self, amounts: &[BigUint]) -> ProjectionResult<()> {
        if amounts.len() != self.outcome_count() {
            return Err(ProjectionError::InvalidTrade(format!(
                "expected {} amounts, got {}",
                self.outcome_count(),
                amounts.len()
            )));
        }
        Ok(())
    }

    fn liquidity_of(&self, reserves: &[BigUint], params: &CurveParams) -> ProjectionResult<BigUint> {
        nth_root(
            &int::product(reserves),
            reserves.len() as u32,
            params.max_root_iterations,
        )
    }

    pub fn apply_buy(
        &self,
        outcome_index: usize,
        investment_amount: &BigUint,
        fee_amount: &BigUint,
        tokens_bought: &BigUint,
        params: &CurveParams,
    ) -> ProjectionResult<CurveUpdate> {
        self.check_outcome(outcome_index)?;
        let net = checked_sub(investment_amount, fee_amount).ok_or_else(|| {
            ProjectionError::InvalidTrade(format!(
                "fee {fee_amount} exceeds investment {investment_amount}"
            ))
        })?;

        let mut reserves = Vec::with_capacity(self.outcome_count());
        for (i, old) in self.reserves.iter().enumerate() {
            let funded = old + &net;
            let next = if i == outcome_index {
                checked_sub(&funded, tokens_bought).ok_or_else(|| {
                    ProjectionError::ReserveUnderflow { pool: self.id.clone(), outcome: i }
                })?
            } else {
                funded
            };
            reserves.push(next);
        }

        Ok(CurveUpdate {
            prices: Some(derive_prices(&reserves, params.price_decimals)),
            liquidity_parameter: self.liquidity_of(&reserves, params)?,
            reserves,
            total_supply: None,
        })
    }

    pub fn apply_sell(
        &self,
        outcome_index: usize,
        return_amount: &BigUint,
        fee_amount: &BigUint,
        tokens_sold: &BigUint,
        params: &CurveParams,
    ) -> ProjectionResult<CurveUpdate> {
        self.check_outcome(outcome_index)?;
        let withdrawn = return_amount + fee_amount;

        let mut reserves = Vec::with_capacity(self.outcome_count());
        for (i, old) in self.reserves.iter().enumerate() {
            let credited = if i == outcome_index { old + tokens_sold } else { old.clone() };
            let next = checked_sub(&credited, &withdrawn).ok_or_else(|| {
                ProjectionError::ReserveUnderflow { pool: self.id.clone(), outcome: i }
            })?;
            reserves.push(next);
        }

        Ok(CurveUpdate {
            prices: Some(derive_prices(&reserves, params.price_decimals)),
            liquidity_parameter: self.liquidity_of(&reserves, params)?,
            reserves,
            total_supply: None,
        })
    }

    /// Prices move only when this is the first funding of an empty pool.
    pub fn apply_add_liquidity(
        &self,
        amounts_added: &[BigUint],
        shares_minted: &BigUint,
        params: &CurveParams,
    ) -> ProjectionResult<CurveUpdate> {
        self.check_arity(amounts_added)?;
        let reserves: Vec<BigUint> = self
            .reserves
            .iter()
            .zip(amounts_added)
            .map(|(old, add)| old + add)
            .collect();

        let prices = if self.total_supply.is_zero() {
            Some(derive_prices(&reserves, params.price_decimals))
        } else {
            None
        };

        Ok(CurveUpdate {
            prices,
            liquidity_parameter: self.liquidity_of(&reserves, params)?,
            reserves,
            total_supply: Some(&self.total_supply + shares_minted),
        })
    }

    /// Prices move only when the burn empties the share supply.
    pub fn apply_remove_liquidity(
        &self,
        amounts_removed: &[BigUint],
        shares_burnt: &BigUint,
        params: &CurveParams,
    ) -> ProjectionResult<CurveUpdate> {
        self.check_arity(amounts_removed)?;
        let mut reserves = Vec::with_capacity(self.outcome_count());
        for (i, (old, removed)) in self.reserves.iter().zip(amounts_removed).enumerate() {
            let next = checked_sub(old, removed).ok_or_else(|| {
                ProjectionError::ReserveUnderflow { pool: self.id.clone(), outcome: i }
            })?;
            reserves.push(next);
        }

        let total_supply = checked_sub(&self.total_supply, shares_burnt).ok_or_else(|| {
            ProjectionError::InvalidTrade(format!(
                "burn of {shares_burnt} shares exceeds supply {}",
                self.total_supply
            ))
        })?;

        let prices = if total_supply.is_zero() {
            Some(derive_prices(&reserves, params.price_decimals))
        } else {
            None
        };

        Ok(CurveUpdate {
            prices,
            liquidity_parameter: self.liquidity_of(&reserves, params)?,
            reserves,
            total_supply: Some(total_supply),
        })
    }

    pub fn apply_curve(&mut self, update: CurveUpdate) {
        self.reserves = update.reserves;
        if let Some(prices) = update.prices {
            self.prices = prices;
        }
        self.scaled_liquidity_parameter =
            Decimal::from_scaled_int(&update.liquidity_parameter, self.collateral_decimals);
        self.liquidity_parameter = update.liquidity_parameter;
        if let Some(supply) = update.total_supply {
            self.total_supply = supply;
        }
    }
}
