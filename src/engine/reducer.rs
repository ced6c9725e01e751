//! Pure reducer: (State, Event) -> staged Transition.
//!
//! This is the core of deterministic replay. [`reduce`] never mutates the
//! state it reads; everything an event touches is cloned into a
//! [`Transition`] that [`EventProjector::apply`] commits only once every step
//! has succeeded. A rejected event therefore leaves no trace besides its log
//! record and diagnostic.

use std::collections::BTreeMap;

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;

use super::events::{is_zero_address, Cursor, Event, EventKind};
use super::pool::derive_unit_prices;
use super::position::{
    funding_refunds, lp_share_price, order_fill, record_acquisition, record_disposal,
    record_transfer_in, token_cost, trade_price, Disposal, Fill,
};
use super::state::{
    membership_key, position_key, GlobalStats, Pool, PoolMembership, Position, ProjectionState,
    TokenId, TransactionRecord, Transition, TxType,
};
use super::volume::{TradeSide, VolumeLedger};
use crate::collaborators::Lookups;
use crate::config::ProjectorConfig;
use crate::errors::{ProjectionError, ProjectionResult};
use crate::logging::{self, v_num, v_str, Domain};
use crate::math::Decimal;

/// Side observations made while reducing. They never block an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    /// Pool wired to another conditional-tokens contract; the event is ignored.
    ForeignConditionalTokens { address: String },
    DefaultCollateralDecimals { collateral: String, decimals: u32 },
    /// More was disposed of, or transferred away, than the ledger holds.
    DisposalClamped {
        user: String,
        token: String,
        requested: BigUint,
        applied: BigUint,
    },
    CursorRegressed { previous: Cursor, current: Cursor },
}

/// Result of reducing one event. `transition` is `None` for ignored events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    pub transition: Option<Transition>,
    pub notes: Vec<Note>,
}

/// Pure reducer function
pub fn reduce(
    state: &ProjectionState,
    event: &Event,
    cfg: &ProjectorConfig,
    lookups: Lookups<'_>,
) -> ProjectionResult<Staged> {
    let mut stage = Stage::new(state, event, cfg);

    if let Some(previous) = state.cursor {
        let current = event.cursor();
        if current < previous {
            stage.notes.push(Note::CursorRegressed { previous, current });
        }
    }

    match &event.kind {
        EventKind::PoolCreated {
            creator,
            conditional_tokens,
            collateral_token,
            fee,
            conditions,
            outcome_slot_count,
        } => stage.pool_created(
            lookups,
            creator,
            conditional_tokens,
            collateral_token,
            fee,
            conditions,
            *outcome_slot_count,
        ),
        EventKind::Buy {
            buyer,
            outcome_index,
            investment_amount,
            fee_amount,
            outcome_tokens_bought,
        } => stage.buy(
            buyer,
            *outcome_index,
            investment_amount,
            fee_amount,
            outcome_tokens_bought,
        ),
        EventKind::Sell {
            seller,
            outcome_index,
            return_amount,
            fee_amount,
            outcome_tokens_sold,
        } => stage.sell(seller, *outcome_index, return_amount, fee_amount, outcome_tokens_sold),
        EventKind::AddLiquidity {
            funder,
            amounts_added,
            shares_minted,
        } => stage.add_liquidity(funder, amounts_added, shares_minted),
        EventKind::RemoveLiquidity {
            funder,
            amounts_removed,
            collateral_removed_from_fee_pool,
            shares_burnt,
        } => stage.remove_liquidity(
            funder,
            amounts_removed,
            collateral_removed_from_fee_pool,
            shares_burnt,
        ),
        EventKind::ShareTransfer { from, to, value } => stage.share_transfer(from, to, value),
        EventKind::OrderFilled {
            maker,
            taker,
            maker_asset_id,
            taker_asset_id,
            maker_amount_filled,
            taker_amount_filled,
            ..
        } => stage.order_filled(order_fill(
            maker,
            taker,
            maker_asset_id,
            taker_asset_id,
            maker_amount_filled,
            taker_amount_filled,
        )),
    }
}

/// Copy-on-write view of the entities one event touches.
struct Stage<'s> {
    state: &'s ProjectionState,
    event: &'s Event,
    cfg: &'s ProjectorConfig,
    positions: BTreeMap<String, Position>,
    memberships: BTreeMap<String, PoolMembership>,
    notes: Vec<Note>,
}

impl<'s> Stage<'s> {
    fn new(state: &'s ProjectionState, event: &'s Event, cfg: &'s ProjectorConfig) -> Self {
        Self {
            state,
            event,
            cfg,
            positions: BTreeMap::new(),
            memberships: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    fn pool(&self) -> ProjectionResult<Pool> {
        self.state
            .pools
            .get(&self.event.pool)
            .cloned()
            .ok_or_else(|| ProjectionError::missing("pool", self.event.pool.clone()))
    }

    /// Staged position for `(user, token)`, seeded from state or empty.
    fn position(&mut self, user: &str, token: TokenId) -> &mut Position {
        let state = self.state;
        self.positions
            .entry(position_key(user, &token))
            .or_insert_with(|| {
                state
                    .position(user, &token)
                    .cloned()
                    .unwrap_or_else(|| Position::new(user, token))
            })
    }

    fn membership(&mut self, pool: &str, holder: &str) -> &mut PoolMembership {
        let state = self.state;
        self.memberships
            .entry(membership_key(pool, holder))
            .or_insert_with(|| {
                state
                    .membership(pool, holder)
                    .cloned()
                    .unwrap_or_else(|| PoolMembership::new(pool, holder))
            })
    }

    /// Amount held, as staged so far.
    fn held(&self, user: &str, token: &TokenId) -> BigUint {
        self.positions
            .get(&position_key(user, token))
            .or_else(|| self.state.position(user, token))
            .map(|p| p.amount.clone())
            .unwrap_or_default()
    }

    fn acquire(&mut self, user: &str, token: TokenId, price: &BigUint, quantity: &BigUint) {
        record_acquisition(self.position(user, token), price, quantity);
    }

    fn dispose(
        &mut self,
        user: &str,
        token: TokenId,
        price: &BigUint,
        quantity: &BigUint,
    ) -> ProjectionResult<()> {
        let label = token.to_string();
        let strict = self.cfg.strict_positions;
        let outcome = record_disposal(self.position(user, token), price, quantity, strict)?;
        if let Disposal::Clamped { requested, applied } = outcome {
            self.notes.push(Note::DisposalClamped {
                user: user.to_string(),
                token: label,
                requested,
                applied,
            });
        }
        Ok(())
    }

    /// Carry `quantity` from one holder to another at the sender's cost
    /// basis, realizing nothing. Only what the sender holds moves.
    fn move_position(&mut self, from: &str, to: &str, token: TokenId, quantity: &BigUint) {
        let moved = quantity.min(&self.held(from, &token)).clone();
        if &moved < quantity {
            self.notes.push(Note::DisposalClamped {
                user: from.to_string(),
                token: token.to_string(),
                requested: quantity.clone(),
                applied: moved.clone(),
            });
        }
        if moved.is_zero() {
            return;
        }
        let sender = self.position(from, token.clone());
        sender.amount -= &moved;
        let basis = sender.avg_price.clone();
        record_transfer_in(self.position(to, token), &basis, &moved);
    }

    fn record(
        &self,
        tx_type: TxType,
        actor: &str,
        trade_amount: &BigUint,
        fee_amount: &BigUint,
        outcome_index: Option<usize>,
        outcome_token_amount: &BigUint,
    ) -> TransactionRecord {
        TransactionRecord {
            id: self.event.id(),
            tx_type,
            timestamp: self.event.timestamp,
            market: self.event.pool.clone(),
            actor: actor.to_string(),
            trade_amount: trade_amount.clone(),
            fee_amount: fee_amount.clone(),
            outcome_index,
            outcome_token_amount: outcome_token_amount.clone(),
        }
    }

    fn finish(
        self,
        pool: Option<Pool>,
        transaction: Option<TransactionRecord>,
        global: Option<GlobalStats>,
    ) -> Staged {
        let mut t = Transition::new(self.event.id(), self.event.cursor());
        t.pool = pool;
        t.positions = self.positions.into_values().collect();
        t.memberships = self.memberships.into_values().collect();
        t.transaction = transaction;
        t.global = global;
        Staged {
            transition: Some(t),
            notes: self.notes,
        }
    }

    fn ignore(self) -> Staged {
        Staged {
            transition: None,
            notes: self.notes,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn pool_created(
        mut self,
        lookups: Lookups<'_>,
        creator: &str,
        conditional_tokens: &str,
        collateral_token: &str,
        fee: &BigUint,
        conditions: &[String],
        outcome_slot_count: usize,
    ) -> ProjectionResult<Staged> {
        if let Some(expected) = &self.cfg.conditional_tokens {
            if !expected.eq_ignore_ascii_case(conditional_tokens) {
                self.notes.push(Note::ForeignConditionalTokens {
                    address: conditional_tokens.to_string(),
                });
                return Ok(self.ignore());
            }
        }
        if self.state.pools.contains_key(&self.event.pool) {
            return Err(ProjectionError::InvalidTrade(format!(
                "pool {} already exists",
                self.event.pool
            )));
        }
        if outcome_slot_count == 0 {
            return Err(ProjectionError::InvalidTrade("pool has no outcome slots".into()));
        }
        let condition = conditions
            .first()
            .ok_or_else(|| ProjectionError::InvalidTrade("pool has no conditions".into()))?;
        if let Some(unknown) = conditions.iter().find(|c| !lookups.positions.knows_condition(c)) {
            return Err(ProjectionError::missing("condition", unknown.clone()));
        }

        let position_ids = (0..outcome_slot_count)
            .map(|i| {
                lookups
                    .positions
                    .position_id(condition, i)
                    .ok_or_else(|| ProjectionError::missing("position id", format!("{condition}#{i}")))
            })
            .collect::<ProjectionResult<Vec<_>>>()?;

        let decimals = match lookups.collateral.decimals(collateral_token) {
            Some(d) => d,
            None => {
                let decimals = self.cfg.default_collateral_decimals;
                self.notes.push(Note::DefaultCollateralDecimals {
                    collateral: collateral_token.to_string(),
                    decimals,
                });
                decimals
            }
        };

        let zero = BigUint::zero();
        let pool = Pool {
            id: self.event.pool.clone(),
            creator: creator.to_string(),
            creation_timestamp: self.event.timestamp,
            creation_tx_hash: self.event.tx_hash.clone(),
            conditional_tokens: conditional_tokens.to_string(),
            collateral_token: collateral_token.to_string(),
            fee: fee.clone(),
            conditions: conditions.to_vec(),
            position_ids,
            collateral_decimals: decimals,
            collateral_scale: BigUint::from(10u32).pow(decimals),
            reserves: vec![zero.clone(); outcome_slot_count],
            prices: vec![Decimal::new(BigInt::zero(), self.cfg.price_decimals); outcome_slot_count],
            liquidity_parameter: zero.clone(),
            scaled_liquidity_parameter: Decimal::from_scaled_int(&zero, decimals),
            total_supply: zero,
            ledger: VolumeLedger::new(self.event.timestamp),
        };
        Ok(self.finish(Some(pool), None, None))
    }

    fn buy(
        mut self,
        buyer: &str,
        outcome_index: usize,
        investment: &BigUint,
        fee: &BigUint,
        tokens_bought: &BigUint,
    ) -> ProjectionResult<Staged> {
        let cfg = self.cfg;
        let mut pool = self.pool()?;
        let update = pool.apply_buy(outcome_index, investment, fee, tokens_bought, &cfg.curve_params())?;
        let token = outcome_token(&pool, outcome_index)?;

        pool.apply_curve(update);
        let decimals = pool.collateral_decimals;
        pool.ledger
            .record_trade(TradeSide::Buy, investment, fee, self.event.timestamp, decimals);

        let price = trade_price(investment, tokens_bought, &cfg.collateral_unit);
        self.acquire(buyer, token, &price, tokens_bought);

        let mut global = self.state.global.clone();
        global.trades += 1;
        global.buys += 1;
        global.collateral_volume += investment;
        global.fee_volume += fee;

        let tx = self.record(TxType::Buy, buyer, investment, fee, Some(outcome_index), tokens_bought);
        Ok(self.finish(Some(pool), Some(tx), Some(global)))
    }

    fn sell(
        mut self,
        seller: &str,
        outcome_index: usize,
        return_amount: &BigUint,
        fee: &BigUint,
        tokens_sold: &BigUint,
    ) -> ProjectionResult<Staged> {
        let cfg = self.cfg;
        let mut pool = self.pool()?;
        let update = pool.apply_sell(outcome_index, return_amount, fee, tokens_sold, &cfg.curve_params())?;
        let token = outcome_token(&pool, outcome_index)?;

        let price = trade_price(return_amount, tokens_sold, &cfg.collateral_unit);
        self.dispose(seller, token, &price, tokens_sold)?;

        pool.apply_curve(update);
        let decimals = pool.collateral_decimals;
        pool.ledger
            .record_trade(TradeSide::Sell, return_amount, fee, self.event.timestamp, decimals);

        let mut global = self.state.global.clone();
        global.trades += 1;
        global.sells += 1;
        global.collateral_volume += return_amount;
        global.fee_volume += fee;

        let tx = self.record(TxType::Sell, seller, return_amount, fee, Some(outcome_index), tokens_sold);
        Ok(self.finish(Some(pool), Some(tx), Some(global)))
    }

    fn add_liquidity(
        mut self,
        funder: &str,
        amounts_added: &[BigUint],
        shares_minted: &BigUint,
    ) -> ProjectionResult<Staged> {
        let cfg = self.cfg;
        let unit = &cfg.collateral_unit;
        let mut pool = self.pool()?;
        let update = pool.apply_add_liquidity(amounts_added, shares_minted, &cfg.curve_params())?;

        // Unbalanced funding sends the shortfall back to the funder as outcome tokens.
        let (spend, refunds) = funding_refunds(amounts_added);
        let prices = derive_unit_prices(amounts_added, unit);
        let mut tokens_cost = BigUint::zero();
        for (i, refund) in refunds {
            let token = outcome_token(&pool, i)?;
            tokens_cost += token_cost(&refund, &prices[i], unit);
            self.acquire(funder, token, &prices[i], &refund);
        }
        if !shares_minted.is_zero() {
            let price = lp_share_price(&spend, &tokens_cost, shares_minted, unit);
            self.acquire(funder, TokenId::PoolShare(pool.id.clone()), &price, shares_minted);
        }

        pool.apply_curve(update);
        pool.ledger.record_liquidity_add();

        let mut global = self.state.global.clone();
        global.liquidity_adds += 1;

        let tx = self.record(
            TxType::AddLiquidity,
            funder,
            &spend,
            &BigUint::zero(),
            None,
            shares_minted,
        );
        Ok(self.finish(Some(pool), Some(tx), Some(global)))
    }

    fn remove_liquidity(
        mut self,
        funder: &str,
        amounts_removed: &[BigUint],
        collateral_removed: &BigUint,
        shares_burnt: &BigUint,
    ) -> ProjectionResult<Staged> {
        let cfg = self.cfg;
        let unit = &cfg.collateral_unit;
        let mut pool = self.pool()?;
        // Withdrawn tokens are valued at the curve as it stood before the burn.
        let prices = derive_unit_prices(&pool.reserves, unit);
        let update = pool.apply_remove_liquidity(amounts_removed, shares_burnt, &cfg.curve_params())?;

        let mut tokens_cost = BigUint::zero();
        for (i, (amount, price)) in amounts_removed.iter().zip(&prices).enumerate() {
            let token = outcome_token(&pool, i)?;
            tokens_cost += token_cost(amount, price, unit);
            self.acquire(funder, token, price, amount);
        }
        let share_price = lp_share_price(collateral_removed, &tokens_cost, shares_burnt, unit);
        self.dispose(funder, TokenId::PoolShare(pool.id.clone()), &share_price, shares_burnt)?;

        pool.apply_curve(update);
        pool.ledger.record_liquidity_remove();

        let mut global = self.state.global.clone();
        global.liquidity_removes += 1;

        let tx = self.record(
            TxType::RemoveLiquidity,
            funder,
            collateral_removed,
            &BigUint::zero(),
            None,
            shares_burnt,
        );
        Ok(self.finish(Some(pool), Some(tx), Some(global)))
    }

    fn share_transfer(mut self, from: &str, to: &str, value: &BigUint) -> ProjectionResult<Staged> {
        let pool = self.pool()?.id;
        let mint = is_zero_address(from);
        let burn = is_zero_address(to);
        let signed = BigInt::from(value.clone());
        if !mint {
            self.membership(&pool, from).amount -= &signed;
        }
        if !burn {
            self.membership(&pool, to).amount += &signed;
        }
        // Mints and burns are booked by the liquidity events themselves.
        if !mint && !burn && from != to {
            self.move_position(from, to, TokenId::PoolShare(pool), value);
        }
        Ok(self.finish(None, None, None))
    }

    /// Exchange fill: the order's account buys or sells outcome tokens at
    /// `quote * UNIT / base`. Pools are not involved.
    fn order_filled(mut self, fill: Fill) -> ProjectionResult<Staged> {
        let price = trade_price(&fill.quote_amount, &fill.base_amount, &self.cfg.collateral_unit);
        let token = TokenId::Outcome(fill.position_id);
        match fill.side {
            TradeSide::Buy => self.acquire(&fill.account, token, &price, &fill.base_amount),
            TradeSide::Sell => self.dispose(&fill.account, token, &price, &fill.base_amount)?,
        }
        Ok(self.finish(None, None, None))
    }
}

fn outcome_token(pool: &Pool, outcome_index: usize) -> ProjectionResult<TokenId> {
    pool.position_ids
        .get(outcome_index)
        .cloned()
        .map(TokenId::Outcome)
        .ok_or_else(|| ProjectionError::missing("position id", format!("{}#{outcome_index}", pool.id)))
}

// =============================================================================
// Projector
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub applied: u64,
    pub ignored: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// A rejected event, kept for operator inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub event_id: String,
    pub kind: &'static str,
    pub pool: String,
    pub error: ProjectionError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied(Transition),
    Ignored,
    /// Recoverable rejection; processing continues.
    Skipped(ProjectionError),
    /// Invariant broken for this event; processing continues, state untouched.
    Failed(ProjectionError),
}

/// Result of processing an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducerOutput {
    pub outcome: Outcome,
    pub seq: u64,
}

/// Single writer over a [`ProjectionState`]: reduce, log, commit.
pub struct EventProjector<'a> {
    state: ProjectionState,
    cfg: ProjectorConfig,
    lookups: Lookups<'a>,
    stats: ProjectionStats,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> EventProjector<'a> {
    pub fn new(cfg: ProjectorConfig, lookups: Lookups<'a>) -> Self {
        Self::with_state(ProjectionState::new(), cfg, lookups)
    }

    /// Resume from a previously persisted state.
    pub fn with_state(state: ProjectionState, cfg: ProjectorConfig, lookups: Lookups<'a>) -> Self {
        Self {
            state,
            cfg,
            lookups,
            stats: ProjectionStats::default(),
            diagnostics: Vec::new(),
        }
    }

    pub fn state(&self) -> &ProjectionState {
        &self.state
    }

    pub fn stats(&self) -> ProjectionStats {
        self.stats
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn apply(&mut self, event: &Event) -> ReducerOutput {
        let event_id = event.id();
        let kind = event.kind.name();

        let outcome = match reduce(&self.state, event, &self.cfg, self.lookups) {
            Ok(staged) => {
                for note in &staged.notes {
                    log_note(&event_id, &event.pool, note);
                }
                match staged.transition {
                    Some(t) => {
                        self.state.commit(&t);
                        self.stats.applied += 1;
                        log_transition(&event_id, kind, event, &t, self.state.seq);
                        Outcome::Applied(t)
                    }
                    None => {
                        self.stats.ignored += 1;
                        Outcome::Ignored
                    }
                }
            }
            Err(error) => {
                let reason = error.to_string();
                let outcome = if error.is_recoverable() {
                    self.stats.skipped += 1;
                    logging::log_event_skipped(&event_id, kind, &event.pool, error.kind(), &reason);
                    Outcome::Skipped(error.clone())
                } else {
                    self.stats.failed += 1;
                    logging::log_event_failed(&event_id, kind, &event.pool, error.kind(), &reason);
                    Outcome::Failed(error.clone())
                };
                self.diagnostics.push(Diagnostic {
                    event_id,
                    kind,
                    pool: event.pool.clone(),
                    error,
                });
                outcome
            }
        };

        ReducerOutput {
            outcome,
            seq: self.state.seq,
        }
    }
}

fn log_transition(event_id: &str, kind: &str, event: &Event, t: &Transition, seq: u64) {
    logging::log_event_applied(event_id, kind, &event.pool, seq);
    if let Some(pool) = &t.pool {
        if matches!(event.kind, EventKind::PoolCreated { .. }) {
            logging::log_pool_created(
                &pool.id,
                pool.outcome_count(),
                &pool.collateral_token,
                pool.collateral_decimals,
            );
        } else {
            let reserves: Vec<String> = pool.reserves.iter().map(|r| r.to_string()).collect();
            logging::log_pool_state(
                &pool.id,
                &reserves,
                &pool.liquidity_parameter.to_string(),
                &pool.total_supply.to_string(),
            );
            logging::log_volume_update(
                &pool.id,
                pool.ledger.trades_quantity,
                &pool.ledger.collateral_volume.to_string(),
                &pool.ledger.fee_volume.to_string(),
            );
        }
    }
    for p in &t.positions {
        logging::log_position_update(
            &p.user,
            &p.token.to_string(),
            &p.amount.to_string(),
            &p.avg_price.to_string(),
            &p.realized_pnl.to_string(),
        );
    }
}

fn log_note(event_id: &str, pool: &str, note: &Note) {
    match note {
        Note::ForeignConditionalTokens { address } => {
            logging::log_event_ignored(event_id, pool, &format!("foreign conditional tokens {address}"));
        }
        Note::DefaultCollateralDecimals { collateral, decimals } => logging::log_warning(
            Domain::Pool,
            "collateral_decimals_defaulted",
            &[
                ("event_id", v_str(event_id)),
                ("pool", v_str(pool)),
                ("collateral", v_str(collateral)),
                ("decimals", v_num(u64::from(*decimals))),
            ],
        ),
        Note::DisposalClamped { user, token, requested, applied } => logging::log_warning(
            Domain::Position,
            "disposal_clamped",
            &[
                ("event_id", v_str(event_id)),
                ("user", v_str(user)),
                ("token", v_str(token)),
                ("requested", v_str(&requested.to_string())),
                ("applied", v_str(&applied.to_string())),
            ],
        ),
        Note::CursorRegressed { previous, current } => logging::log_warning(
            Domain::Projector,
            "cursor_regressed",
            &[
                ("event_id", v_str(event_id)),
                ("pool", v_str(pool)),
                ("previous", v_str(&format!("{}:{}", previous.block_number, previous.log_index))),
                ("current", v_str(&format!("{}:{}", current.block_number, current.log_index))),
            ],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{PositionIdTable, StaticCollateralRegistry};

    const POOL: &str = "0xpool";
    const DAY: u64 = 86_400;

    fn u(v: u64) -> BigUint {
        BigUint::from(v)
    }

    fn fixtures() -> (StaticCollateralRegistry, PositionIdTable) {
        let mut reg = StaticCollateralRegistry::new();
        reg.insert("0xusdc", 6);
        let mut ids = PositionIdTable::new();
        ids.insert("0xcond", vec![u(1000), u(1001)]);
        (reg, ids)
    }

    fn ev(log_index: u64, kind: EventKind) -> Event {
        Event {
            pool: POOL.into(),
            block_number: 1,
            timestamp: DAY * 10 + log_index,
            tx_hash: format!("0x{log_index:02}"),
            log_index,
            kind,
        }
    }

    fn created(collateral: &str) -> EventKind {
        EventKind::PoolCreated {
            creator: "0xcreator".into(),
            conditional_tokens: "0xctf".into(),
            collateral_token: collateral.into(),
            fee: u(0),
            conditions: vec!["0xcond".into()],
            outcome_slot_count: 2,
        }
    }

    fn add(amounts: &[u64], shares: u64) -> EventKind {
        EventKind::AddLiquidity {
            funder: "0xlp".into(),
            amounts_added: amounts.iter().map(|a| u(*a)).collect(),
            shares_minted: u(shares),
        }
    }

    fn buy(outcome: usize, investment: u64, fee: u64, tokens: u64) -> EventKind {
        EventKind::Buy {
            buyer: "0xtrader".into(),
            outcome_index: outcome,
            investment_amount: u(investment),
            fee_amount: u(fee),
            outcome_tokens_bought: u(tokens),
        }
    }

    fn sell(outcome: usize, ret: u64, fee: u64, tokens: u64) -> EventKind {
        EventKind::Sell {
            seller: "0xtrader".into(),
            outcome_index: outcome,
            return_amount: u(ret),
            fee_amount: u(fee),
            outcome_tokens_sold: u(tokens),
        }
    }

    fn outcome(i: u64) -> TokenId {
        TokenId::Outcome(u(1000 + i))
    }

    fn run(projector: &mut EventProjector<'_>, kinds: Vec<EventKind>) {
        for (i, kind) in kinds.into_iter().enumerate() {
            let out = projector.apply(&ev(i as u64, kind));
            assert!(matches!(out.outcome, Outcome::Applied(_)), "event {i}: {:?}", out.outcome);
        }
    }

    #[test]
    fn test_pool_created() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut p, vec![created("0xusdc")]);

        let pool = &p.state().pools[POOL];
        assert_eq!(pool.reserves, vec![u(0), u(0)]);
        assert_eq!(pool.position_ids, vec![u(1000), u(1001)]);
        assert_eq!(pool.collateral_decimals, 6);
        assert_eq!(pool.collateral_scale, u(1_000_000));
        assert_eq!(pool.ledger.last_active_day, 10);
        assert!(pool.prices.iter().all(|p| p.is_zero()));
        assert_eq!(p.state().seq, 1);
    }

    #[test]
    fn test_duplicate_pool_is_skipped() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut p, vec![created("0xusdc")]);
        let out = p.apply(&ev(1, created("0xusdc")));
        assert!(matches!(out.outcome, Outcome::Skipped(ProjectionError::InvalidTrade(_))));
        assert_eq!(p.stats().skipped, 1);
    }

    #[test]
    fn test_unknown_condition_is_missing_entity() {
        let (reg, _) = fixtures();
        let ids = PositionIdTable::new();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let out = p.apply(&ev(0, created("0xusdc")));
        assert!(matches!(
            out.outcome,
            Outcome::Skipped(ProjectionError::MissingEntity { kind: "condition", .. })
        ));
        assert!(p.state().pools.is_empty());
        assert_eq!(p.diagnostics().len(), 1);
    }

    #[test]
    fn test_every_condition_must_be_known() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let kind = EventKind::PoolCreated {
            creator: "0xcreator".into(),
            conditional_tokens: "0xctf".into(),
            collateral_token: "0xusdc".into(),
            fee: u(0),
            conditions: vec!["0xcond".into(), "0xother".into()],
            outcome_slot_count: 2,
        };
        let out = p.apply(&ev(0, kind));
        let Outcome::Skipped(ProjectionError::MissingEntity { kind, key }) = out.outcome else {
            panic!("unexpected {:?}", out.outcome);
        };
        assert_eq!(kind, "condition");
        assert_eq!(key, "0xother");
        assert!(p.state().pools.is_empty());
    }

    #[test]
    fn test_short_position_id_list_is_missing_entity() {
        let (reg, mut ids) = fixtures();
        ids.insert("0xcond", vec![u(1000)]);
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let out = p.apply(&ev(0, created("0xusdc")));
        assert!(matches!(
            out.outcome,
            Outcome::Skipped(ProjectionError::MissingEntity { kind: "position id", .. })
        ));
    }

    #[test]
    fn test_unknown_collateral_defaults_decimals() {
        let (reg, ids) = fixtures();
        let state = ProjectionState::new();
        let cfg = ProjectorConfig::default();
        let staged = reduce(
            &state,
            &ev(0, created("0xdai")),
            &cfg,
            Lookups { collateral: &reg, positions: &ids },
        )
        .unwrap();
        let pool = staged.transition.unwrap().pool.unwrap();
        assert_eq!(pool.collateral_decimals, 18);
        assert_eq!(
            staged.notes,
            vec![Note::DefaultCollateralDecimals { collateral: "0xdai".into(), decimals: 18 }]
        );
    }

    #[test]
    fn test_foreign_conditional_tokens_ignored() {
        let (reg, ids) = fixtures();
        let cfg = ProjectorConfig {
            conditional_tokens: Some("0xCTF-OTHER".into()),
            ..Default::default()
        };
        let mut p = EventProjector::new(cfg, Lookups { collateral: &reg, positions: &ids });
        let out = p.apply(&ev(0, created("0xusdc")));
        assert_eq!(out.outcome, Outcome::Ignored);
        assert_eq!(p.state().seq, 0);
        assert_eq!(p.stats().ignored, 1);
    }

    #[test]
    fn test_matching_conditional_tokens_is_case_insensitive() {
        let (reg, ids) = fixtures();
        let cfg = ProjectorConfig {
            conditional_tokens: Some("0xCTF".into()),
            ..Default::default()
        };
        let mut p = EventProjector::new(cfg, Lookups { collateral: &reg, positions: &ids });
        run(&mut p, vec![created("0xusdc")]);
    }

    #[test]
    fn test_funding_then_buy_scenario() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut p, vec![created("0xusdc"), add(&[100, 100], 100), buy(0, 50, 0, 30)]);

        let st = p.state();
        let pool = &st.pools[POOL];
        assert_eq!(pool.reserves, vec![u(120), u(150)]);
        assert_eq!(pool.liquidity_parameter, u(134));
        assert_eq!(pool.total_supply, u(100));
        let expected = Decimal::from_ratio(&BigInt::from(5), &BigInt::from(9), 18).unwrap();
        assert_eq!(pool.prices[0], expected);
        assert_eq!(pool.ledger.trades_quantity, 1);
        assert_eq!(pool.ledger.buys_quantity, 1);
        assert_eq!(pool.ledger.liquidity_add_quantity, 1);
        assert_eq!(pool.ledger.collateral_buy_volume, u(50));

        let lp = st.position("0xlp", &TokenId::PoolShare(POOL.into())).unwrap();
        assert_eq!(lp.amount, u(100));
        assert_eq!(lp.avg_price, u(1_000_000));

        let trader = st.position("0xtrader", &outcome(0)).unwrap();
        assert_eq!(trader.amount, u(30));
        assert_eq!(trader.avg_price, u(1_666_666));

        assert_eq!(st.global.trades, 1);
        assert_eq!(st.global.buys, 1);
        assert_eq!(st.global.liquidity_adds, 1);
        assert_eq!(st.global.collateral_volume, u(50));
    }

    #[test]
    fn test_buy_emits_transaction_record() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut p, vec![created("0xusdc"), add(&[100, 100], 100)]);
        let out = p.apply(&ev(2, buy(1, 50, 2, 40)));
        let Outcome::Applied(t) = out.outcome else {
            panic!("buy not applied");
        };
        let tx = t.transaction.unwrap();
        assert_eq!(tx.id, "0x02_2");
        assert_eq!(tx.tx_type, TxType::Buy);
        assert_eq!(tx.market, POOL);
        assert_eq!(tx.actor, "0xtrader");
        assert_eq!(tx.trade_amount, u(50));
        assert_eq!(tx.fee_amount, u(2));
        assert_eq!(tx.outcome_index, Some(1));
        assert_eq!(tx.outcome_token_amount, u(40));
        assert_eq!(p.state().pools[POOL].ledger.fee_volume, u(2));
    }

    #[test]
    fn test_sell_books_realized_pnl() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(
            &mut p,
            vec![created("0xusdc"), add(&[100, 100], 100), buy(0, 50, 0, 30), sell(0, 45, 5, 30)],
        );

        let st = p.state();
        assert_eq!(st.pools[POOL].reserves, vec![u(100), u(100)]);
        let trader = st.position("0xtrader", &outcome(0)).unwrap();
        assert_eq!(trader.amount, u(0));
        assert_eq!(trader.avg_price, u(1_666_666));
        // 30 * (1_500_000 - 1_666_666)
        assert_eq!(trader.realized_pnl, BigInt::from(-4_999_980));
        assert_eq!(st.global.sells, 1);
        assert_eq!(st.global.collateral_volume, u(95));
        assert_eq!(st.global.fee_volume, u(5));
    }

    #[test]
    fn test_strict_oversell_skips_whole_event() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut p, vec![created("0xusdc"), add(&[100, 100], 100), buy(0, 50, 0, 30)]);
        let before = p.state().digest();

        let out = p.apply(&ev(3, sell(0, 10, 0, 31)));
        assert!(matches!(
            out.outcome,
            Outcome::Skipped(ProjectionError::InsufficientPosition { .. })
        ));
        assert_eq!(p.state().digest(), before);
    }

    #[test]
    fn test_lenient_oversell_clamps() {
        let (reg, ids) = fixtures();
        let cfg = ProjectorConfig { strict_positions: false, ..Default::default() };
        let mut p = EventProjector::new(cfg, Lookups { collateral: &reg, positions: &ids });
        run(
            &mut p,
            vec![created("0xusdc"), add(&[100, 100], 100), buy(0, 50, 0, 30), sell(0, 10, 0, 31)],
        );
        let trader = p.state().position("0xtrader", &outcome(0)).unwrap();
        assert_eq!(trader.amount, u(0));
    }

    #[test]
    fn test_reserve_underflow_leaves_state_untouched() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut p, vec![created("0xusdc"), add(&[10, 10], 10)]);
        let before = p.state().clone();

        let out = p.apply(&ev(2, sell(0, 50, 0, 0)));
        assert!(matches!(out.outcome, Outcome::Failed(ProjectionError::ReserveUnderflow { .. })));
        assert_eq!(p.state(), &before);
        assert_eq!(p.stats().failed, 1);
        assert_eq!(p.take_diagnostics().len(), 1);
        assert!(p.diagnostics().is_empty());
    }

    #[test]
    fn test_missing_pool_is_skipped() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let out = p.apply(&ev(0, buy(0, 50, 0, 30)));
        assert!(matches!(
            out.outcome,
            Outcome::Skipped(ProjectionError::MissingEntity { kind: "pool", .. })
        ));
        assert!(p.state().positions.is_empty());
        assert_eq!(p.state().seq, 0);
    }

    #[test]
    fn test_unbalanced_funding_refunds_tokens() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut p, vec![created("0xusdc"), add(&[100, 60], 100)]);

        let st = p.state();
        // prices from [100, 60]: [60/160, 100/160]
        let refund = st.position("0xlp", &outcome(1)).unwrap();
        assert_eq!(refund.amount, u(40));
        assert_eq!(refund.avg_price, u(625_000));
        assert!(st.position("0xlp", &outcome(0)).is_none());

        // 40 tokens at 0.625 cost 25 of the 100 spent
        let lp = st.position("0xlp", &TokenId::PoolShare(POOL.into())).unwrap();
        assert_eq!(lp.avg_price, u(750_000));
    }

    #[test]
    fn test_remove_liquidity_values_at_prior_prices() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let remove = EventKind::RemoveLiquidity {
            funder: "0xlp".into(),
            amounts_removed: vec![u(50), u(50)],
            collateral_removed_from_fee_pool: u(60),
            shares_burnt: u(50),
        };
        run(&mut p, vec![created("0xusdc"), add(&[100, 100], 100), remove]);

        let st = p.state();
        let pool = &st.pools[POOL];
        assert_eq!(pool.reserves, vec![u(50), u(50)]);
        assert_eq!(pool.total_supply, u(50));
        assert_eq!(pool.ledger.liquidity_remove_quantity, 1);

        let leg = st.position("0xlp", &outcome(0)).unwrap();
        assert_eq!(leg.amount, u(50));
        assert_eq!(leg.avg_price, u(500_000));

        // (60 - 50) * 1e6 / 50 = 200_000 against a 1_000_000 basis
        let lp = st.position("0xlp", &TokenId::PoolShare(POOL.into())).unwrap();
        assert_eq!(lp.amount, u(50));
        assert_eq!(lp.realized_pnl, BigInt::from(50) * BigInt::from(-800_000));
        assert_eq!(st.global.liquidity_removes, 1);
    }

    #[test]
    fn test_share_transfers_track_membership() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let transfer = |from: &str, to: &str, value: u64| EventKind::ShareTransfer {
            from: from.into(),
            to: to.into(),
            value: u(value),
        };
        run(
            &mut p,
            vec![
                created("0xusdc"),
                transfer(crate::engine::events::ZERO_ADDRESS, "0xa", 100),
                transfer("0xa", "0xb", 30),
                transfer("0xb", "0xb", 10),
            ],
        );
        let st = p.state();
        assert_eq!(st.membership(POOL, "0xa").unwrap().amount, BigInt::from(70));
        assert_eq!(st.membership(POOL, "0xb").unwrap().amount, BigInt::from(30));
        assert_eq!(st.memberships.len(), 2);
    }

    #[test]
    fn test_transferred_shares_can_be_withdrawn() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let zero = crate::engine::events::ZERO_ADDRESS;
        let fund = |funder: &str, amount: u64| EventKind::AddLiquidity {
            funder: funder.into(),
            amounts_added: vec![u(amount), u(amount)],
            shares_minted: u(amount),
        };
        let transfer = |from: &str, to: &str, value: u64| EventKind::ShareTransfer {
            from: from.into(),
            to: to.into(),
            value: u(value),
        };
        run(
            &mut p,
            vec![
                created("0xusdc"),
                fund("0xa", 100),
                transfer(zero, "0xa", 100),
                fund("0xb", 10),
                transfer(zero, "0xb", 10),
                transfer("0xa", "0xb", 60),
                EventKind::RemoveLiquidity {
                    funder: "0xb".into(),
                    amounts_removed: vec![u(70), u(70)],
                    collateral_removed_from_fee_pool: u(70),
                    shares_burnt: u(70),
                },
                transfer("0xb", zero, 70),
            ],
        );

        let st = p.state();
        let pool = &st.pools[POOL];
        assert_eq!(pool.reserves, vec![u(40), u(40)]);
        assert_eq!(pool.total_supply, u(40));

        let share = TokenId::PoolShare(POOL.into());
        let a = st.position("0xa", &share).unwrap();
        assert_eq!(a.amount, u(40));
        assert_eq!(a.realized_pnl, BigInt::from(0));
        let b = st.position("0xb", &share).unwrap();
        assert_eq!(b.amount, u(0));
        // received at the sender's basis; transfers are not purchases
        assert_eq!(b.avg_price, u(1_000_000));
        assert_eq!(b.total_bought, u(10));

        assert_eq!(st.membership(POOL, "0xa").unwrap().amount, BigInt::from(40));
        assert_eq!(st.membership(POOL, "0xb").unwrap().amount, BigInt::from(0));
    }

    #[test]
    fn test_transfer_beyond_tracked_shares_moves_what_is_held() {
        let (reg, ids) = fixtures();
        let state = {
            let mut p = EventProjector::new(
                ProjectorConfig::default(),
                Lookups { collateral: &reg, positions: &ids },
            );
            run(&mut p, vec![created("0xusdc"), add(&[100, 100], 100)]);
            p.state().clone()
        };
        let staged = reduce(
            &state,
            &ev(2, EventKind::ShareTransfer { from: "0xlp".into(), to: "0xc".into(), value: u(150) }),
            &ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        )
        .unwrap();
        assert_eq!(
            staged.notes,
            vec![Note::DisposalClamped {
                user: "0xlp".into(),
                token: format!("share:{POOL}"),
                requested: u(150),
                applied: u(100),
            }]
        );
        let t = staged.transition.unwrap();
        let moved: Vec<_> = t.positions.iter().map(|p| (p.user.as_str(), p.amount.clone())).collect();
        assert_eq!(moved, vec![("0xc", u(100)), ("0xlp", u(0))]);
    }

    #[test]
    fn test_order_fills_update_positions() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let fill = |maker_asset: u64, taker_asset: u64, maker_amount: u64, taker_amount: u64| {
            EventKind::OrderFilled {
                order_hash: "0xorder".into(),
                maker: "0xmaker".into(),
                taker: "0xtaker".into(),
                maker_asset_id: u(maker_asset),
                taker_asset_id: u(taker_asset),
                maker_amount_filled: u(maker_amount),
                taker_amount_filled: u(taker_amount),
                fee: u(0),
            }
        };
        // maker pays 300_000 collateral for 500_000 tokens, then the taker
        // sells 200_000 it was never seen acquiring
        let mut exchange_event = |i: u64, kind: EventKind| {
            let mut e = ev(i, kind);
            e.pool = "0xexchange".into();
            p.apply(&e)
        };
        let out = exchange_event(0, fill(0, 1000, 300_000, 500_000));
        assert!(matches!(out.outcome, Outcome::Applied(_)));
        let out = exchange_event(1, fill(1000, 0, 200_000, 160_000));
        assert!(matches!(out.outcome, Outcome::Applied(_)));

        let st = p.state();
        assert!(st.pools.is_empty());
        let maker = st.position("0xmaker", &outcome(0)).unwrap();
        assert_eq!(maker.amount, u(500_000));
        assert_eq!(maker.avg_price, u(600_000));
        let taker = st.position("0xtaker", &outcome(0)).unwrap();
        assert_eq!(taker.amount, u(0));
        assert_eq!(taker.realized_pnl, BigInt::from(0));
        assert_eq!(st.seq, 2);
        assert_eq!(st.global, GlobalStats::default());
    }

    #[test]
    fn test_order_fill_sale_books_pnl() {
        let (reg, ids) = fixtures();
        let mut state = ProjectionState::new();
        let mut held = Position::new("0xtaker", outcome(0));
        record_acquisition(&mut held, &u(600_000), &u(500_000));
        state.positions.insert(held.key(), held);

        let kind = EventKind::OrderFilled {
            order_hash: "0xorder".into(),
            maker: "0xmaker".into(),
            taker: "0xtaker".into(),
            maker_asset_id: u(1000),
            taker_asset_id: u(0),
            maker_amount_filled: u(200_000),
            taker_amount_filled: u(160_000),
            fee: u(0),
        };
        let mut p = EventProjector::with_state(
            state,
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let out = p.apply(&ev(0, kind));
        assert!(matches!(out.outcome, Outcome::Applied(_)));
        let taker = p.state().position("0xtaker", &outcome(0)).unwrap();
        assert_eq!(taker.amount, u(300_000));
        // 200_000 * (800_000 - 600_000)
        assert_eq!(taker.realized_pnl, BigInt::from(40_000_000_000u64));
    }

    #[test]
    fn test_transfer_for_unknown_pool_is_skipped() {
        let (reg, ids) = fixtures();
        let mut p = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let out = p.apply(&ev(
            0,
            EventKind::ShareTransfer { from: "0xa".into(), to: "0xb".into(), value: u(1) },
        ));
        assert!(matches!(out.outcome, Outcome::Skipped(_)));
        assert!(p.state().memberships.is_empty());
    }

    #[test]
    fn test_cursor_regression_is_noted_not_rejected() {
        let (reg, ids) = fixtures();
        let cfg = ProjectorConfig::default();
        let mut state = ProjectionState::new();
        state.cursor = Some(Cursor { block_number: 5, log_index: 0 });
        let staged = reduce(
            &state,
            &ev(0, created("0xusdc")),
            &cfg,
            Lookups { collateral: &reg, positions: &ids },
        )
        .unwrap();
        assert!(staged.transition.is_some());
        assert!(matches!(staged.notes[0], Note::CursorRegressed { .. }));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let (reg, ids) = fixtures();
        let script = || {
            vec![
                created("0xusdc"),
                add(&[300, 100], 300),
                buy(0, 50, 1, 60),
                buy(1, 20, 0, 25),
                sell(0, 10, 0, 15),
            ]
        };
        let mut a = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        let mut b = EventProjector::new(
            ProjectorConfig::default(),
            Lookups { collateral: &reg, positions: &ids },
        );
        run(&mut a, script());
        run(&mut b, script());
        assert_eq!(a.state().digest(), b.state().digest());
        assert_eq!(
            serde_json::to_string(a.state()).unwrap(),
            serde_json::to_string(b.state()).unwrap()
        );
    }
}
