//! One account's guardian: ledger, compliance, transitions, sizing.
//!
//! A `Guardian` is owned by exactly one task and mutated only through
//! [`Guardian::handle`]. Readers follow the published [`AccountStatus`]
//! through a `watch` channel and never touch the guardian itself.
//!
//! Every event runs the same pipeline:
//!
//! 1. roll the trading day if the event's instant belongs to a later one
//! 2. apply the event to the ledger / feed clock
//! 3. re-evaluate compliance
//! 4. [`transition`] and carry out its effects (stop, persist, alert)
//! 5. for signals, size against the post-transition state

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use pfg_config::{
    AccountConfig, EmergencyStopPolicy, GuardianConfig, PhaseRules, RuleLimits, TradingCalendar,
};
use pfg_ledger::{AccountLedger, DayClose, Fill, Instrument, LedgerError, Micros, SnapshotMeta};
use pfg_risk::{evaluate_with_freshness, ComplianceOutcome, FeedClock};
use pfg_schemas::{
    AccountId, AccountSnapshot, AccountStatus, FillEvent, GuardianState, LockCause, Phase, Signal,
    TickEvent,
};
use pfg_sizing::{PositionSizing, SizerRegistry, SizingDecision, SizingInput, SizingProfile, SizingReason};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::audit::{TransitionAudit, TransitionRecord};
use crate::emergency::run_emergency_stop;
use crate::ports::{AlertSink, ExecutionBridge, FatalAlert, FlattenLeg, OrderRequest};
use crate::reload::check_snapshot;
use crate::state::{escalate_fatal, transition, Effect, EventKind, Machine, Transition};
use crate::store::SnapshotStore;
use crate::GuardianError;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum GuardianEvent {
    Tick(TickEvent),
    Fill(FillEvent),
    Signal(Signal),
    ManualStop,
    /// Re-check restored state against the broker after boot.
    Reload,
    DayRollover,
    /// Clear an operator-resettable lock, or start a new period after
    /// VIOLATED/PASSED (optionally in another phase).
    OperatorReset { next_phase: Option<Phase> },
    AcknowledgeFatal,
}

impl GuardianEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GuardianEvent::Tick(_) => EventKind::Tick,
            GuardianEvent::Fill(_) => EventKind::Fill,
            GuardianEvent::Signal(_) => EventKind::Signal,
            GuardianEvent::ManualStop => EventKind::ManualStop,
            GuardianEvent::Reload => EventKind::Reload,
            GuardianEvent::DayRollover => EventKind::DayRollover,
            GuardianEvent::OperatorReset { .. } => EventKind::OperatorReset,
            GuardianEvent::AcknowledgeFatal => EventKind::AcknowledgeFatal,
        }
    }
}

/// Static per-account inputs.
pub struct GuardianSetup {
    pub account: AccountConfig,
    pub phase_rules: PhaseRules,
    pub instruments: Vec<Instrument>,
    pub emergency_stop: EmergencyStopPolicy,
    pub sizer: Box<dyn PositionSizing>,
}

impl GuardianSetup {
    pub fn from_config(
        cfg: &GuardianConfig,
        account: &AccountConfig,
        sizers: &SizerRegistry,
    ) -> Result<Self, GuardianError> {
        let sizer = sizers
            .instantiate(&account.sizer)
            .map_err(|_| GuardianError::UnknownSizer {
                name: account.sizer.clone(),
            })?;
        Ok(Self {
            account: account.clone(),
            phase_rules: cfg.phase_rules.clone(),
            instruments: cfg.instruments_for(account)?,
            emergency_stop: cfg.emergency_stop.clone(),
            sizer,
        })
    }
}

/// Outbound collaborators.
#[derive(Clone)]
pub struct GuardianDeps {
    pub bridge: Arc<dyn ExecutionBridge>,
    pub alerts: Arc<dyn AlertSink>,
    pub store: Arc<dyn SnapshotStore>,
    /// Shared by every account writing to the same log.
    pub audit: Option<Arc<Mutex<TransitionAudit>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    pub status: AccountStatus,
    pub compliance: ComplianceOutcome,
    /// Present for signal events only.
    pub sizing: Option<SizingDecision>,
    /// Present when the signal sized to at least one contract.
    pub order: Option<OrderRequest>,
    /// The event locked the account; queued signals must be dropped.
    pub discard_signals: bool,
}

// ---------------------------------------------------------------------------
// Limits per phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct PhaseLimits {
    evaluation: RuleLimits,
    performance: RuleLimits,
    live: RuleLimits,
}

impl PhaseLimits {
    fn resolve(account: &AccountConfig, rules: &PhaseRules) -> Result<Self, GuardianError> {
        Ok(Self {
            evaluation: account.rules_for(rules, Phase::Evaluation).limits()?,
            performance: account.rules_for(rules, Phase::Performance).limits()?,
            live: account.rules_for(rules, Phase::Live).limits()?,
        })
    }

    fn for_phase(&self, phase: Phase) -> &RuleLimits {
        match phase {
            Phase::Evaluation => &self.evaluation,
            Phase::Performance => &self.performance,
            Phase::Live => &self.live,
        }
    }
}

// ---------------------------------------------------------------------------
// Guardian
// ---------------------------------------------------------------------------

enum Restore {
    Fresh,
    Snapshot(AccountSnapshot),
    Unreadable(String),
}

pub struct Guardian {
    account_id: AccountId,
    config: AccountConfig,
    limits: PhaseLimits,
    calendar: TradingCalendar,
    policy: EmergencyStopPolicy,
    sizer: Box<dyn PositionSizing>,
    profile: SizingProfile,
    deps: GuardianDeps,

    ledger: AccountLedger,
    feeds: FeedClock,
    machine: Machine,
    locked_on: Option<NaiveDate>,
    fatal_message: Option<String>,
    last: ComplianceOutcome,
    updated_at: DateTime<Utc>,
    status_tx: watch::Sender<AccountStatus>,
}

impl Guardian {
    /// Build a guardian from config and an optional persisted snapshot.
    ///
    /// Fail-closed: a snapshot that fails its consistency checks boots the
    /// account LOCKED with cause Fatal and an unacknowledged alert. A
    /// restored LOCKED/VIOLATED/PASSED state is kept as-is.
    ///
    /// # Errors
    /// Only configuration errors. Corrupt state never fails the boot.
    pub fn boot(
        setup: GuardianSetup,
        deps: GuardianDeps,
        persisted: Option<AccountSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<Self, GuardianError> {
        let restore = match persisted {
            None => Restore::Fresh,
            Some(snap) => Restore::Snapshot(snap),
        };
        Self::boot_with(setup, deps, restore, now)
    }

    /// [`Guardian::boot`] with the snapshot read from `deps.store`. A
    /// snapshot file that exists but cannot be read is treated like a
    /// corrupt one.
    pub fn boot_from_store(
        setup: GuardianSetup,
        deps: GuardianDeps,
        now: DateTime<Utc>,
    ) -> Result<Self, GuardianError> {
        let restore = match deps.store.load(&setup.account.account_id()) {
            Ok(None) => Restore::Fresh,
            Ok(Some(snap)) => Restore::Snapshot(snap),
            Err(e) => Restore::Unreadable(format!("{e:#}")),
        };
        Self::boot_with(setup, deps, restore, now)
    }

    fn boot_with(
        setup: GuardianSetup,
        deps: GuardianDeps,
        restore: Restore,
        now: DateTime<Utc>,
    ) -> Result<Self, GuardianError> {
        let GuardianSetup {
            account,
            phase_rules,
            instruments,
            emergency_stop,
            sizer,
        } = setup;
        account.validate()?;
        emergency_stop.validate()?;
        let calendar = account.rollover.calendar()?;
        let limits = PhaseLimits::resolve(&account, &phase_rules)?;
        let account_id = account.account_id();
        let today = calendar.trading_day(now);

        let fresh_ledger = || {
            AccountLedger::new(
                account_id.clone(),
                account.phase,
                account.initial_balance_micros(),
                now,
                today,
                instruments.clone(),
            )
        };

        let mut boot_alert = None;
        let (ledger, machine, locked_on, fatal_message) = match restore {
            Restore::Fresh => (fresh_ledger(), Machine::active(), None, None),
            Restore::Unreadable(reason) => {
                let corruption = crate::reload::StateCorruption { reason };
                error!(account_id = %account_id, error = %corruption, "snapshot unreadable; booting locked");
                boot_alert = Some(corruption.to_string());
                (fresh_ledger(), Machine::fatal_locked(), Some(today), Some(corruption.to_string()))
            }
            Restore::Snapshot(snap) => {
                let restored = AccountLedger::restore(&snap, instruments.clone());
                let checked = restored
                    .clone()
                    .map_err(|e| crate::reload::StateCorruption {
                        reason: e.to_string(),
                    })
                    .and_then(|l| check_snapshot(&snap, &account_id, &l, today).map(|_| l));
                match checked {
                    Ok(ledger) => {
                        let state = match snap.guardian_state {
                            // Crashed mid-stop: resume as locked; Reload re-runs the stop.
                            GuardianState::Flattening => GuardianState::Locked,
                            s => s,
                        };
                        let lock = if state == GuardianState::Locked {
                            snap.lock_cause.or(Some(LockCause::RuleBreach))
                        } else {
                            snap.lock_cause
                        };
                        let machine = Machine {
                            state,
                            lock,
                            fatal: snap.fatal_unacknowledged,
                        };
                        info!(
                            account_id = %account_id,
                            state = %machine.state,
                            day_count = snap.day_count,
                            hwm_micros = snap.high_water_mark_micros,
                            "restored account snapshot"
                        );
                        let msg = snap
                            .fatal_unacknowledged
                            .then(|| "fatal alert raised before restart is unacknowledged".to_string());
                        (ledger, machine, snap.locked_on, msg)
                    }
                    Err(corruption) => {
                        error!(account_id = %account_id, error = %corruption, "snapshot rejected; booting locked");
                        let ledger = restored
                            .ok()
                            .filter(|l| l.account_id() == &account_id)
                            .unwrap_or_else(fresh_ledger);
                        boot_alert = Some(corruption.to_string());
                        (ledger, Machine::fatal_locked(), Some(today), Some(corruption.to_string()))
                    }
                }
            }
        };

        let feeds = FeedClock::new(account.stale_after_ms);
        let last = evaluate_with_freshness(
            &ledger.figures(),
            limits.for_phase(ledger.phase()),
            &feeds.check(now),
        );
        let profile = SizingProfile::from_account(&account);
        let status = initial_status(&account_id, &ledger, &machine, &last, fatal_message.as_deref(), now);
        let (status_tx, _rx) = watch::channel(status);

        let guardian = Self {
            account_id,
            config: account,
            limits,
            calendar,
            policy: emergency_stop,
            sizer,
            profile,
            deps,
            ledger,
            feeds,
            machine,
            locked_on,
            fatal_message,
            last,
            updated_at: now,
            status_tx,
        };

        if let Some(message) = boot_alert {
            guardian.raise_alert(message, now);
            guardian.persist(now);
        }
        Ok(guardian)
    }

    // -----------------------------------------------------------------------
    // Event pipeline
    // -----------------------------------------------------------------------

    /// Apply one event.
    ///
    /// # Errors
    /// [`GuardianError::Ledger`] when a tick or fill is invalid and
    /// [`GuardianError::ResetRefused`] when reset preconditions are not met.
    /// In both cases the guardian state is unchanged apart from a trading
    /// day rollover that was due anyway.
    pub async fn handle(
        &mut self,
        event: GuardianEvent,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, GuardianError> {
        let kind = event.kind();
        let mut discard = self.roll_if_needed(now).await;

        let mut signal = None;
        match event {
            GuardianEvent::Tick(t) => self.apply_tick(&t)?,
            GuardianEvent::Fill(f) => self.apply_fill(&f)?,
            GuardianEvent::Signal(s) => signal = Some(s),
            GuardianEvent::OperatorReset { next_phase } => self.prepare_reset(next_phase, now)?,
            GuardianEvent::DayRollover => {
                // The roll above did the work; nothing else to evaluate.
                self.publish(self.machine.state, now);
                return Ok(self.outcome(None, None, discard));
            }
            GuardianEvent::ManualStop | GuardianEvent::Reload | GuardianEvent::AcknowledgeFatal => {}
        }

        let outcome = self.evaluate_at(now);
        let mut t = transition(&self.machine, &outcome, kind);
        let reflatten = matches!(kind, EventKind::Reload | EventKind::Fill);
        if reflatten && t.next.is_locked_out() && !self.ledger.is_flat() && !t.has(Effect::EmergencyStop) {
            // Restored as locked with exposure still on the books, or an
            // order that was in flight when the lock landed has filled.
            t.effects.push(Effect::EmergencyStop);
        }
        if kind == EventKind::Fill && !t.has(Effect::Persist) {
            t.effects.push(Effect::Persist);
        }
        discard |= self.apply(t, outcome, kind, now).await;

        let (sizing, order) = match signal {
            Some(s) => {
                let decision = self.decide(&s, &self.last);
                let order = self.order_for(&s, &decision);
                info!(
                    account_id = %self.account_id,
                    symbol = %s.symbol,
                    contracts = decision.contracts,
                    reason = %decision.reason,
                    "signal sized"
                );
                (Some(decision), order)
            }
            None => (None, None),
        };
        Ok(self.outcome(sizing, order, discard))
    }

    /// Compliance at `now` after any due rollover. Does not transition.
    pub async fn evaluate(&mut self, now: DateTime<Utc>) -> ComplianceOutcome {
        self.roll_if_needed(now).await;
        self.evaluate_at(now)
    }

    /// Size a signal without routing it.
    pub async fn size_position(&mut self, signal: &Signal, now: DateTime<Utc>) -> SizingDecision {
        self.roll_if_needed(now).await;
        let outcome = self.evaluate_at(now);
        self.decide(signal, &outcome)
    }

    /// Pure evaluation of the current ledger at `now`.
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> ComplianceOutcome {
        evaluate_with_freshness(
            &self.ledger.figures(),
            self.limits.for_phase(self.ledger.phase()),
            &self.feeds.check(now),
        )
    }

    fn apply_tick(&mut self, tick: &TickEvent) -> Result<(), GuardianError> {
        let price = Micros::from_f64(tick.price).ok_or(LedgerError::NonFinite { field: "price" })?;
        self.ledger.mark_to_market(&tick.symbol, price)?;
        self.feeds.observe(&tick.symbol, tick.ts_utc);
        Ok(())
    }

    fn apply_fill(&mut self, ev: &FillEvent) -> Result<(), GuardianError> {
        let fill = Fill::from_event(ev)?;
        let realized = self.ledger.record_fill(&fill)?;
        info!(
            account_id = %self.account_id,
            symbol = %fill.symbol,
            qty = fill.qty_delta,
            realized_micros = realized.raw(),
            equity_micros = self.ledger.equity().raw(),
            "fill applied"
        );
        Ok(())
    }

    async fn roll_if_needed(&mut self, now: DateTime<Utc>) -> bool {
        let today = self.calendar.trading_day(now);
        match self.ledger.close_day(today) {
            DayClose::Unchanged => false,
            DayClose::Rolled {
                previous,
                counted,
                daily_start_balance,
            } => {
                info!(
                    account_id = %self.account_id,
                    %previous,
                    %today,
                    counted,
                    day_count = self.ledger.day_count(),
                    daily_start_micros = daily_start_balance.raw(),
                    "trading day rollover"
                );
                let outcome = self.evaluate_at(now);
                let t = transition(&self.machine, &outcome, EventKind::DayRollover);
                self.apply(t, outcome, EventKind::DayRollover, now).await
            }
        }
    }

    fn prepare_reset(&mut self, next_phase: Option<Phase>, now: DateTime<Utc>) -> Result<(), GuardianError> {
        let refuse = |reason: String| Err(GuardianError::ResetRefused { reason });
        if self.machine.fatal {
            return refuse("fatal alert has not been acknowledged".to_string());
        }
        if !self.machine.is_locked_out() {
            return refuse(format!("account is {}, nothing to reset", self.machine.state));
        }
        let today = self.ledger.trading_day();
        if self.machine.lock == Some(LockCause::ManualStop) && self.locked_on.map_or(false, |d| d >= today) {
            return refuse("manual stop can only be reset from the next trading session".to_string());
        }
        if !self.ledger.is_flat() {
            return refuse("positions are still open".to_string());
        }
        if self.machine.state.is_terminal() || next_phase.is_some() {
            let phase = next_phase.unwrap_or_else(|| self.ledger.phase());
            info!(
                account_id = %self.account_id,
                from_phase = %self.ledger.phase(),
                to_phase = %phase,
                "starting new evaluation period"
            );
            self.ledger.reset_period(phase, now, today);
        }
        Ok(())
    }

    /// Carry out a transition. Returns whether queued signals must be
    /// discarded.
    async fn apply(
        &mut self,
        t: Transition,
        outcome: ComplianceOutcome,
        kind: EventKind,
        now: DateTime<Utc>,
    ) -> bool {
        let discard = t.has(Effect::DiscardSignals);
        let stop = t.has(Effect::EmergencyStop);
        let persist = t.has(Effect::Persist);

        self.last = outcome;
        self.set_machine(t.next, kind, now, None);

        if stop {
            self.emergency_stop(kind, now).await;
        }
        if persist || stop {
            self.persist(now);
        }
        self.publish(self.machine.state, now);
        discard
    }

    fn set_machine(&mut self, next: Machine, kind: EventKind, now: DateTime<Utc>, note: Option<String>) {
        let before = self.machine;
        if next == before {
            return;
        }
        if next.lock.is_some() && next.lock != before.lock {
            self.locked_on = Some(self.ledger.trading_day());
        } else if next.lock.is_none() {
            self.locked_on = None;
        }
        if !next.fatal {
            self.fatal_message = None;
        }
        self.machine = next;

        let usage_ppm = self.last.usage.raw();
        if next.is_locked_out() && !before.is_locked_out() {
            warn!(
                account_id = %self.account_id,
                from = %before.state,
                to = %next.state,
                lock = ?next.lock,
                usage_ppm,
                event = kind.as_str(),
                "guardian locked out"
            );
        } else {
            info!(
                account_id = %self.account_id,
                from = %before.state,
                to = %next.state,
                lock = ?next.lock,
                usage_ppm,
                event = kind.as_str(),
                "guardian transition"
            );
        }
        self.audit(before, kind, now, note);
    }

    async fn emergency_stop(&mut self, kind: EventKind, now: DateTime<Utc>) {
        let legs: Vec<FlattenLeg> = self
            .ledger
            .open_exposures()
            .into_iter()
            .map(|e| FlattenLeg {
                symbol: e.symbol,
                qty_to_close: -e.qty_signed,
                reference_price: e.mark.to_f64(),
            })
            .collect();
        warn!(account_id = %self.account_id, legs = legs.len(), "emergency stop: cancel all + flatten");
        self.publish(GuardianState::Flattening, now);

        let result = run_emergency_stop(
            self.deps.bridge.as_ref(),
            &self.account_id,
            &legs,
            &self.policy,
        )
        .await;

        match result {
            Ok(report) => {
                for ev in &report.fills {
                    let applied = Fill::from_event(ev).and_then(|f| self.ledger.record_fill(&f));
                    if let Err(e) = applied {
                        warn!(account_id = %self.account_id, symbol = %ev.symbol, error = %e, "flatten fill not applied");
                    }
                }
                if !self.ledger.is_flat() {
                    warn!(
                        account_id = %self.account_id,
                        "broker reports flat; closing residual ledger positions at last marks"
                    );
                    self.ledger.flatten_at_marks();
                }
                // Realized flatten P&L may move a lock to VIOLATED.
                let outcome = self.evaluate_at(now);
                let t = transition(&self.machine, &outcome, EventKind::Fill);
                self.last = outcome;
                self.set_machine(t.next, EventKind::Fill, now, Some("post-flatten".to_string()));
            }
            Err(failure) => {
                error!(
                    account_id = %self.account_id,
                    attempts = failure.attempts,
                    error = %failure.last_error,
                    "emergency stop failed; escalating to fatal"
                );
                let t = escalate_fatal(&self.machine);
                self.set_machine(t.next, kind, now, Some(failure.to_string()));
                self.fatal_message = Some(failure.to_string());
                self.raise_alert(failure.to_string(), now);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sizing
    // -----------------------------------------------------------------------

    fn decide(&self, signal: &Signal, outcome: &ComplianceOutcome) -> SizingDecision {
        if self.machine.is_locked_out() || !self.machine.state.accepts_signals() {
            return SizingDecision::zero(
                SizingReason::GuardianBlocked,
                format!("guardian is {}", self.machine.state),
            );
        }
        let Some(point_value) = self.ledger.point_value(&signal.symbol) else {
            return SizingDecision::zero(
                SizingReason::InvalidSignal,
                format!("{} is not traded by {}", signal.symbol, self.account_id),
            );
        };
        self.sizer.size(&SizingInput {
            signal,
            equity: self.ledger.equity(),
            risk_state: self.machine.sizing_state(outcome.state),
            risk_budget: outcome.risk_budget_remaining,
            point_value,
            profile: &self.profile,
        })
    }

    fn order_for(&self, signal: &Signal, decision: &SizingDecision) -> Option<OrderRequest> {
        if !decision.is_tradeable() {
            return None;
        }
        Some(OrderRequest {
            account_id: self.account_id.clone(),
            symbol: signal.symbol.clone(),
            qty_signed: signal.direction.sign() * i64::from(decision.contracts),
            reference_price: signal.entry,
            stop: signal.stop,
            target: signal.target,
            strategy_tag: signal.strategy_tag.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    fn persist(&self, now: DateTime<Utc>) {
        let snap = self.snapshot(now);
        if let Err(e) = self.deps.store.save(&snap) {
            error!(account_id = %self.account_id, error = %format!("{e:#}"), "snapshot save failed");
        }
    }

    fn audit(&self, from: Machine, kind: EventKind, now: DateTime<Utc>, note: Option<String>) {
        let Some(audit) = &self.deps.audit else {
            return;
        };
        let rec = TransitionRecord {
            account_id: self.account_id.clone(),
            event: kind,
            from: from.state,
            to: self.machine.state,
            lock_cause: self.machine.lock,
            usage_ppm: self.last.usage.raw(),
            equity_micros: self.ledger.equity().raw(),
            note,
        };
        let mut w = audit.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = w.record(&rec, now) {
            error!(account_id = %self.account_id, error = %format!("{e:#}"), "audit append failed");
        }
    }

    fn raise_alert(&self, message: String, now: DateTime<Utc>) {
        self.deps.alerts.deliver(&FatalAlert {
            account_id: self.account_id.clone(),
            message,
            raised_at: now,
        });
    }

    fn publish(&mut self, state: GuardianState, now: DateTime<Utc>) {
        self.updated_at = now;
        let status = self.build_status(state);
        self.status_tx.send_replace(status);
    }

    fn build_status(&self, state: GuardianState) -> AccountStatus {
        let mut s = initial_status(
            &self.account_id,
            &self.ledger,
            &self.machine,
            &self.last,
            self.fatal_message.as_deref(),
            self.updated_at,
        );
        s.guardian_state = state;
        s
    }

    fn outcome(&self, sizing: Option<SizingDecision>, order: Option<OrderRequest>, discard: bool) -> EventOutcome {
        EventOutcome {
            status: self.status(),
            compliance: self.last.clone(),
            sizing,
            order,
            discard_signals: discard,
        }
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn machine(&self) -> Machine {
        self.machine
    }

    pub fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    pub fn last_outcome(&self) -> &ComplianceOutcome {
        &self.last
    }

    pub fn locked_on(&self) -> Option<NaiveDate> {
        self.locked_on
    }

    pub fn status(&self) -> AccountStatus {
        self.build_status(self.machine.state)
    }

    pub fn subscribe(&self) -> watch::Receiver<AccountStatus> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AccountSnapshot {
        self.ledger.snapshot(SnapshotMeta {
            risk_state: self.last.state,
            guardian_state: self.machine.state,
            lock_cause: self.machine.lock,
            locked_on: self.locked_on,
            fatal_unacknowledged: self.machine.fatal,
            saved_at: now,
        })
    }
}

fn initial_status(
    account_id: &AccountId,
    ledger: &AccountLedger,
    machine: &Machine,
    last: &ComplianceOutcome,
    fatal_message: Option<&str>,
    now: DateTime<Utc>,
) -> AccountStatus {
    AccountStatus {
        account_id: account_id.clone(),
        phase: ledger.phase(),
        guardian_state: machine.state,
        risk_state: last.state,
        lock_cause: machine.lock,
        fatal: machine
            .fatal
            .then(|| fatal_message.unwrap_or("fatal alert unacknowledged").to_string()),
        trading_day: ledger.trading_day(),
        balance_micros: ledger.balance().raw(),
        equity_micros: ledger.equity().raw(),
        high_water_mark_micros: ledger.high_water_mark().raw(),
        daily_start_balance_micros: ledger.daily_start_balance().raw(),
        day_count: ledger.day_count(),
        usage_ppm: last.usage.raw(),
        risk_budget_remaining_ppm: last.risk_budget_remaining.raw(),
        stale_data: last.flags.stale_data,
        positions: ledger.positions(),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ExecutionFailure, OrderAck, RecordingAlerts};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use pfg_schemas::{Direction, RiskState};
    use pfg_sizing::KellySizer;

    /// Venue with nothing open; every stop confirms immediately.
    struct FlatVenue;

    #[async_trait::async_trait]
    impl ExecutionBridge for FlatVenue {
        async fn submit(&self, _o: &OrderRequest) -> Result<OrderAck, ExecutionFailure> {
            Err(ExecutionFailure::Rejected {
                reason: "unused".to_string(),
            })
        }
        async fn cancel_all_orders(&self, _a: &AccountId) -> Result<usize, ExecutionFailure> {
            Ok(0)
        }
        async fn flatten_all(&self, _a: &AccountId, _l: &[FlattenLeg]) -> Result<Vec<FillEvent>, ExecutionFailure> {
            Ok(Vec::new())
        }
        async fn open_position_count(&self, _a: &AccountId) -> Result<usize, ExecutionFailure> {
            Ok(0)
        }
    }

    fn at(day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, min, sec).unwrap()
    }

    fn guardian(stale_after_ms: u64) -> Guardian {
        let mut account = AccountConfig::new("G-1", Phase::Evaluation, 50_000.0);
        account.symbols = vec!["NQ".to_string()];
        account.stale_after_ms = stale_after_ms;
        let setup = GuardianSetup {
            account,
            phase_rules: PhaseRules::default(),
            instruments: vec![Instrument::new("NQ", Micros::from_usd(20))],
            emergency_stop: EmergencyStopPolicy::default(),
            sizer: Box::new(KellySizer::full()),
        };
        let deps = GuardianDeps {
            bridge: Arc::new(FlatVenue),
            alerts: Arc::new(RecordingAlerts::new()),
            store: Arc::new(MemoryStore::new()),
            audit: None,
        };
        Guardian::boot(setup, deps, None, at(2, 14, 0, 0)).unwrap()
    }

    #[tokio::test]
    async fn stale_feed_raises_warning_and_fresh_tick_clears_it() {
        let mut g = guardian(5_000);
        g.handle(GuardianEvent::Tick(TickEvent::new("NQ", 18_000.0, at(2, 15, 0, 0))), at(2, 15, 0, 0))
            .await
            .unwrap();
        assert_eq!(g.machine().state, GuardianState::Active);

        let sig = Signal::new("NQ", Direction::Long, 18_000.0, 17_800.0, 18_400.0, 0.9);
        let out = g.handle(GuardianEvent::Signal(sig), at(2, 15, 0, 10)).await.unwrap();
        assert!(out.compliance.flags.stale_data);
        assert_eq!(out.status.guardian_state, GuardianState::Warning);
        assert!(out.status.stale_data);
        assert_eq!(out.sizing.unwrap().reason, SizingReason::RiskStateBlocked);

        let out = g
            .handle(GuardianEvent::Tick(TickEvent::new("NQ", 18_001.0, at(2, 15, 0, 11))), at(2, 15, 0, 11))
            .await
            .unwrap();
        assert_eq!(out.status.guardian_state, GuardianState::Active);
    }

    #[tokio::test]
    async fn invalid_tick_leaves_state_untouched() {
        let mut g = guardian(0);
        let before = g.status();
        let err = g
            .handle(GuardianEvent::Tick(TickEvent::new("ES", 5_000.0, at(2, 15, 0, 0))), at(2, 15, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardianError::Ledger(LedgerError::UnknownInstrument { .. })));
        let err = g
            .handle(GuardianEvent::Tick(TickEvent::new("NQ", f64::NAN, at(2, 15, 0, 0))), at(2, 15, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardianError::Ledger(LedgerError::NonFinite { .. })));
        assert_eq!(g.status().equity_micros, before.equity_micros);
        assert_eq!(g.machine(), Machine::active());
    }

    #[tokio::test]
    async fn passed_account_starts_next_phase_on_reset() {
        let mut g = guardian(0);
        // Five sessions, +$600 each: $3000 is the 6% target.
        for day in 2..=6 {
            let open = at(day, 15, 0, 0);
            let close = at(day, 16, 0, 0);
            g.handle(GuardianEvent::Fill(FillEvent::new("NQ", 1, 18_000.0, open)), open)
                .await
                .unwrap();
            g.handle(GuardianEvent::Fill(FillEvent::new("NQ", -1, 18_030.0, close)), close)
                .await
                .unwrap();
        }
        assert_eq!(g.ledger().day_count(), 4);
        assert_eq!(g.last_outcome().state, RiskState::Passed);
        assert_eq!(g.machine().state, GuardianState::Passed);
        assert_eq!(g.ledger().balance(), Micros::from_usd(53_000));

        let sig = Signal::new("NQ", Direction::Long, 18_000.0, 17_800.0, 18_400.0, 0.9);
        assert_eq!(
            g.size_position(&sig, at(6, 16, 1, 0)).await.reason,
            SizingReason::GuardianBlocked
        );

        let out = g
            .handle(
                GuardianEvent::OperatorReset {
                    next_phase: Some(Phase::Performance),
                },
                at(6, 16, 5, 0),
            )
            .await
            .unwrap();
        assert_eq!(out.status.phase, Phase::Performance);
        assert_eq!(out.status.guardian_state, GuardianState::Active);
        assert_eq!(out.status.balance_micros, Micros::from_usd(50_000).raw());
        assert_eq!(out.status.day_count, 0);
        assert_eq!(out.status.high_water_mark_micros, 0);
    }

    #[tokio::test]
    async fn fill_landing_after_lock_is_flattened_again() {
        let mut g = guardian(0);
        let out = g.handle(GuardianEvent::ManualStop, at(2, 15, 0, 0)).await.unwrap();
        assert_eq!(out.status.guardian_state, GuardianState::Locked);
        assert!(out.status.positions.is_empty());

        // An order submitted before the stop fills afterwards.
        let late = at(2, 15, 0, 5);
        let out = g
            .handle(GuardianEvent::Fill(FillEvent::new("NQ", 2, 18_000.0, late)), late)
            .await
            .unwrap();
        assert_eq!(out.status.guardian_state, GuardianState::Locked);
        assert_eq!(out.status.lock_cause, Some(LockCause::ManualStop));
        assert!(out.status.positions.is_empty());
        assert!(g.ledger().is_flat());
    }
}
