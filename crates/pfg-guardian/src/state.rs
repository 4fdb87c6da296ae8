//! Guardian transition function.
//!
//! Every writer (market tick, fill, signal, operator action, rollover,
//! reload) becomes an [`EventKind`] and goes through [`transition`]. The
//! function is pure: it never touches the ledger, the broker or the clock.
//! Side effects are returned as [`Effect`]s and carried out by the caller.
//!
//! | From              | Outcome / event                  | To                     |
//! |-------------------|----------------------------------|------------------------|
//! | ACTIVE / WARNING  | SAFE, CAUTION                    | ACTIVE                 |
//! | ACTIVE / WARNING  | DANGER                           | WARNING                |
//! | ACTIVE / WARNING  | LOCKED                           | LOCKED (rule breach) + stop |
//! | ACTIVE / WARNING  | VIOLATED / PASSED                | same + stop            |
//! | any non-terminal  | ManualStop                       | LOCKED (manual) + stop |
//! | LOCKED            | anything below LOCKED            | LOCKED                 |
//! | LOCKED (rule)     | VIOLATED / PASSED                | same                   |
//! | LOCKED (manual, fatal) | VIOLATED                    | VIOLATED, cause kept   |
//! | LOCKED (manual, fatal) | PASSED                      | LOCKED                 |
//! | LOCKED (rule)     | DayRollover                      | re-evaluated           |
//! | VIOLATED / PASSED | anything but OperatorReset       | unchanged              |

use pfg_risk::ComplianceOutcome;
use pfg_schemas::{GuardianState, LockCause, RiskState};
use serde::{Deserialize, Serialize};

/// What caused an evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Tick,
    Fill,
    Signal,
    ManualStop,
    Reload,
    DayRollover,
    OperatorReset,
    AcknowledgeFatal,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tick => "TICK",
            EventKind::Fill => "FILL",
            EventKind::Signal => "SIGNAL",
            EventKind::ManualStop => "MANUAL_STOP",
            EventKind::Reload => "RELOAD",
            EventKind::DayRollover => "DAY_ROLLOVER",
            EventKind::OperatorReset => "OPERATOR_RESET",
            EventKind::AcknowledgeFatal => "ACKNOWLEDGE_FATAL",
        }
    }
}

/// Resting guardian state. FLATTENING is never stored here; it only exists
/// on the published status while a stop is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub state: GuardianState,
    pub lock: Option<LockCause>,
    /// A fatal alert has been raised and not yet acknowledged.
    pub fatal: bool,
}

impl Machine {
    pub fn active() -> Self {
        Self {
            state: GuardianState::Active,
            lock: None,
            fatal: false,
        }
    }

    /// Fail-closed state after corruption or an unconfirmed stop.
    pub fn fatal_locked() -> Self {
        Self {
            state: GuardianState::Locked,
            lock: Some(LockCause::Fatal),
            fatal: true,
        }
    }

    pub fn is_locked_out(&self) -> bool {
        self.fatal || self.state.is_locked_out()
    }

    /// Risk state handed to the sizer: the compliance result, or LOCKED
    /// whenever the guardian itself is locked out.
    pub fn sizing_state(&self, outcome: RiskState) -> RiskState {
        if self.is_locked_out() {
            match self.state {
                GuardianState::Violated => RiskState::Violated,
                GuardianState::Passed => RiskState::Passed,
                _ => RiskState::Locked,
            }
        } else {
            outcome
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    /// Cancel all orders and flatten all positions.
    EmergencyStop,
    /// Write a snapshot.
    Persist,
    /// Raise an operator alert.
    Alert,
    /// Drop queued, unexecuted signals.
    DiscardSignals,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: Machine,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(current: &Machine) -> Self {
        Self {
            next: *current,
            effects: Vec::new(),
        }
    }

    pub fn has(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }

    pub fn changed_from(&self, current: &Machine) -> bool {
        self.next != *current
    }
}

/// Where an outcome alone would put an unlocked guardian.
fn resting(outcome: &ComplianceOutcome) -> (GuardianState, Option<LockCause>) {
    match outcome.state {
        RiskState::Violated => (GuardianState::Violated, None),
        RiskState::Passed => (GuardianState::Passed, None),
        RiskState::Locked => (GuardianState::Locked, Some(LockCause::RuleBreach)),
        RiskState::Danger => (GuardianState::Warning, None),
        RiskState::Safe | RiskState::Caution => (GuardianState::Active, None),
    }
}

/// Next state and side effects for `event` given the fresh `outcome`.
pub fn transition(current: &Machine, outcome: &ComplianceOutcome, event: EventKind) -> Transition {
    match event {
        EventKind::AcknowledgeFatal => {
            if !current.fatal {
                return Transition::stay(current);
            }
            Transition {
                next: Machine {
                    fatal: false,
                    ..*current
                },
                effects: vec![Effect::Persist],
            }
        }

        EventKind::ManualStop => {
            if current.state.is_terminal() {
                return Transition {
                    next: *current,
                    effects: vec![Effect::DiscardSignals],
                };
            }
            let lock = match current.lock {
                // A fatal lock is stickier than a manual one.
                Some(LockCause::Fatal) => LockCause::Fatal,
                _ => LockCause::ManualStop,
            };
            let next = Machine {
                state: GuardianState::Locked,
                lock: Some(lock),
                fatal: current.fatal,
            };
            let mut effects = vec![Effect::DiscardSignals, Effect::EmergencyStop];
            if next != *current {
                effects.push(Effect::Persist);
            }
            Transition { next, effects }
        }

        EventKind::OperatorReset => {
            // Preconditions (acknowledged fatal, next session for manual
            // locks) are checked by the caller before the reset is applied.
            let cleared = Machine::active();
            let mut t = escalate(&cleared, outcome);
            t.effects.push(Effect::Persist);
            t
        }

        EventKind::DayRollover => {
            let mut t = match (current.state, current.lock) {
                (GuardianState::Locked, Some(LockCause::RuleBreach)) if !current.fatal => {
                    let (state, lock) = resting(outcome);
                    if state == GuardianState::Locked {
                        // Still over the lock threshold on the new day;
                        // already flat from the original lock.
                        Transition {
                            next: Machine {
                                state,
                                lock,
                                fatal: false,
                            },
                            effects: Vec::new(),
                        }
                    } else {
                        escalate(&Machine::active(), outcome)
                    }
                }
                _ => evaluate(current, outcome),
            };
            t.effects.push(Effect::Persist);
            t
        }

        EventKind::Reload => {
            let mut t = evaluate(current, outcome);
            if !t.has(Effect::Persist) {
                t.effects.push(Effect::Persist);
            }
            t
        }

        EventKind::Tick | EventKind::Fill | EventKind::Signal => evaluate(current, outcome),
    }
}

/// Fatal escalation after an unconfirmed emergency stop or corrupt state.
/// VIOLATED stays VIOLATED; everything else becomes LOCKED(Fatal).
pub fn escalate_fatal(current: &Machine) -> Transition {
    let next = if current.state == GuardianState::Violated {
        Machine {
            state: GuardianState::Violated,
            lock: current.lock,
            fatal: true,
        }
    } else {
        Machine::fatal_locked()
    };
    Transition {
        next,
        effects: vec![Effect::Alert, Effect::DiscardSignals, Effect::Persist],
    }
}

/// Ordinary evaluation: never lowers a lock, never leaves a terminal state.
fn evaluate(current: &Machine, outcome: &ComplianceOutcome) -> Transition {
    if current.state.is_terminal() {
        return Transition::stay(current);
    }
    match current.state {
        GuardianState::Locked | GuardianState::Flattening => {
            let (state, _) = resting(outcome);
            // Manual and fatal locks are lifted only by an operator reset.
            let operator_lock = matches!(current.lock, Some(LockCause::ManualStop | LockCause::Fatal));
            let lock = if operator_lock { current.lock } else { None };
            match state {
                GuardianState::Violated if !current.fatal => {}
                GuardianState::Passed if !current.fatal && !operator_lock => {}
                _ => return Transition::stay(current),
            }
            // Positions were flattened when the lock was taken.
            Transition {
                next: Machine {
                    state,
                    lock,
                    fatal: false,
                },
                effects: vec![Effect::Persist],
            }
        }
        _ => escalate(current, outcome),
    }
}

/// From an unlocked state: follow the outcome, stopping on lock-level
/// results.
fn escalate(current: &Machine, outcome: &ComplianceOutcome) -> Transition {
    let (state, lock) = resting(outcome);
    let next = Machine {
        state,
        lock,
        fatal: false,
    };
    let mut effects = Vec::new();
    if next.is_locked_out() {
        effects.push(Effect::DiscardSignals);
        effects.push(Effect::EmergencyStop);
    }
    if next != *current {
        effects.push(Effect::Persist);
    }
    Transition { next, effects }
}
