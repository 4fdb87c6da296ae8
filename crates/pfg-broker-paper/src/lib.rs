//! Deterministic in-memory "paper" execution bridge.
//!
//! Design decisions:
//! - Order ids are sequential: "ORD-000001", "ORD-000002", ...
//! - By default every order fills in full at its reference price on submit.
//!   With `set_fill_on_submit(false)` orders rest as working orders until
//!   cancelled, which is what `cancel_all_orders` counts.
//! - Positions are tracked per (account, symbol); `flatten_all` closes each
//!   requested leg at its reference price and reports the closing fills.
//! - Faults are injected explicitly (fail next N cancels/flattens, venue
//!   unreachable, positions that refuse to close) so emergency-stop retry
//!   and escalation paths can be driven from tests and the dev daemon.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use pfg_guardian::{ExecutionBridge, ExecutionFailure, FlattenLeg, OrderAck, OrderRequest};
use pfg_schemas::{AccountId, FillEvent};
use tracing::debug;

mod types;

pub use types::{PaperCall, WorkingOrder};

#[derive(Debug, Default)]
struct Book {
    next_order: u64,
    fill_on_submit: bool,
    // (account, symbol) -> qty_signed
    positions: BTreeMap<(String, String), i64>,
    working: BTreeMap<String, Vec<WorkingOrder>>,
    calls: Vec<PaperCall>,
    fail_cancels: u32,
    fail_flattens: u32,
    unreachable: bool,
    sticky_positions: bool,
}

impl Book {
    fn gate(&self) -> Result<(), ExecutionFailure> {
        if self.unreachable {
            return Err(ExecutionFailure::Unavailable {
                reason: "paper venue unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn apply(&mut self, account: &AccountId, symbol: &str, qty: i64) {
        let key = (account.as_str().to_string(), symbol.to_string());
        let pos = self.positions.entry(key.clone()).or_insert(0);
        *pos += qty;
        if *pos == 0 {
            self.positions.remove(&key);
        }
    }
}

#[derive(Debug)]
pub struct PaperBridge {
    book: Mutex<Book>,
}

impl Default for PaperBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBridge {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Book {
                fill_on_submit: true,
                ..Book::default()
            }),
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Scenario wiring
    // -----------------------------------------------------------------------

    pub fn set_fill_on_submit(&self, fill: bool) {
        self.book().fill_on_submit = fill;
    }

    /// Set a position directly, bypassing submit.
    pub fn set_position(&self, account: &AccountId, symbol: impl Into<String>, qty_signed: i64) {
        let mut b = self.book();
        let key = (account.as_str().to_string(), symbol.into());
        if qty_signed == 0 {
            b.positions.remove(&key);
        } else {
            b.positions.insert(key, qty_signed);
        }
    }

    pub fn fail_next_cancels(&self, n: u32) {
        self.book().fail_cancels = n;
    }

    pub fn fail_next_flattens(&self, n: u32) {
        self.book().fail_flattens = n;
    }

    /// Every call fails with `Unavailable` while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.book().unreachable = unreachable;
    }

    /// Flatten calls are acknowledged but positions stay open.
    pub fn set_sticky_positions(&self, sticky: bool) {
        self.book().sticky_positions = sticky;
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Deterministic: BTreeMap iteration order is stable.
    pub fn positions(&self, account: &AccountId) -> BTreeMap<String, i64> {
        self.book()
            .positions
            .iter()
            .filter(|((a, _), _)| a == account.as_str())
            .map(|((_, s), q)| (s.clone(), *q))
            .collect()
    }

    pub fn working_orders(&self, account: &AccountId) -> Vec<WorkingOrder> {
        self.book()
            .working
            .get(account.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Every bridge call in arrival order.
    pub fn calls(&self) -> Vec<PaperCall> {
        self.book().calls.clone()
    }

    pub fn flatten_calls(&self, account: &AccountId) -> usize {
        self.book()
            .calls
            .iter()
            .filter(|c| matches!(c, PaperCall::Flatten { account_id, .. } if account_id == account))
            .count()
    }
}

#[async_trait::async_trait]
impl ExecutionBridge for PaperBridge {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionFailure> {
        let mut b = self.book();
        b.calls.push(PaperCall::Submit {
            account_id: order.account_id.clone(),
            symbol: order.symbol.clone(),
            qty_signed: order.qty_signed,
        });
        b.gate()?;
        if order.qty_signed == 0 {
            return Err(ExecutionFailure::Rejected {
                reason: "zero quantity".to_string(),
            });
        }
        if !(order.reference_price.is_finite() && order.reference_price > 0.0) {
            return Err(ExecutionFailure::Rejected {
                reason: format!("invalid reference price {}", order.reference_price),
            });
        }

        b.next_order += 1;
        let order_id = format!("ORD-{:06}", b.next_order);

        if !b.fill_on_submit {
            b.working
                .entry(order.account_id.as_str().to_string())
                .or_default()
                .push(WorkingOrder {
                    order_id: order_id.clone(),
                    symbol: order.symbol.clone(),
                    qty_signed: order.qty_signed,
                });
            debug!(account_id = %order.account_id, %order_id, "paper order resting");
            return Ok(OrderAck {
                order_id,
                fills: Vec::new(),
            });
        }

        b.apply(&order.account_id, &order.symbol, order.qty_signed);
        let fill = FillEvent {
            stop: Some(order.stop),
            target: Some(order.target),
            ..FillEvent::new(order.symbol.clone(), order.qty_signed, order.reference_price, Utc::now())
        };
        debug!(account_id = %order.account_id, %order_id, qty = order.qty_signed, "paper order filled");
        Ok(OrderAck {
            order_id,
            fills: vec![fill],
        })
    }

    async fn cancel_all_orders(&self, account: &AccountId) -> Result<usize, ExecutionFailure> {
        let mut b = self.book();
        b.calls.push(PaperCall::CancelAll {
            account_id: account.clone(),
        });
        b.gate()?;
        if b.fail_cancels > 0 {
            b.fail_cancels -= 1;
            return Err(ExecutionFailure::Unavailable {
                reason: "injected cancel failure".to_string(),
            });
        }
        Ok(b.working
            .remove(account.as_str())
            .map(|w| w.len())
            .unwrap_or(0))
    }

    async fn flatten_all(
        &self,
        account: &AccountId,
        legs: &[FlattenLeg],
    ) -> Result<Vec<FillEvent>, ExecutionFailure> {
        let mut b = self.book();
        b.calls.push(PaperCall::Flatten {
            account_id: account.clone(),
            legs: legs.len(),
        });
        b.gate()?;
        if b.fail_flattens > 0 {
            b.fail_flattens -= 1;
            return Err(ExecutionFailure::Unavailable {
                reason: "injected flatten failure".to_string(),
            });
        }
        if b.sticky_positions {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut fills = Vec::new();
        for leg in legs.iter().filter(|l| l.qty_to_close != 0) {
            b.apply(account, &leg.symbol, leg.qty_to_close);
            fills.push(FillEvent::new(
                leg.symbol.clone(),
                leg.qty_to_close,
                leg.reference_price,
                now,
            ));
        }
        Ok(fills)
    }

    async fn open_position_count(&self, account: &AccountId) -> Result<usize, ExecutionFailure> {
        let b = self.book();
        b.gate()?;
        Ok(b.positions
            .keys()
            .filter(|(a, _)| a == account.as_str())
            .count())
    }
}
