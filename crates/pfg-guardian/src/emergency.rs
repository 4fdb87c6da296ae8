//! Emergency stop: cancel, flatten, confirm. Bounded retries with
//! exponential backoff; the caller escalates a failure to a fatal alert.

use std::collections::BTreeMap;

use pfg_config::EmergencyStopPolicy;
use pfg_schemas::{AccountId, FillEvent};
use tracing::{info, warn};

use crate::ports::{ExecutionBridge, ExecutionFailure, FlattenLeg};

#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub attempts: u32,
    pub cancelled: usize,
    /// Closing executions reported by the bridge across all attempts.
    pub fills: Vec<FillEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopFailure {
    pub attempts: u32,
    pub last_error: String,
}

impl std::fmt::Display for StopFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "emergency stop unconfirmed after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for StopFailure {}

/// Run the stop until the bridge reports no open positions or attempts run
/// out. Legs already closed by reported fills are not re-sent.
pub async fn run_emergency_stop(
    bridge: &dyn ExecutionBridge,
    account: &AccountId,
    legs: &[FlattenLeg],
    policy: &EmergencyStopPolicy,
) -> Result<StopReport, StopFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut remaining: BTreeMap<String, FlattenLeg> = legs
        .iter()
        .filter(|l| l.qty_to_close != 0)
        .map(|l| (l.symbol.clone(), l.clone()))
        .collect();
    let mut cancelled = 0usize;
    let mut fills = Vec::new();
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let delay = policy.backoff_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match attempt_once(bridge, account, &mut remaining, &mut fills).await {
            Ok((n, open)) => {
                cancelled += n;
                if open == 0 {
                    info!(account_id = %account, attempt, cancelled, "emergency stop confirmed");
                    return Ok(StopReport {
                        attempts: attempt,
                        cancelled,
                        fills,
                    });
                }
                last_error = format!("{open} position(s) still open");
            }
            Err(e) => last_error = e.to_string(),
        }
        warn!(account_id = %account, attempt, max_attempts, error = %last_error, "emergency stop attempt failed");
    }

    Err(StopFailure {
        attempts: max_attempts,
        last_error,
    })
}

async fn attempt_once(
    bridge: &dyn ExecutionBridge,
    account: &AccountId,
    remaining: &mut BTreeMap<String, FlattenLeg>,
    fills: &mut Vec<FillEvent>,
) -> Result<(usize, usize), ExecutionFailure> {
    let cancelled = bridge.cancel_all_orders(account).await?;

    let legs: Vec<FlattenLeg> = remaining.values().cloned().collect();
    if !legs.is_empty() {
        let reported = bridge.flatten_all(account, &legs).await?;
        for f in &reported {
            if let Some(leg) = remaining.get_mut(&f.symbol) {
                leg.qty_to_close -= f.qty_delta;
                if leg.qty_to_close == 0 || leg.qty_to_close.signum() != legs_sign(&legs, &f.symbol) {
                    remaining.remove(&f.symbol);
                }
            }
        }
        fills.extend(reported);
    }

    let open = bridge.open_position_count(account).await?;
    Ok((cancelled, open))
}

fn legs_sign(legs: &[FlattenLeg], symbol: &str) -> i64 {
    legs.iter()
        .find(|l| l.symbol == symbol)
        .map(|l| l.qty_to_close.signum())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{OrderAck, OrderRequest};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `fail_first` flattens; fills half a leg at a time.
    struct Flaky {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ExecutionBridge for Flaky {
        async fn submit(&self, _o: &OrderRequest) -> Result<OrderAck, ExecutionFailure> {
            unreachable!()
        }
        async fn cancel_all_orders(&self, _a: &AccountId) -> Result<usize, ExecutionFailure> {
            Ok(2)
        }
        async fn flatten_all(&self, _a: &AccountId, legs: &[FlattenLeg]) -> Result<Vec<FillEvent>, ExecutionFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ExecutionFailure::Unavailable {
                    reason: format!("attempt {}", n + 1),
                });
            }
            Ok(legs
                .iter()
                .map(|l| FillEvent::new(l.symbol.clone(), l.qty_to_close, l.reference_price, Utc::now()))
                .collect())
        }
        async fn open_position_count(&self, _a: &AccountId) -> Result<usize, ExecutionFailure> {
            Ok(if self.calls.load(Ordering::SeqCst) > self.fail_first { 0 } else { 1 })
        }
    }

    fn legs() -> Vec<FlattenLeg> {
        vec![
            FlattenLeg {
                symbol: "ES".to_string(),
                qty_to_close: -2,
                reference_price: 5_000.0,
            },
            FlattenLeg {
                symbol: "NQ".to_string(),
                qty_to_close: 0,
                reference_price: 18_000.0,
            },
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_then_confirms() {
        let bridge = Flaky {
            fail_first: 2,
            calls: AtomicU32::new(0),
        };
        let started = tokio::time::Instant::now();
        let report = run_emergency_stop(&bridge, &AccountId::new("a"), &legs(), &EmergencyStopPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.fills.len(), 1);
        assert_eq!(report.fills[0].qty_delta, -2);
        // 200ms before attempt 2, 400ms before attempt 3.
        assert!(started.elapsed() >= std::time::Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let bridge = Flaky {
            fail_first: 10,
            calls: AtomicU32::new(0),
        };
        let policy = EmergencyStopPolicy {
            max_attempts: 2,
            base_backoff_ms: 50,
        };
        let err = run_emergency_stop(&bridge, &AccountId::new("a"), &legs(), &policy)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.last_error.contains("attempt 2"));
        assert_eq!(bridge.calls.load(Ordering::SeqCst), 2);
    }
}
