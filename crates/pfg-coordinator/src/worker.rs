//! One task per account: the only writer of that account's guardian.
//!
//! Requests arrive on an ordered mpsc queue and are answered on oneshot
//! channels. Signals and sizing requests carry the account's stop epoch at
//! enqueue time; one enqueued before the latest emergency stop was applied
//! is answered `Cancelled` and never reaches the sizer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pfg_guardian::{
    AlertSink, EventOutcome, ExecutionBridge, FatalAlert, Guardian, GuardianEvent, OrderRequest,
};
use pfg_risk::ComplianceOutcome;
use pfg_schemas::{AccountId, Signal};
use pfg_sizing::SizingDecision;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

use crate::{Clock, CoordinatorError, CoordinatorEvent};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

pub(crate) enum Command {
    Event {
        event: GuardianEvent,
        /// Stop epoch observed when the request was queued.
        epoch: u64,
        /// `None` for fire-and-forget (fills fed back from the venue).
        reply: Option<Reply<EventOutcome>>,
    },
    Evaluate {
        reply: Reply<ComplianceOutcome>,
    },
    Size {
        signal: Signal,
        epoch: u64,
        reply: Reply<SizingDecision>,
    },
}

pub(crate) struct WorkerCtx {
    pub account_id: AccountId,
    pub bridge: Arc<dyn ExecutionBridge>,
    pub stop_epoch: Arc<AtomicU64>,
    pub self_tx: mpsc::WeakSender<Command>,
    pub bus: broadcast::Sender<CoordinatorEvent>,
    pub clock: Clock,
    pub heartbeat: Option<Duration>,
}

impl WorkerCtx {
    /// Bump the epoch so everything already queued is cancelled.
    fn bump(&self) -> u64 {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn cancelled(&self) -> CoordinatorError {
        CoordinatorError::Cancelled {
            account_id: self.account_id.clone(),
        }
    }
}

/// Tracks which stop epoch the guardian has actually applied.
struct EpochGate {
    applied: u64,
}

impl EpochGate {
    /// Runnable only when no stop is pending and the request is not older
    /// than the last applied stop.
    fn admits(&self, epoch: u64, current: u64) -> bool {
        epoch == current && self.applied == current
    }
}

pub(crate) async fn run(mut guardian: Guardian, mut rx: mpsc::Receiver<Command>, ctx: WorkerCtx) {
    let mut status_rx = guardian.subscribe();
    let mut gate = EpochGate {
        applied: ctx.stop_epoch.load(Ordering::SeqCst),
    };

    // Restored locks with exposure on the books are stopped before anything
    // else is processed.
    if let Err(e) = guardian.handle(GuardianEvent::Reload, (ctx.clock)()).await {
        error!(account_id = %ctx.account_id, error = %e, "reload failed");
    }
    publish_status(&mut status_rx, &ctx);

    let mut heartbeat = ctx.heartbeat.map(tokio::time::interval);

    loop {
        let cmd = match heartbeat.as_mut() {
            Some(ticker) => {
                tokio::select! {
                    cmd = rx.recv() => cmd,
                    _ = ticker.tick() => {
                        // Day rollover needs no event to happen.
                        if let Err(e) = guardian.handle(GuardianEvent::DayRollover, (ctx.clock)()).await {
                            warn!(account_id = %ctx.account_id, error = %e, "heartbeat rollover failed");
                        }
                        publish_status(&mut status_rx, &ctx);
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };
        let Some(cmd) = cmd else {
            break;
        };
        let now = (ctx.clock)();

        match cmd {
            Command::Event { event, epoch, reply } => {
                let is_signal = matches!(event, GuardianEvent::Signal(_));
                let is_stop = matches!(event, GuardianEvent::ManualStop);
                let current = ctx.stop_epoch.load(Ordering::SeqCst);
                if is_signal && !gate.admits(epoch, current) {
                    info!(account_id = %ctx.account_id, epoch, current, "queued signal discarded after stop");
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(ctx.cancelled()));
                    }
                    continue;
                }

                let result = guardian.handle(event, now).await;
                if is_stop {
                    gate.applied = gate.applied.max(epoch);
                }
                if let Ok(out) = &result {
                    if out.discard_signals && !is_stop {
                        gate.applied = gate.applied.max(ctx.bump());
                    }
                    if let Some(order) = &out.order {
                        spawn_submit(&ctx, order.clone(), current);
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result.map_err(|source| CoordinatorError::Guardian {
                        account_id: ctx.account_id.clone(),
                        source,
                    }));
                }
            }
            Command::Evaluate { reply } => {
                let outcome = guardian.evaluate(now).await;
                let _ = reply.send(Ok(outcome));
            }
            Command::Size { signal, epoch, reply } => {
                let current = ctx.stop_epoch.load(Ordering::SeqCst);
                if !gate.admits(epoch, current) {
                    let _ = reply.send(Err(ctx.cancelled()));
                    continue;
                }
                let decision = guardian.size_position(&signal, now).await;
                let _ = reply.send(Ok(decision));
            }
        }
        publish_status(&mut status_rx, &ctx);
    }
    info!(account_id = %ctx.account_id, "account worker stopped");
}

fn publish_status(rx: &mut tokio::sync::watch::Receiver<pfg_schemas::AccountStatus>, ctx: &WorkerCtx) {
    if rx.has_changed().unwrap_or(false) {
        let status = rx.borrow_and_update().clone();
        let _ = ctx.bus.send(CoordinatorEvent::Status(status));
    }
}

/// Hand a sized order to the venue off the account loop. Fills come back
/// through the account's own queue, including fills of an order that was
/// already at the venue when a stop landed.
fn spawn_submit(ctx: &WorkerCtx, order: OrderRequest, epoch: u64) {
    let bridge = ctx.bridge.clone();
    let stop_epoch = ctx.stop_epoch.clone();
    let tx = ctx.self_tx.clone();
    let bus = ctx.bus.clone();
    tokio::spawn(async move {
        if stop_epoch.load(Ordering::SeqCst) != epoch {
            info!(account_id = %order.account_id, symbol = %order.symbol, "order dropped: emergency stop since sizing");
            return;
        }
        match bridge.submit(&order).await {
            Ok(ack) => {
                info!(
                    account_id = %order.account_id,
                    order_id = %ack.order_id,
                    symbol = %order.symbol,
                    qty = order.qty_signed,
                    fills = ack.fills.len(),
                    "order routed"
                );
                let _ = bus.send(CoordinatorEvent::OrderRouted {
                    account_id: order.account_id.clone(),
                    order_id: ack.order_id.clone(),
                    symbol: order.symbol.clone(),
                    qty_signed: order.qty_signed,
                });
                if stop_epoch.load(Ordering::SeqCst) != epoch && !ack.fills.is_empty() {
                    // The guardian flattens these again once they are booked.
                    warn!(account_id = %order.account_id, order_id = %ack.order_id, "order filled after an emergency stop");
                }
                let Some(tx) = tx.upgrade() else {
                    return;
                };
                for fill in ack.fills {
                    let cmd = Command::Event {
                        event: GuardianEvent::Fill(fill),
                        epoch,
                        reply: None,
                    };
                    if tx.send(cmd).await.is_err() {
                        warn!(account_id = %order.account_id, "fill dropped: account worker gone");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(account_id = %order.account_id, symbol = %order.symbol, error = %e, "order submission failed");
                let _ = bus.send(CoordinatorEvent::OrderFailed {
                    account_id: order.account_id.clone(),
                    symbol: order.symbol.clone(),
                    reason: e.to_string(),
                });
            }
        }
    });
}

/// Alert sink that also puts the alert on the coordinator bus.
pub(crate) struct BusAlerts {
    pub inner: Arc<dyn AlertSink>,
    pub bus: broadcast::Sender<CoordinatorEvent>,
}

impl AlertSink for BusAlerts {
    fn deliver(&self, alert: &FatalAlert) {
        self.inner.deliver(alert);
        let _ = self.bus.send(CoordinatorEvent::Alert(alert.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::EpochGate;

    #[test]
    fn gate_blocks_pending_and_stale_epochs() {
        let gate = EpochGate { applied: 0 };
        assert!(gate.admits(0, 0));
        // stop requested, not yet applied
        assert!(!gate.admits(0, 1));
        assert!(!gate.admits(1, 1));

        let gate = EpochGate { applied: 1 };
        assert!(gate.admits(1, 1));
        assert!(!gate.admits(0, 1));
    }
}
