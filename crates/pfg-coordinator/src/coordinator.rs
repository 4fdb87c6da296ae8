//! Multi-account coordinator.
//!
//! Every account runs on its own task and owns its guardian; the
//! coordinator only holds queues into those tasks and their published
//! status. A panic inside one account's task ends that task alone: its
//! requests report `AccountUnavailable` while every other account keeps
//! routing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use pfg_config::{AccountConfig, GuardianConfig};
use pfg_guardian::{
    AlertSink, EventOutcome, ExecutionBridge, Guardian, GuardianDeps, GuardianError,
    GuardianEvent, GuardianSetup, SnapshotStore, TransitionAudit,
};
use pfg_risk::ComplianceOutcome;
use pfg_schemas::{AccountId, AccountStatus, FillEvent, Phase, Signal, TickEvent};
use pfg_sizing::SizingDecision;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capability::CapabilityRegistry;
use crate::report::{
    AccountReport, AggregateReport, CoordinatorEvent, RoutedSignal, StopConfirmation, StopTarget,
};
use crate::worker::{self, BusAlerts, Command, Reply, WorkerCtx};
use crate::CoordinatorError;

const QUEUE_DEPTH: usize = 256;
const BUS_CAPACITY: usize = 1024;

/// Wall clock used to stamp every request. Replaceable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Collaborators shared by every account.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub bridge: Arc<dyn ExecutionBridge>,
    pub alerts: Arc<dyn AlertSink>,
    pub store: Arc<dyn SnapshotStore>,
    pub audit: Option<Arc<Mutex<TransitionAudit>>>,
    pub clock: Clock,
    /// Interval at which idle accounts check for a trading-day rollover.
    /// `None` rolls only when an event arrives.
    pub heartbeat: Option<Duration>,
}

impl CoordinatorDeps {
    pub fn new(
        bridge: Arc<dyn ExecutionBridge>,
        alerts: Arc<dyn AlertSink>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            bridge,
            alerts,
            store,
            audit: None,
            clock: system_clock(),
            heartbeat: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit(mut self, audit: TransitionAudit) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = Some(every);
        self
    }
}

struct AccountHandle {
    config: AccountConfig,
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<AccountStatus>,
    stop_epoch: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl AccountHandle {
    fn epoch(&self) -> u64 {
        self.stop_epoch.load(Ordering::SeqCst)
    }
}

pub struct Coordinator {
    accounts: BTreeMap<AccountId, AccountHandle>,
    capabilities: CapabilityRegistry,
    bus: broadcast::Sender<CoordinatorEvent>,
}

impl Coordinator {
    /// Boot every configured account from the snapshot store and start its
    /// worker. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Invalid configuration or a sizer name missing from the registry.
    /// Corrupt persisted state does not fail startup: that account boots
    /// LOCKED(Fatal).
    pub fn start(
        cfg: &GuardianConfig,
        capabilities: CapabilityRegistry,
        deps: CoordinatorDeps,
    ) -> Result<Self, CoordinatorError> {
        cfg.validate()?;
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        let alerts: Arc<dyn AlertSink> = Arc::new(BusAlerts {
            inner: deps.alerts.clone(),
            bus: bus.clone(),
        });
        let guardian_deps = GuardianDeps {
            bridge: deps.bridge.clone(),
            alerts,
            store: deps.store.clone(),
            audit: deps.audit.clone(),
        };

        // Build every guardian first so a config error starts nothing.
        let mut guardians = Vec::with_capacity(cfg.accounts.len());
        for account in &cfg.accounts {
            let setup = GuardianSetup::from_config(cfg, account, capabilities.sizers())
                .map_err(|e| startup_error(account, e))?;
            let guardian = Guardian::boot_from_store(setup, guardian_deps.clone(), (deps.clock)())
                .map_err(|e| startup_error(account, e))?;
            guardians.push((account.clone(), guardian));
        }

        let mut accounts = BTreeMap::new();
        for (config, guardian) in guardians {
            let account_id = config.account_id();
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            let status = guardian.subscribe();
            let stop_epoch = Arc::new(AtomicU64::new(0));
            let ctx = WorkerCtx {
                account_id: account_id.clone(),
                bridge: deps.bridge.clone(),
                stop_epoch: stop_epoch.clone(),
                self_tx: tx.downgrade(),
                bus: bus.clone(),
                clock: deps.clock.clone(),
                heartbeat: deps.heartbeat,
            };
            let task = tokio::spawn(worker::run(guardian, rx, ctx));
            info!(%account_id, phase = %config.phase, sizer = %config.sizer, "account started");
            accounts.insert(
                account_id,
                AccountHandle {
                    config,
                    tx,
                    status,
                    stop_epoch,
                    task,
                },
            );
        }

        Ok(Self {
            accounts,
            capabilities,
            bus,
        })
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    fn handle(&self, id: &AccountId) -> Result<&AccountHandle, CoordinatorError> {
        self.accounts
            .get(id)
            .ok_or_else(|| CoordinatorError::UnknownAccount {
                account_id: id.clone(),
            })
    }

    async fn request<T>(
        &self,
        id: &AccountId,
        make: impl FnOnce(&AccountHandle, Reply<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let h = self.handle(id)?;
        let unavailable = || CoordinatorError::AccountUnavailable {
            account_id: id.clone(),
        };
        let (reply, rx) = oneshot::channel();
        h.tx.send(make(h, reply)).await.map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())?
    }

    async fn send_event(
        &self,
        id: &AccountId,
        event: GuardianEvent,
    ) -> Result<EventOutcome, CoordinatorError> {
        self.request(id, |h, reply| Command::Event {
            event,
            epoch: h.epoch(),
            reply: Some(reply),
        })
        .await
    }

    /// Compliance figures as of now, rolling the trading day if due.
    pub async fn evaluate(&self, id: &AccountId) -> Result<ComplianceOutcome, CoordinatorError> {
        self.request(id, |_, reply| Command::Evaluate { reply }).await
    }

    /// Size a signal for one account without routing an order.
    pub async fn size_position(
        &self,
        id: &AccountId,
        signal: Signal,
    ) -> Result<SizingDecision, CoordinatorError> {
        self.request(id, |h, reply| Command::Size {
            signal,
            epoch: h.epoch(),
            reply,
        })
        .await
    }

    /// Deliver one signal to every account that trades its symbol and
    /// accepts its strategy tag. Accounts are served concurrently; one
    /// account's failure is reported in its own entry only.
    pub async fn route_signal(&self, signal: &Signal) -> Vec<RoutedSignal> {
        let targets: Vec<&AccountId> = self
            .accounts
            .iter()
            .filter(|(_, h)| {
                h.config
                    .accepts_signal(&signal.symbol, signal.strategy_tag.as_deref())
            })
            .map(|(id, _)| id)
            .collect();
        if targets.is_empty() {
            info!(symbol = %signal.symbol, "signal matched no account");
        }

        let sends = targets.into_iter().map(|id| async move {
            let result = self
                .send_event(id, GuardianEvent::Signal(signal.clone()))
                .await;
            if let Err(e) = &result {
                warn!(account_id = %id, error = %e, "signal not processed");
            }
            RoutedSignal {
                account_id: id.clone(),
                result,
            }
        });
        join_all(sends).await
    }

    /// Pull one signal from a registered provider and route it. `None` when
    /// the provider has nothing queued.
    pub async fn route_from_provider(
        &self,
        name: &str,
    ) -> anyhow::Result<Option<Vec<RoutedSignal>>> {
        let provider = self.capabilities.provider(name)?;
        let Some(signal) = provider.next_signal().await? else {
            return Ok(None);
        };
        Ok(Some(self.route_signal(&signal).await))
    }

    pub async fn submit_fill(
        &self,
        id: &AccountId,
        fill: FillEvent,
    ) -> Result<EventOutcome, CoordinatorError> {
        self.send_event(id, GuardianEvent::Fill(fill)).await
    }

    pub async fn submit_tick(
        &self,
        id: &AccountId,
        tick: TickEvent,
    ) -> Result<EventOutcome, CoordinatorError> {
        self.send_event(id, GuardianEvent::Tick(tick)).await
    }

    /// Mark a tick on every account trading the symbol.
    pub async fn broadcast_tick(&self, tick: &TickEvent) -> Vec<(AccountId, Result<EventOutcome, CoordinatorError>)> {
        let sends = self
            .accounts
            .iter()
            .filter(|(_, h)| h.config.trades(&tick.symbol))
            .map(|(id, _)| async move {
                (id.clone(), self.submit_tick(id, tick.clone()).await)
            });
        join_all(sends).await
    }

    /// Emergency stop. The stop epoch is bumped before the stop is queued,
    /// so signals already waiting in the queue are discarded rather than
    /// sized; the stop itself runs as soon as the account reaches it.
    pub async fn emergency_stop(&self, target: StopTarget) -> Result<Vec<StopConfirmation>, CoordinatorError> {
        let ids: Vec<AccountId> = match target {
            StopTarget::Account(id) => {
                self.handle(&id)?;
                vec![id]
            }
            StopTarget::All => self.accounts.keys().cloned().collect(),
        };

        // Bump every target before queueing any stop.
        let epochs: Vec<(AccountId, u64)> = ids
            .into_iter()
            .filter_map(|id| {
                let h = self.accounts.get(&id)?;
                let epoch = h.stop_epoch.fetch_add(1, Ordering::SeqCst) + 1;
                Some((id, epoch))
            })
            .collect();
        warn!(accounts = epochs.len(), "emergency stop requested");

        let stops = epochs.into_iter().map(|(id, epoch)| async move {
            let result = self
                .request(&id, |_, reply| Command::Event {
                    event: GuardianEvent::ManualStop,
                    epoch,
                    reply: Some(reply),
                })
                .await
                .map(|out| out.status);
            StopConfirmation {
                account_id: id,
                result,
            }
        });
        Ok(join_all(stops).await)
    }

    pub async fn operator_reset(
        &self,
        id: &AccountId,
        next_phase: Option<Phase>,
    ) -> Result<EventOutcome, CoordinatorError> {
        self.send_event(id, GuardianEvent::OperatorReset { next_phase })
            .await
    }

    pub async fn acknowledge_fatal(&self, id: &AccountId) -> Result<EventOutcome, CoordinatorError> {
        self.send_event(id, GuardianEvent::AcknowledgeFatal).await
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    /// Last published status. Never blocks on the account's queue.
    pub fn get_status(&self, id: &AccountId) -> Result<AccountStatus, CoordinatorError> {
        let h = self.handle(id)?;
        if h.task.is_finished() {
            return Err(CoordinatorError::AccountUnavailable {
                account_id: id.clone(),
            });
        }
        Ok(h.status.borrow().clone())
    }

    pub fn statuses(&self) -> Vec<AccountStatus> {
        self.accounts
            .values()
            .map(|h| h.status.borrow().clone())
            .collect()
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.keys().cloned().collect()
    }

    pub fn account_config(&self, id: &AccountId) -> Option<&AccountConfig> {
        self.accounts.get(id).map(|h| &h.config)
    }

    pub fn is_available(&self, id: &AccountId) -> bool {
        self.accounts
            .get(id)
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    /// Portfolio view across all accounts, built from published status.
    pub fn aggregate(&self) -> AggregateReport {
        let reports = self
            .accounts
            .iter()
            .map(|(id, h)| {
                let s = h.status.borrow();
                let initial = h.config.initial_balance_micros().raw();
                AccountReport {
                    account_id: id.clone(),
                    available: !h.task.is_finished(),
                    phase: s.phase,
                    guardian_state: s.guardian_state,
                    risk_state: s.risk_state,
                    equity_micros: s.equity_micros,
                    pnl_micros: s.equity_micros - initial,
                    usage_ppm: s.usage_ppm,
                }
            })
            .collect();
        AggregateReport::from_reports(reports)
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.bus.subscribe()
    }

    /// Close every queue and wait for the workers to drain.
    pub async fn shutdown(self) {
        let mut tasks = Vec::with_capacity(self.accounts.len());
        for (id, h) in self.accounts {
            drop(h.tx);
            tasks.push((id, h.task));
        }
        for (id, task) in tasks {
            if let Err(e) = task.await {
                warn!(account_id = %id, error = %e, "account worker ended abnormally");
            }
        }
    }
}

fn startup_error(account: &AccountConfig, e: GuardianError) -> CoordinatorError {
    match e {
        GuardianError::UnknownSizer { name } => CoordinatorError::UnknownSizer { name },
        GuardianError::Config(c) => CoordinatorError::Config(c),
        source => CoordinatorError::Guardian {
            account_id: account.account_id(),
            source,
        },
    }
}
