//! Node orchestrator: brings the collaborators up in dependency order and
//! tears them down again.
//!
//! Start-up is fail-fast. If any step fails, everything already started is
//! torn down before the lifecycle settles in `Stopped`, so the node is never
//! left partially running. Shutdown is best-effort: every step logs its
//! error and the sequence always runs to completion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use gatehouse_protocol::PeerIdentification;
use gatehouse_rpc::{AccessPolicy, ApiHandler, ApiServer, ListenerKind, RpcError, SharedGuard};
use gatehouse_types::{
    CollaboratorError, LedgerBackend, NotificationIndexer, PeerSessionManager, Wallet,
};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::monitor::HeightMonitor;
use crate::periodic::PeriodicTask;
use crate::shutdown::ShutdownController;
use crate::NodeError;

/// The engines the node drives. It owns none of their internals.
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerBackend>,
    pub wallet: Option<Arc<dyn Wallet>>,
    pub peers: Arc<dyn PeerSessionManager>,
    pub indexer: Arc<dyn NotificationIndexer>,
    pub rpc_handler: Option<Arc<dyn ApiHandler>>,
    pub rest_handler: Option<Arc<dyn ApiHandler>>,
    pub guard: Option<SharedGuard>,
}

impl Collaborators {
    pub fn new(
        ledger: Arc<dyn LedgerBackend>,
        peers: Arc<dyn PeerSessionManager>,
        indexer: Arc<dyn NotificationIndexer>,
    ) -> Self {
        Self {
            ledger,
            wallet: None,
            peers,
            indexer,
            rpc_handler: None,
            rest_handler: None,
            guard: None,
        }
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_rpc_handler(mut self, handler: Arc<dyn ApiHandler>) -> Self {
        self.rpc_handler = Some(handler);
        self
    }

    pub fn with_rest_handler(mut self, handler: Arc<dyn ApiHandler>) -> Self {
        self.rest_handler = Some(handler);
        self
    }

    pub fn with_guard(mut self, guard: SharedGuard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// Parts of the node that need releasing on teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Part {
    Ledger,
    Wallet,
    Peers,
    Indexer,
}

/// Orderly shutdown sequence.
const SHUTDOWN_ORDER: [Part; 4] = [Part::Indexer, Part::Ledger, Part::Peers, Part::Wallet];

/// Rollback after a failed start: reverse start-up order.
const ROLLBACK_ORDER: [Part; 4] = [Part::Indexer, Part::Peers, Part::Wallet, Part::Ledger];

#[derive(Default)]
struct Started {
    ledger: bool,
    wallet: bool,
    peers: bool,
    indexer: bool,
}

impl Started {
    fn take(&mut self, part: Part) -> bool {
        let flag = match part {
            Part::Ledger => &mut self.ledger,
            Part::Wallet => &mut self.wallet,
            Part::Peers => &mut self.peers,
            Part::Indexer => &mut self.indexer,
        };
        std::mem::take(flag)
    }
}

pub struct Node {
    config: NodeConfig,
    collaborators: Collaborators,
    lifecycle: Arc<Lifecycle>,
    shutdown: ShutdownController,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    listeners: Vec<(ListenerKind, JoinHandle<Result<(), RpcError>>)>,
    http_addrs: Vec<(ListenerKind, SocketAddr)>,
    active_chain: Option<Arc<dyn LedgerBackend>>,
    started: Started,
    started_at: Option<Instant>,
}

impl Node {
    pub fn new(config: NodeConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            lifecycle: Arc::new(Lifecycle::new()),
            shutdown: ShutdownController::new(),
            tasks: Vec::new(),
            listeners: Vec::new(),
            http_addrs: Vec::new(),
            active_chain: None,
            started: Started::default(),
            started_at: None,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// The ledger registered as the active chain, while the node runs.
    pub fn active_chain(&self) -> Option<&Arc<dyn LedgerBackend>> {
        self.active_chain.as_ref()
    }

    /// Identification this node announces to peers, at the active chain's
    /// height (or the default start height when no chain is attached).
    pub fn local_identification(
        &self,
        port: u16,
        nonce: u32,
        user_agent: impl Into<String>,
    ) -> PeerIdentification {
        let height = self.active_chain.as_ref().map(|ledger| ledger.height());
        PeerIdentification::new(port, nonce, user_agent, height)
    }

    /// Addresses the HTTP listeners are bound to.
    pub fn http_addrs(&self) -> &[(ListenerKind, SocketAddr)] {
        &self.http_addrs
    }

    pub fn http_addr(&self, kind: ListenerKind) -> Option<SocketAddr> {
        self.http_addrs
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, addr)| *addr)
    }

    /// Names of the running periodic tasks.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// A handle that can request shutdown from anywhere.
    pub fn shutdown_handle(&self) -> ShutdownController {
        self.shutdown.clone()
    }

    /// Run the start-up sequence.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        self.lifecycle
            .transition(LifecycleState::NotStarted, LifecycleState::Starting)?;
        tracing::info!(
            network = %self.config.network,
            host = %self.config.host,
            rpc_port = ?self.config.rpc_port,
            rest_port = ?self.config.rest_port,
            extended_rpc = self.config.extended_rpc,
            "node starting"
        );
        self.started_at = Some(Instant::now());

        match self.start_sequence().await {
            Ok(()) => {
                self.lifecycle
                    .transition(LifecycleState::Starting, LifecycleState::Running)?;
                tracing::info!(
                    tasks = self.tasks.len(),
                    listeners = self.listeners.len(),
                    "node running"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "node start-up failed, rolling back");
                self.teardown(&ROLLBACK_ORDER).await;
                self.lifecycle
                    .transition(LifecycleState::Starting, LifecycleState::Stopped)?;
                Err(e)
            }
        }
    }

    async fn start_sequence(&mut self) -> Result<(), NodeError> {
        self.config.validate()?;
        if self.config.extended_rpc && self.collaborators.guard.is_none() {
            return Err(NodeError::Config(
                "extended_rpc is enabled but no credential guard was supplied".into(),
            ));
        }

        // 1. Ledger storage, registered as the active chain.
        let ledger = Arc::clone(&self.collaborators.ledger);
        call_blocking({
            let ledger = Arc::clone(&ledger);
            move || ledger.open()
        })
        .await
        .map_err(|e| NodeError::startup("ledger", e))?;
        self.started.ledger = true;
        self.active_chain = Some(Arc::clone(&ledger));
        tracing::info!(height = ledger.height(), "ledger attached as active chain");

        // 2. Ledger persistence.
        let persist = {
            let ledger = Arc::clone(&ledger);
            PeriodicTask::new("ledger-persist", self.config.persist_interval(), move || {
                ledger.persist()
            })
        };
        self.spawn_task(persist);

        // 3. Wallet block processing.
        if let Some(wallet) = self.collaborators.wallet.clone() {
            let sync = PeriodicTask::new(
                "wallet-sync",
                self.config.wallet_sync_interval(),
                move || wallet.process_blocks(),
            );
            self.spawn_task(sync);
            self.started.wallet = true;
        }

        // 4. Peer network.
        call_blocking({
            let peers = Arc::clone(&self.collaborators.peers);
            move || peers.start()
        })
        .await
        .map_err(|e| NodeError::startup("peers", e))?;
        self.started.peers = true;
        tracing::info!("peer session manager started");

        // 5. Notification indexer.
        call_blocking({
            let indexer = Arc::clone(&self.collaborators.indexer);
            move || indexer.start()
        })
        .await
        .map_err(|e| NodeError::startup("indexer", e))?;
        self.started.indexer = true;
        tracing::info!("notification indexer started");

        // 6. Height monitor, detached.
        HeightMonitor::new(
            self.config.network,
            self.config.monitor_interval(),
            Arc::downgrade(&ledger),
            Arc::downgrade(&self.lifecycle),
        )
        .spawn()
        .map_err(|e| NodeError::startup("monitor", e))?;

        // 7. HTTP listeners.
        if let Some(addr) = self.config.rpc_addr()? {
            let handler = self.collaborators.rpc_handler.clone().ok_or_else(|| {
                NodeError::Config("rpc_port is set but no RPC handler was supplied".into())
            })?;
            let policy = match (&self.collaborators.guard, self.config.extended_rpc) {
                (Some(guard), true) => AccessPolicy::Guarded {
                    guard: Arc::clone(guard),
                    allow_anonymous: self.config.allow_anonymous,
                },
                _ => AccessPolicy::Open,
            };
            self.spawn_listener(ListenerKind::Rpc, addr, handler, policy)
                .await?;
        }
        if let Some(addr) = self.config.rest_addr()? {
            let handler = self.collaborators.rest_handler.clone().ok_or_else(|| {
                NodeError::Config("rest_port is set but no REST handler was supplied".into())
            })?;
            self.spawn_listener(ListenerKind::Rest, addr, handler, AccessPolicy::Open)
                .await?;
        }

        Ok(())
    }

    fn spawn_task(&mut self, task: PeriodicTask) {
        let name = task.name();
        let handle = task.spawn(self.shutdown.subscribe());
        self.tasks.push((name, handle));
    }

    async fn spawn_listener(
        &mut self,
        kind: ListenerKind,
        addr: SocketAddr,
        handler: Arc<dyn ApiHandler>,
        policy: AccessPolicy,
    ) -> Result<(), NodeError> {
        let step = match kind {
            ListenerKind::Rpc => "rpc-listener",
            ListenerKind::Rest => "rest-listener",
        };
        let bound = ApiServer::new(kind, handler, policy)
            .bind(addr)
            .await
            .map_err(|e| NodeError::startup(step, e))?;
        self.http_addrs.push((kind, bound.local_addr()));
        let handle = tokio::spawn(bound.serve(self.shutdown.signalled()));
        self.listeners.push((kind, handle));
        Ok(())
    }

    /// Run the shutdown sequence. A no-op unless the node is running.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        match self.lifecycle.current() {
            LifecycleState::NotStarted | LifecycleState::Stopped => return Ok(()),
            _ => {}
        }
        self.lifecycle
            .transition(LifecycleState::Running, LifecycleState::ShuttingDown)?;
        tracing::info!("node stopping");

        self.teardown(&SHUTDOWN_ORDER).await;

        self.lifecycle
            .transition(LifecycleState::ShuttingDown, LifecycleState::Stopped)?;
        tracing::info!(
            uptime_secs = self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0),
            "node stopped"
        );
        Ok(())
    }

    /// Start, wait for SIGINT/SIGTERM or a shutdown request, then stop.
    pub async fn run_until_signal(&mut self) -> Result<(), NodeError> {
        self.start().await?;
        let requested = self.shutdown.signalled();
        tokio::select! {
            result = self.shutdown.wait_for_signal() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "failed to wait for OS signals, stopping");
                }
            }
            _ = requested => { tracing::info!("shutdown requested"); }
        }
        self.stop().await
    }

    /// Cancel tasks and listeners, then release started parts in `order`.
    async fn teardown(&mut self, order: &[Part]) {
        self.shutdown.shutdown();
        self.drain().await;

        for &part in order {
            if !self.started.take(part) {
                continue;
            }
            let (what, result) = match part {
                Part::Indexer => {
                    let indexer = Arc::clone(&self.collaborators.indexer);
                    ("indexer", call_blocking(move || indexer.close()).await)
                }
                Part::Ledger => {
                    self.active_chain = None;
                    let ledger = Arc::clone(&self.collaborators.ledger);
                    ("ledger", call_blocking(move || ledger.dispose()).await)
                }
                Part::Peers => {
                    let peers = Arc::clone(&self.collaborators.peers);
                    ("peers", call_blocking(move || peers.shutdown()).await)
                }
                Part::Wallet => match self.collaborators.wallet.clone() {
                    Some(wallet) => ("wallet", call_blocking(move || wallet.close()).await),
                    None => continue,
                },
            };
            match result {
                Ok(()) => tracing::info!(part = what, "released"),
                Err(e) => tracing::error!(part = what, error = %e, "release failed, continuing"),
            }
        }
    }

    /// Await every task and listener, aborting whatever outlives the
    /// shutdown timeout.
    async fn drain(&mut self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();

        for (name, handle) in self.tasks.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = name, "task did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        for (kind, handle) in self.listeners.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::warn!(listener = %kind, error = %e, "listener failed"),
                Ok(Err(e)) => tracing::warn!(listener = %kind, error = %e, "listener task failed"),
                Err(_) => {
                    tracing::warn!(listener = %kind, "listener did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        self.http_addrs.clear();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if !self.tasks.is_empty() || !self.listeners.is_empty() {
            self.shutdown.shutdown();
        }
    }
}

async fn call_blocking<F>(f: F) -> Result<(), CollaboratorError>
where
    F: FnOnce() -> Result<(), CollaboratorError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CollaboratorError::Other(format!("collaborator call failed: {e}")))?
}
