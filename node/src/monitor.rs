//! Best-effort chain height monitor.
//!
//! Runs on its own named OS thread that is never joined: process exit kills
//! it wherever it is. It holds only weak references, and exits on its own
//! once the ledger or the node's lifecycle is gone or the node has stopped.

use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gatehouse_types::{LedgerBackend, NetworkId};
use gatehouse_utils::format_duration;

use crate::lifecycle::{Lifecycle, LifecycleState};

pub const MONITOR_THREAD_NAME: &str = "height-monitor";

pub struct HeightMonitor {
    network: NetworkId,
    interval: Duration,
    ledger: Weak<dyn LedgerBackend>,
    lifecycle: Weak<Lifecycle>,
    started_at: Instant,
}

impl HeightMonitor {
    pub fn new(
        network: NetworkId,
        interval: Duration,
        ledger: Weak<dyn LedgerBackend>,
        lifecycle: Weak<Lifecycle>,
    ) -> Self {
        Self {
            network,
            interval,
            ledger,
            lifecycle,
            started_at: Instant::now(),
        }
    }

    /// Start the monitor thread. Callers may drop the handle to detach it.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(MONITOR_THREAD_NAME.into())
            .spawn(move || self.run())
    }

    fn run(self) {
        loop {
            std::thread::sleep(self.interval);
            let Some(ledger) = self.ledger.upgrade() else {
                break;
            };
            let stopped = self
                .lifecycle
                .upgrade()
                .map_or(true, |l| l.current() == LifecycleState::Stopped);
            if stopped {
                break;
            }
            let height = ledger.height().saturating_add(1);
            tracing::info!(
                network = %self.network.as_str(),
                height,
                uptime = %format_duration(self.started_at.elapsed().as_secs()),
                "[net] block height"
            );
        }
        tracing::debug!("height monitor exiting");
    }
}
