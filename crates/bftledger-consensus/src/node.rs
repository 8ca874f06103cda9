//! Async runtime around the consensus core.
//!
//! A [`Node`] owns a [`ReliableLink`] and a [`ConsensusCore`]. Every
//! delivered message is handled on its own task; the core sits behind a
//! mutex that is never held across an await point. Outputs are executed
//! by sending their messages, arming or stopping per-instance periodic
//! round-change timers, and deciding committed instances strictly in
//! instance order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bftledger_link::{Delivered, Inbound, ReliableLink};
use bftledger_types::{InstanceId, ProcessId};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, interval_at};

use crate::engine::ConsensusCore;
use crate::error::NodeError;
use crate::interceptor::Interceptors;
use crate::ledger::{Accounts, Ledger};
use crate::output::{EngineOutput, Recipient, TimerCommand};

/// Default period of the round-change timer.
pub const DEFAULT_ROUND_CHANGE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Runtime settings of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Period of an instance's round-change timer.
    pub round_change_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            round_change_timeout: DEFAULT_ROUND_CHANGE_TIMEOUT,
        }
    }
}

/// A consensus node. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    core: Mutex<ConsensusCore>,
    link: ReliableLink,
    config: NodeConfig,
    timers: Mutex<HashMap<InstanceId, AbortHandle>>,
    /// Highest instance decided so far, 0 before the first decision.
    decided: watch::Sender<u64>,
}

impl Node {
    pub fn new(link: ReliableLink, interceptors: Interceptors, config: NodeConfig) -> Self {
        let core = ConsensusCore::new(
            link.local_id(),
            Arc::clone(link.membership()),
            interceptors,
        );
        let (decided, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(core),
                link,
                config,
                timers: Mutex::new(HashMap::new()),
                decided,
            }),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.inner.link.local_id()
    }

    pub fn link(&self) -> &ReliableLink {
        &self.inner.link
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Snapshot of the decided ledger.
    pub fn ledger(&self) -> Ledger {
        self.core().ledger().clone()
    }

    /// Snapshot of all balances.
    pub fn accounts(&self) -> Accounts {
        self.core().accounts().clone()
    }

    pub fn balance(&self, account: &str) -> Option<i64> {
        self.core().balance(account)
    }

    /// Runs a closure against the core.
    pub fn inspect<R>(&self, f: impl FnOnce(&ConsensusCore) -> R) -> R {
        f(&self.core())
    }

    /// Waits until at least `count` instances are decided.
    pub async fn wait_for_decided(&self, count: u64) {
        let mut decided = self.inner.decided.subscribe();
        // The sender lives as long as `self`.
        let _ = decided.wait_for(|last| *last >= count).await;
    }

    /// Spawns [`Self::run`] on the current runtime.
    pub fn spawn(&self) -> JoinHandle<Result<(), NodeError>> {
        let node = self.clone();
        tokio::spawn(async move { node.run().await })
    }

    /// Receives and handles messages until the link fails.
    pub async fn run(&self) -> Result<(), NodeError> {
        let output = self.core().ready();
        self.execute(output).await;

        loop {
            match self.inner.link.receive().await? {
                Inbound::Message(delivered) => {
                    let node = self.clone();
                    tokio::spawn(async move { node.handle(delivered).await });
                }
                Inbound::Ack { .. } | Inbound::Duplicate { .. } => {}
            }
        }
    }

    /// Aborts every running round-change timer.
    pub fn stop_timers(&self) {
        for (_, timer) in self.timers().drain() {
            timer.abort();
        }
    }

    async fn handle(&self, delivered: Delivered) {
        let output = self.core().dispatch(delivered);
        self.execute(output).await;
    }

    async fn execute(&self, output: EngineOutput) {
        if let Some(instance) = self.perform(output) {
            self.decide(instance).await;
        }
    }

    /// Decides `instance` once every earlier instance is decided.
    async fn decide(&self, instance: InstanceId) {
        let mut decided = self.inner.decided.subscribe();
        let previous = instance.as_u64().saturating_sub(1);
        if decided.wait_for(|last| *last >= previous).await.is_err() {
            return;
        }

        let result = self.core().decide(instance);
        match result {
            Ok(output) => {
                self.perform(output);
                self.inner
                    .decided
                    .send_modify(|last| *last = (*last).max(instance.as_u64()));
            }
            Err(error) => {
                tracing::error!(
                    replica = %self.id(),
                    %instance,
                    %error,
                    "failed to decide instance"
                );
            }
        }
    }

    /// Sends messages and applies timer commands. Returns the instance
    /// the output committed, if any.
    fn perform(&self, output: EngineOutput) -> Option<InstanceId> {
        let EngineOutput {
            messages,
            timers,
            committed,
        } = output;

        for outbound in messages {
            let sent = match outbound.to {
                Recipient::AllNodes => self.inner.link.broadcast(&outbound.message).map(drop),
                Recipient::Process(to) => self.inner.link.send(to, outbound.message).map(drop),
            };
            if let Err(error) = sent {
                tracing::warn!(
                    replica = %self.id(),
                    to = ?outbound.to,
                    %error,
                    "failed to send"
                );
            }
        }

        for timer in timers {
            match timer {
                TimerCommand::Arm(instance) => self.arm(instance),
                TimerCommand::Stop(instance) => {
                    if let Some(handle) = self.timers().remove(&instance) {
                        handle.abort();
                    }
                }
            }
        }

        committed
    }

    /// Starts or restarts the periodic round-change timer of `instance`.
    fn arm(&self, instance: InstanceId) {
        let period = self.inner.config.round_change_timeout;
        let node = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                let Some(node) = upgrade(&node) else {
                    break;
                };
                let output = node.core().on_timeout(instance);
                node.perform(output);
            }
        });

        if let Some(previous) = self.timers().insert(instance, task.abort_handle()) {
            previous.abort();
        }
    }

    fn core(&self) -> MutexGuard<'_, ConsensusCore> {
        self.inner
            .core
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<InstanceId, AbortHandle>> {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn upgrade(inner: &Weak<Inner>) -> Option<Node> {
    inner.upgrade().map(|inner| Node { inner })
}
