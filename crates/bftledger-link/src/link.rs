//! The reliable link.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bftledger_types::{LocalProcess, Membership, MessageId, ProcessId, Role};
use bftledger_wire::{Envelope, Message, MessageType, Payload};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{CollapsingSet, LinkConfig, LinkError, Result};

/// Largest datagram the link will read.
const MAX_DATAGRAM: usize = 64 * 1024;

/// What [`ReliableLink::receive`] hands back.
#[derive(Debug)]
pub enum Inbound {
    /// A peer acknowledged one of our messages.
    Ack {
        from: ProcessId,
        message_id: MessageId,
    },
    /// A retransmission of a message already delivered. It has been
    /// acknowledged again and must not be processed.
    Duplicate {
        from: ProcessId,
        message_id: MessageId,
        message_type: MessageType,
    },
    /// A fresh, authenticated message.
    Message(Delivered),
}

/// A fresh message together with the envelope it arrived in.
///
/// The envelope is kept because consensus stores signed messages as
/// quorum evidence and reads piggybacked justification from it.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub envelope: Envelope,
    pub message: Message,
    /// Sent by this process to itself.
    pub local: bool,
}

/// Handle to the retransmission task of one sent message.
#[derive(Debug)]
pub struct Delivery {
    destination: ProcessId,
    message_id: MessageId,
    task: Option<JoinHandle<Result<()>>>,
}

impl Delivery {
    pub fn destination(&self) -> ProcessId {
        self.destination
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Waits until the destination acknowledged, or retrying gave up.
    pub async fn acknowledged(self) -> Result<()> {
        match self.task {
            None => Ok(()),
            Some(task) => task.await.map_err(|_| LinkError::Cancelled)?,
        }
    }

    /// Stops retransmitting.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Signed, retransmitting, deduplicating transport for one process.
///
/// Cloning is cheap; clones share the socket and all link state.
#[derive(Debug, Clone)]
pub struct ReliableLink {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    local: LocalProcess,
    membership: Arc<Membership>,
    config: LinkConfig,
    socket: UdpSocket,
    addresses: HashMap<ProcessId, SocketAddr>,

    next_message_id: Mutex<HashMap<ProcessId, u64>>,
    /// Sends still being retransmitted. An entry lives exactly as long as
    /// its retransmission task.
    pending: Mutex<HashMap<(ProcessId, MessageId), Arc<Notify>>>,
    seen: Mutex<HashMap<ProcessId, CollapsingSet>>,
    last_accepted: Mutex<HashMap<ProcessId, Instant>>,

    loopback_tx: mpsc::UnboundedSender<Envelope>,
    loopback_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

/// Removes a send from the pending table when its retransmission task
/// ends, however it ends.
struct PendingSend<'a> {
    inner: &'a Inner,
    key: (ProcessId, MessageId),
}

impl Drop for PendingSend<'_> {
    fn drop(&mut self) {
        lock(&self.inner.pending).remove(&self.key);
    }
}

/// Link state stays consistent across a panicking holder, so a poisoned
/// lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReliableLink {
    /// Binds a socket at the local process's configured address.
    pub async fn bind(
        local: LocalProcess,
        membership: Arc<Membership>,
        config: LinkConfig,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local.config().address()).await?;
        Self::from_socket(socket, local, membership, config)
    }

    /// Wraps an already bound socket.
    ///
    /// Every member's address is resolved once, up front.
    pub fn from_socket(
        socket: UdpSocket,
        local: LocalProcess,
        membership: Arc<Membership>,
        config: LinkConfig,
    ) -> Result<Self> {
        let mut addresses = HashMap::new();
        for process in membership.processes() {
            let address = process.config.address();
            let resolved = address
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| LinkError::UnresolvedAddress {
                    process: process.id(),
                    address: address.clone(),
                })?;
            addresses.insert(process.id(), resolved);
        }

        let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();
        debug!(
            process = %local.id(),
            addr = ?socket.local_addr().ok(),
            members = addresses.len(),
            "link up"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                local,
                membership,
                config,
                socket,
                addresses,
                next_message_id: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                seen: Mutex::new(HashMap::new()),
                last_accepted: Mutex::new(HashMap::new()),
                loopback_tx,
                loopback_rx: tokio::sync::Mutex::new(loopback_rx),
            }),
        })
    }

    pub fn local(&self) -> &LocalProcess {
        &self.inner.local
    }

    pub fn local_id(&self) -> ProcessId {
        self.inner.local.id()
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.inner.membership
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Sends `message` to every node.
    pub fn broadcast(&self, message: &Message) -> Result<Vec<Delivery>> {
        self.inner
            .membership
            .nodes()
            .iter()
            .map(|node| self.send(node.id(), message.clone()))
            .collect()
    }

    /// Signs `message` and delivers it to `to`, retransmitting until
    /// acknowledged.
    ///
    /// The sender and message id fields are filled in here. Must be
    /// called from within a tokio runtime.
    pub fn send(&self, to: ProcessId, mut message: Message) -> Result<Delivery> {
        let inner = &self.inner;
        let address = *inner
            .addresses
            .get(&to)
            .ok_or(LinkError::UnknownDestination(to))?;

        let message_id = inner.next_message_id(to);
        message.sender_id = inner.local.id();
        message.message_id = message_id;
        let envelope = Envelope::wrap(message, &inner.local)?;

        if to == inner.local.id() {
            trace!(message_id = %message_id, kind = %envelope.message_type, "loopback");
            // Only fails once the link itself is gone.
            let _ = inner.loopback_tx.send(envelope);
            return Ok(Delivery {
                destination: to,
                message_id,
                task: None,
            });
        }

        let bytes = envelope.to_bytes()?;
        let acked = Arc::new(Notify::new());
        lock(&inner.pending).insert((to, message_id), Arc::clone(&acked));
        let task = tokio::spawn(
            Arc::clone(inner).retransmit(to, address, message_id, bytes, acked),
        );
        Ok(Delivery {
            destination: to,
            message_id,
            task: Some(task),
        })
    }

    /// Waits for the next message worth handing to the caller.
    ///
    /// Datagrams that fail to decode, fail authentication, come from
    /// unknown senders, arrive inside the sender's window, or carry an
    /// unverifiable client request are dropped here.
    pub async fn receive(&self) -> Result<Inbound> {
        loop {
            let (envelope, local) = self.next_envelope().await?;
            if let Some(inbound) = self.inner.accept(envelope, local).await {
                return Ok(inbound);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_sends(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    async fn next_envelope(&self) -> Result<(Envelope, bool)> {
        let mut loopback = self.inner.loopback_rx.lock().await;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                biased;

                Some(envelope) = loopback.recv() => return Ok((envelope, true)),

                received = self.inner.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(received) => received,
                        // ICMP errors from an earlier send surface here on
                        // some platforms.
                        Err(e) if matches!(
                            e.kind(),
                            ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused
                        ) => {
                            trace!(error = %e, "transient socket error");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    match Envelope::from_bytes(&buf[..len]) {
                        Ok(envelope) => return Ok((envelope, false)),
                        Err(e) => debug!(%from, error = %e, "undecodable datagram"),
                    }
                }
            }
        }
    }
}

impl Inner {
    fn next_message_id(&self, to: ProcessId) -> MessageId {
        let mut ids = lock(&self.next_message_id);
        let next = ids.entry(to).or_insert(0);
        *next += 1;
        MessageId::new(*next)
    }

    async fn retransmit(
        self: Arc<Self>,
        to: ProcessId,
        address: SocketAddr,
        message_id: MessageId,
        bytes: Vec<u8>,
        acked: Arc<Notify>,
    ) -> Result<()> {
        // Also runs when the task is aborted.
        let _pending = PendingSend {
            inner: &*self,
            key: (to, message_id),
        };

        let mut attempts = 0;
        loop {
            self.unreliable_send(address, &bytes).await;
            attempts += 1;

            let backoff = self.config.backoff(attempts);
            if tokio::time::timeout(backoff, acked.notified()).await.is_ok() {
                trace!(destination = %to, message_id = %message_id, attempts, "acknowledged");
                return Ok(());
            }
            if self.config.max_attempts.is_some_and(|max| attempts >= max) {
                warn!(
                    destination = %to,
                    message_id = %message_id,
                    attempts,
                    "giving up on unacknowledged message"
                );
                return Err(LinkError::Unacknowledged {
                    destination: to,
                    message_id,
                    attempts,
                });
            }
        }
    }

    /// Wakes the retransmission task of `(to, message_id)`, if it still
    /// runs. ACKs for anything else are dropped.
    fn acknowledged(&self, to: ProcessId, message_id: MessageId) {
        if let Some(acked) = lock(&self.pending).get(&(to, message_id)) {
            acked.notify_one();
        }
    }

    /// Single best-effort transmission.
    async fn unreliable_send(&self, address: SocketAddr, bytes: &[u8]) {
        if let Err(e) = self.socket.send_to(bytes, address).await {
            trace!(%address, error = %e, "send failed");
        }
    }

    async fn acknowledge(&self, to: ProcessId, message_id: MessageId) {
        let Some(address) = self.addresses.get(&to).copied() else {
            return;
        };
        let ack = Message::ack(self.local.id(), message_id);
        match Envelope::wrap(ack, &self.local).and_then(|envelope| envelope.to_bytes()) {
            Ok(bytes) => self.unreliable_send(address, &bytes).await,
            Err(e) => warn!(destination = %to, error = %e, "cannot encode ack"),
        }
    }

    /// Runs the acceptance pipeline for one envelope.
    async fn accept(&self, envelope: Envelope, local: bool) -> Option<Inbound> {
        let sender = envelope.sender_id;
        let message_id = envelope.message_id;

        if let Err(e) = envelope.verify_member(&self.membership) {
            warn!(%sender, error = %e, "dropping unauthenticated message");
            return None;
        }
        let message = match envelope.open() {
            Ok(message) => message,
            Err(e) => {
                warn!(%sender, error = %e, "dropping malformed message");
                return None;
            }
        };

        if let Payload::Ack = message.payload {
            self.acknowledged(sender, message_id);
            return Some(Inbound::Ack {
                from: sender,
                message_id,
            });
        }

        let role = self.membership.role(sender)?;
        if role != Role::Node && message.message_type().is_consensus() {
            warn!(
                %sender,
                %message_id,
                kind = %envelope.message_type,
                "dropping consensus message from a client"
            );
            return None;
        }
        if !local && !self.within_window(sender, role) {
            debug!(%sender, %message_id, "dropping message inside sender window");
            return None;
        }

        let fresh = lock(&self.seen).entry(sender).or_default().insert(message_id.as_u64());
        if !fresh {
            debug!(%sender, %message_id, kind = %envelope.message_type, "duplicate");
            if !local {
                self.acknowledge(sender, message_id).await;
            }
            return Some(Inbound::Duplicate {
                from: sender,
                message_id,
                message_type: envelope.message_type,
            });
        }

        if let Payload::Consensus(consensus) = &message.payload {
            if let Err(e) = consensus.verify_binding(&self.membership) {
                warn!(%sender, %message_id, error = %e, "dropping consensus message with bad client request");
                return None;
            }
            // An answer to one of our messages doubles as its ACK.
            if let (Some(to), Some(answered)) = (consensus.reply_to, consensus.reply_to_message_id) {
                if to == self.local.id() {
                    self.acknowledged(sender, answered);
                }
            }
        }

        if !local {
            self.acknowledge(sender, message_id).await;
        }
        trace!(%sender, %message_id, kind = %envelope.message_type, "delivered");
        Some(Inbound::Message(Delivered {
            envelope,
            message,
            local,
        }))
    }

    /// Enforces the minimum spacing between accepted messages per sender.
    fn within_window(&self, sender: ProcessId, role: Role) -> bool {
        let window = match role {
            Role::Client => self.config.client_window,
            Role::Node => self.config.node_window,
        };
        let now = Instant::now();
        let mut last = lock(&self.last_accepted);
        if let Some(previous) = last.get(&sender) {
            if now.duration_since(*previous) < window {
                return false;
            }
        }
        last.insert(sender, now);
        true
    }
}
