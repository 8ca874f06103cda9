use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bftledger_client::{Client, ClientConfig};
use bftledger_consensus::{Interceptors, Node, NodeConfig, NodeError};
use bftledger_crypto::SigningKey;
use bftledger_link::{LinkConfig, ReliableLink};
use bftledger_types::{LocalProcess, Membership, ProcessConfig, ProcessId, ProcessIdentity};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::HarnessError;

const LOOPBACK: &str = "127.0.0.1";

/// Builder for [`TestCluster`].
#[derive(Debug)]
pub struct TestClusterBuilder {
    node_count: usize,
    client_count: usize,
    interceptors: HashMap<ProcessId, Interceptors>,
    link: LinkConfig,
    node: NodeConfig,
    client: ClientConfig,
}

impl Default for TestClusterBuilder {
    fn default() -> Self {
        Self {
            node_count: 4,
            client_count: 2,
            interceptors: HashMap::new(),
            link: LinkConfig {
                retry_base: Duration::from_millis(20),
                max_backoff: Duration::from_millis(200),
                max_attempts: Some(50),
                // Tests fire requests back to back.
                client_window: Duration::ZERO,
                node_window: Duration::ZERO,
            },
            node: NodeConfig {
                round_change_timeout: Duration::from_millis(400),
            },
            client: ClientConfig {
                timeout: Some(Duration::from_secs(10)),
            },
        }
    }
}

impl TestClusterBuilder {
    pub fn nodes(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    /// Clients take the ids right after the nodes.
    pub fn clients(mut self, count: usize) -> Self {
        self.client_count = count;
        self
    }

    /// Replaces node `id`'s default behaviour where `interceptors` says so.
    pub fn interceptors(mut self, id: ProcessId, interceptors: Interceptors) -> Self {
        self.interceptors.insert(id, interceptors);
        self
    }

    pub fn link_config(mut self, config: LinkConfig) -> Self {
        self.link = config;
        self
    }

    pub fn round_change_timeout(mut self, timeout: Duration) -> Self {
        self.node.round_change_timeout = timeout;
        self
    }

    /// Deadline applied to every client operation; `None` waits forever.
    pub fn client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client.timeout = timeout;
        self
    }

    /// Binds every socket, generates keys, and starts every node.
    pub async fn start(mut self) -> Result<TestCluster, HarnessError> {
        let total = self.node_count + self.client_count;
        let mut sockets = Vec::with_capacity(total);
        let mut processes = Vec::with_capacity(total);
        for index in 0..total {
            let socket = UdpSocket::bind((LOOPBACK, 0)).await?;
            let port = socket.local_addr()?.port();
            let id = ProcessId::new(index as u32 + 1);
            processes.push(LocalProcess::new(
                ProcessConfig::new(id, LOOPBACK, port),
                SigningKey::generate(),
            ));
            sockets.push(socket);
        }

        let identities: Vec<ProcessIdentity> =
            processes.iter().map(|p| p.identity().clone()).collect();
        let (nodes, clients) = identities.split_at(self.node_count);
        let membership = Arc::new(Membership::new(nodes.to_vec(), clients.to_vec())?);

        let mut cluster = TestCluster {
            membership: Arc::clone(&membership),
            nodes: Vec::with_capacity(self.node_count),
            handles: Vec::with_capacity(self.node_count),
            client_links: HashMap::new(),
            client_config: self.client.clone(),
        };

        for (index, (socket, local)) in sockets.into_iter().zip(processes).enumerate() {
            let id = local.id();
            let link =
                ReliableLink::from_socket(socket, local, Arc::clone(&membership), self.link.clone())?;

            if index < self.node_count {
                let interceptors = self.interceptors.remove(&id).unwrap_or_default();
                let node = Node::new(link, interceptors, self.node.clone());
                cluster.handles.push(node.spawn());
                cluster.nodes.push(node);
            } else {
                cluster.client_links.insert(id, link);
            }
        }

        tracing::debug!(
            nodes = self.node_count,
            clients = self.client_count,
            "test cluster started"
        );
        Ok(cluster)
    }
}

/// A running in-process cluster. Dropping it stops every node.
#[derive(Debug)]
pub struct TestCluster {
    membership: Arc<Membership>,
    nodes: Vec<Node>,
    handles: Vec<JoinHandle<Result<(), NodeError>>>,
    client_links: HashMap<ProcessId, ReliableLink>,
    client_config: ClientConfig,
}

impl TestCluster {
    pub fn builder() -> TestClusterBuilder {
        TestClusterBuilder::default()
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: ProcessId) -> Result<&Node, HarnessError> {
        self.nodes
            .iter()
            .find(|node| node.id() == id)
            .ok_or(HarnessError::UnknownNode(id))
    }

    /// Id of the `index`-th client, counting from 0.
    pub fn client_id(&self, index: usize) -> ProcessId {
        ProcessId::new((self.nodes.len() + index) as u32 + 1)
    }

    /// A client speaking for process `id`. Each call numbers its
    /// requests from 1 again.
    pub fn client(&self, id: ProcessId) -> Result<Client, HarnessError> {
        let link = self
            .client_links
            .get(&id)
            .ok_or(HarnessError::UnknownClient(id))?;
        Ok(Client::new(link.clone(), self.client_config.clone()))
    }

    /// Ledger account of any member.
    pub fn account(&self, id: ProcessId) -> Option<String> {
        self.membership.get(id).map(ProcessIdentity::account)
    }

    /// `account`'s balance as seen by node `id`.
    pub fn balance(&self, id: ProcessId, account: &str) -> Result<Option<i64>, HarnessError> {
        Ok(self.node(id)?.balance(account))
    }

    /// Waits until each of `ids` has decided at least `count` instances.
    pub async fn wait_for_decided(
        &self,
        ids: &[ProcessId],
        count: u64,
        within: Duration,
    ) -> Result<(), HarnessError> {
        for &id in ids {
            let node = self.node(id)?;
            tokio::time::timeout(within, node.wait_for_decided(count))
                .await
                .map_err(|_| HarnessError::NotDecided {
                    node: id,
                    count,
                    within,
                })?;
        }
        Ok(())
    }

    /// Stops every node and its timers.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        for node in &self.nodes {
            node.stop_timers();
        }
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}
