use std::hash::Hash;
use std::time::Duration;

use bftledger_link::{Inbound, ReliableLink};
use bftledger_types::{ProcessId, RequestId, Role};
use bftledger_wire::{ClientBody, ClientMessage, Message};

use crate::error::{ClientError, Result};
use crate::tally::Tally;

/// Client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Overall deadline of one operation; `None` waits forever.
    pub timeout: Option<Duration>,
}

/// A ledger client bound to one client process.
///
/// Requests are signed by the link, broadcast to every node, and resolved
/// once `f + 1` nodes reply with the same answer. Operations run one at a
/// time; replies to earlier requests are discarded.
#[derive(Debug)]
pub struct Client {
    link: ReliableLink,
    config: ClientConfig,
    next_request: RequestId,
}

impl Client {
    pub fn new(link: ReliableLink, config: ClientConfig) -> Self {
        Self {
            link,
            config,
            next_request: RequestId::new(1),
        }
    }

    /// Starts numbering requests at `first`.
    ///
    /// Nodes ignore request ids at or below the last one they applied for
    /// this client, so a client process that restarts must not reuse ids.
    pub fn starting_at(mut self, first: RequestId) -> Self {
        self.next_request = first;
        self
    }

    pub fn id(&self) -> ProcessId {
        self.link.local_id()
    }

    pub fn link(&self) -> &ReliableLink {
        &self.link
    }

    /// This client's own account.
    pub fn account(&self) -> String {
        self.link.local().identity().account()
    }

    /// The account owned by process `id`.
    pub fn account_of(&self, id: ProcessId) -> Result<String> {
        self.link
            .membership()
            .get(id)
            .map(|process| process.account())
            .ok_or(ClientError::UnknownProcess(id))
    }

    /// Transfers `amount` from `source` to `destination`.
    ///
    /// Returns the outcome agreed on by `f + 1` nodes: `false` if the
    /// transfer was rejected, for example for lack of funds.
    pub async fn transfer(&mut self, source: &str, destination: &str, amount: i64) -> Result<bool> {
        if amount <= 0 {
            return Err(ClientError::InvalidAmount(amount));
        }
        if source == destination {
            return Err(ClientError::SelfTransfer);
        }

        let body = ClientBody::Transfer {
            source: source.to_string(),
            destination: destination.to_string(),
            amount,
        };
        self.request(body, |reply| match reply {
            ClientBody::ResponseTransfer { success } => Some(*success),
            _ => None,
        })
        .await
    }

    /// Reads the balance of `account`, which must be this client's own.
    ///
    /// Nodes answer `-1` for an account they cannot serve.
    pub async fn check_balance(&mut self, account: &str) -> Result<i64> {
        let body = ClientBody::CheckBalance {
            account: account.to_string(),
        };
        self.request(body, |reply| match reply {
            ClientBody::ResponseBalance { balance } => Some(*balance),
            _ => None,
        })
        .await
    }

    async fn request<T>(
        &mut self,
        body: ClientBody,
        answer: impl Fn(&ClientBody) -> Option<T>,
    ) -> Result<T>
    where
        T: Clone + Eq + Hash + std::fmt::Debug,
    {
        let request_id = self.next_request;
        self.next_request = request_id.next();

        tracing::debug!(
            client = %self.id(),
            request = %request_id,
            ?body,
            "broadcasting request"
        );
        let message = Message::client(self.id(), ClientMessage::new(request_id, body));
        // Retransmission continues in the background until each node
        // acknowledges.
        self.link.broadcast(&message)?;

        let needed = self.link.membership().max_faulty() + 1;
        let collect = self.collect(request_id, Tally::new(needed), answer);
        match self.config.timeout {
            None => collect.await,
            Some(timeout) => tokio::time::timeout(timeout, collect)
                .await
                .map_err(|_| ClientError::Timeout {
                    request_id,
                    needed,
                    timeout,
                })?,
        }
    }

    async fn collect<T>(
        &self,
        request_id: RequestId,
        mut tally: Tally<T>,
        answer: impl Fn(&ClientBody) -> Option<T>,
    ) -> Result<T>
    where
        T: Clone + Eq + Hash + std::fmt::Debug,
    {
        let membership = self.link.membership();
        loop {
            let Inbound::Message(delivered) = self.link.receive().await? else {
                continue;
            };
            let from = delivered.message.sender_id;
            if membership.role(from) != Some(Role::Node) {
                continue;
            }
            let Some(reply) = delivered.message.as_client() else {
                continue;
            };
            if reply.request_id != request_id {
                tracing::debug!(
                    client = %self.id(),
                    %from,
                    request = %reply.request_id,
                    "discarding reply to another request"
                );
                continue;
            }
            let Some(value) = answer(&reply.body) else {
                continue;
            };

            tracing::debug!(client = %self.id(), %from, ?value, "reply");
            if let Some(agreed) = tally.record(from, value) {
                tracing::info!(
                    client = %self.id(),
                    request = %request_id,
                    ?agreed,
                    needed = tally.needed(),
                    "request resolved"
                );
                return Ok(agreed);
            }
        }
    }
}
