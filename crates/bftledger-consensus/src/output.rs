//! Output of the consensus core.

use bftledger_types::{InstanceId, ProcessId};
use bftledger_wire::Message;

/// Where an outgoing message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every node, including this one.
    AllNodes,
    Process(ProcessId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub message: Message,
}

/// Round-change timer instructions for the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Start (or restart) the periodic timer of an instance.
    Arm(InstanceId),
    Stop(InstanceId),
}

/// Everything a core handler wants done.
///
/// The runtime sends the messages, applies the timer commands, and, when
/// `committed` is set, runs the ordered decide step for that instance.
#[derive(Debug, Default, PartialEq)]
pub struct EngineOutput {
    pub messages: Vec<Outbound>,
    pub timers: Vec<TimerCommand>,
    pub committed: Option<InstanceId>,
}

impl EngineOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.timers.is_empty() && self.committed.is_none()
    }

    /// Queues `message` for every node.
    pub fn broadcast(&mut self, message: Message) {
        self.push(Recipient::AllNodes, message);
    }

    pub fn send(&mut self, to: ProcessId, message: Message) {
        self.push(Recipient::Process(to), message);
    }

    pub fn push(&mut self, to: Recipient, message: Message) {
        self.messages.push(Outbound { to, message });
    }

    pub fn arm(&mut self, instance: InstanceId) {
        self.timers.push(TimerCommand::Arm(instance));
    }

    pub fn stop(&mut self, instance: InstanceId) {
        self.timers.push(TimerCommand::Stop(instance));
    }

    pub fn merge(&mut self, other: EngineOutput) {
        self.messages.extend(other.messages);
        self.timers.extend(other.timers);
        if other.committed.is_some() {
            self.committed = other.committed;
        }
    }
}
