//! MessageBus - publish/subscribe keyed by recipient agent name.
//!
//! Delivery is synchronous with `publish`. Task taps observe every message
//! carrying their task id but never count as delivery.

use tracing::{debug, warn};

use crate::app::subscription::{SubscriberMap, Subscription};
use crate::domain::{AgentMessage, TaskId};

/// Outcome of one `publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    /// Agent subscribers invoked.
    pub delivered: usize,

    /// Task taps invoked.
    pub observed: usize,
}

impl Delivery {
    pub fn is_routed(&self) -> bool {
        self.delivered > 0
    }
}

pub struct MessageBus {
    agents: SubscriberMap<String, AgentMessage>,
    taps: SubscriberMap<TaskId, AgentMessage>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            agents: SubscriberMap::new(),
            taps: SubscriberMap::new(),
        }
    }

    pub fn subscribe_to_agent_messages(
        &self,
        agent_name: &str,
        on_message: impl Fn(&AgentMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.agents.subscribe(agent_name.to_string(), on_message)
    }

    pub fn subscribe_to_task_messages(
        &self,
        task_id: &TaskId,
        on_message: impl Fn(&AgentMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.taps.subscribe(task_id.clone(), on_message)
    }

    pub fn publish(&self, message: &AgentMessage) -> Delivery {
        let observed = self.observe(message);
        let delivered = self.agents.notify(&message.recipient, message);
        if delivered == 0 {
            warn!(
                message_id = %message.id,
                message_type = %message.message_type,
                recipient = %message.recipient,
                task_id = %message.task_id,
                "no subscriber for recipient; message dropped"
            );
        } else {
            debug!(
                message_id = %message.id,
                message_type = %message.message_type,
                recipient = %message.recipient,
                delivered,
                "message published"
            );
        }
        Delivery { delivered, observed }
    }

    /// Show a message to task taps only.
    pub fn observe(&self, message: &AgentMessage) -> usize {
        self.taps.notify(&message.task_id, message)
    }

    pub fn subscriber_count(&self, agent_name: &str) -> usize {
        self.agents.count(&agent_name.to_string())
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}
