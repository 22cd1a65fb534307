//! Cluster relay: mirrors local hub broadcasts on every other node.

use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tablehub_core::result::AppResult;

use crate::hub::Hub;
use crate::message::builder;
use crate::message::types::Message;

use super::broker::{BrokerBridge, BrokerMessage, MessageHandler};

/// Broker topics used by the relay, relative to the configured prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTopic {
    /// Channel broadcasts.
    Broadcast,
    /// User-targeted messages.
    User,
    /// System announcements.
    System,
}

impl BrokerTopic {
    /// Every topic the relay listens on.
    pub const ALL: [BrokerTopic; 3] = [Self::Broadcast, Self::User, Self::System];

    /// `area:action` suffix of the topic.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Broadcast => "ws:broadcast",
            Self::User => "ws:user",
            Self::System => "system:message",
        }
    }

    /// Full topic name under `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> String {
        format!("{prefix}:{}", self.suffix())
    }
}

/// Payload carried in [`BrokerMessage::data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Deliver to every subscriber of a hub channel.
    Broadcast {
        /// Hub channel name.
        channel: String,
        /// Message to deliver.
        message: Message,
    },
    /// Deliver to every connection of a user.
    UserMessage {
        /// Target user.
        user_id: String,
        /// Message to deliver.
        message: Message,
    },
    /// Deliver a system announcement to every connection.
    SystemMessage {
        /// Announcement text.
        message: String,
        /// Severity (`info`, `warning`, ...).
        level: String,
    },
}

impl RelayEvent {
    fn topic(&self) -> BrokerTopic {
        match self {
            Self::Broadcast { .. } => BrokerTopic::Broadcast,
            Self::UserMessage { .. } => BrokerTopic::User,
            Self::SystemMessage { .. } => BrokerTopic::System,
        }
    }
}

/// Publishes local events to the broker and replays remote ones into the hub.
#[derive(Debug)]
pub struct ClusterRelay {
    bridge: Arc<BrokerBridge>,
    hub: Hub,
    prefix: String,
}

impl ClusterRelay {
    /// Creates a relay. Nothing is received until [`ClusterRelay::start`].
    pub fn new(bridge: Arc<BrokerBridge>, hub: Hub, prefix: impl Into<String>) -> Self {
        Self {
            bridge,
            hub,
            prefix: prefix.into(),
        }
    }

    /// Underlying bridge.
    pub fn bridge(&self) -> &Arc<BrokerBridge> {
        &self.bridge
    }

    /// Identity of this node on the broker.
    pub fn node_id(&self) -> &str {
        self.bridge.source()
    }

    /// Full name of a relay topic.
    pub fn topic(&self, topic: BrokerTopic) -> String {
        topic.with_prefix(&self.prefix)
    }

    /// Subscribes to every relay topic.
    pub async fn start(&self) -> AppResult<()> {
        let hub = self.hub.clone();
        let node_id = self.node_id().to_string();
        let handler: MessageHandler = Arc::new(move |msg: BrokerMessage| {
            let hub = hub.clone();
            let node_id = node_id.clone();
            async move { redeliver(&hub, &node_id, msg).await }.boxed()
        });

        for topic in BrokerTopic::ALL {
            self.bridge
                .subscribe(&self.topic(topic), handler.clone())
                .await?;
        }
        info!(node_id = %self.node_id(), prefix = %self.prefix, "Cluster relay started");
        Ok(())
    }

    /// Publishes a channel broadcast for other nodes.
    pub async fn publish_channel(&self, channel: &str, message: &Message) -> AppResult<()> {
        self.publish(RelayEvent::Broadcast {
            channel: channel.to_string(),
            message: message.clone(),
        })
        .await
    }

    /// Publishes a user-targeted message for other nodes.
    pub async fn publish_user(&self, user_id: &str, message: &Message) -> AppResult<()> {
        self.publish(RelayEvent::UserMessage {
            user_id: user_id.to_string(),
            message: message.clone(),
        })
        .await
    }

    /// Publishes a system announcement for other nodes.
    pub async fn publish_system(&self, message: &str, level: &str) -> AppResult<()> {
        self.publish(RelayEvent::SystemMessage {
            message: message.to_string(),
            level: level.to_string(),
        })
        .await
    }

    async fn publish(&self, event: RelayEvent) -> AppResult<()> {
        let topic = self.topic(event.topic());
        let data = serde_json::to_value(&event)?;
        self.bridge.publish(&[topic], data).await
    }
}

async fn redeliver(hub: &Hub, node_id: &str, msg: BrokerMessage) {
    if msg.source == node_id {
        return;
    }

    let event: RelayEvent = match serde_json::from_value(msg.data) {
        Ok(event) => event,
        Err(e) => {
            warn!(topic = %msg.channel, source = %msg.source, error = %e, "Unknown relay event skipped");
            return;
        }
    };

    let result = match event {
        RelayEvent::Broadcast { channel, message } => {
            debug!(channel = %channel, source = %msg.source, "Relaying remote broadcast");
            hub.broadcast(&channel, message, Vec::new()).await
        }
        RelayEvent::UserMessage { user_id, message } => {
            debug!(user_id = %user_id, source = %msg.source, "Relaying remote user message");
            hub.broadcast_to_user(&user_id, message).await
        }
        RelayEvent::SystemMessage { message, level } => {
            hub.broadcast_all(builder::system(&message, &level)).await
        }
    };

    if let Err(e) = result {
        warn!(topic = %msg.channel, error = %e, "Remote event not delivered");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::types::MessageKind;

    #[test]
    fn test_topic_names() {
        assert_eq!(
            BrokerTopic::Broadcast.with_prefix("tablehub:ws"),
            "tablehub:ws:ws:broadcast"
        );
        assert_eq!(BrokerTopic::User.with_prefix("p"), "p:ws:user");
        assert_eq!(BrokerTopic::System.with_prefix("p"), "p:system:message");
    }

    #[test]
    fn test_relay_event_wire_shape() {
        let event = RelayEvent::Broadcast {
            channel: "table1".into(),
            message: Message::new(MessageKind::Op).with_data(json!({"op": []})),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "broadcast");
        assert_eq!(value["channel"], "table1");
        assert_eq!(value["message"]["type"], "op");

        let system: RelayEvent = serde_json::from_value(json!({
            "type": "system_message",
            "message": "maintenance",
            "level": "warning"
        }))
        .unwrap();
        assert_eq!(
            system,
            RelayEvent::SystemMessage {
                message: "maintenance".into(),
                level: "warning".into()
            }
        );
    }
}
