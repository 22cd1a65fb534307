//! Cross-process fan-out through an external pub/sub broker.

pub mod backoff;
pub mod broker;
pub mod memory_pubsub;
#[cfg(feature = "redis-pubsub")]
pub mod redis_pubsub;
pub mod relay;
pub mod transport;

pub use broker::{BrokerBridge, BrokerHealth, BrokerMessage, MessageHandler};
pub use memory_pubsub::{MemoryBroker, MemoryTransport};
#[cfg(feature = "redis-pubsub")]
pub use redis_pubsub::RedisTransport;
pub use relay::{BrokerTopic, ClusterRelay, RelayEvent};
pub use transport::{InboundFrame, PubSubTransport};
