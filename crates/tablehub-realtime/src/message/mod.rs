//! WebSocket message types, typed request decoding, builders, and validation.

pub mod builder;
pub mod request;
pub mod types;
pub mod validator;

pub use request::{ClientMessage, ProtocolError, Request};
pub use types::{ErrorBody, Message, MessageKind};
