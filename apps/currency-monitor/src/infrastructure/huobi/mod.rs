//! Huobi Market Feed Adapter
//!
//! WebSocket client for the exchange's public market data stream:
//!
//! - **messages**: Wire types for pings, ticks, acks and errors
//! - **codec**: Gzip + JSON decoding, exact outbound framing
//! - **keepalive**: Idle-connection watchdog
//! - **backoff**: Fixed-delay reconnection policy
//! - **connection**: Session state machine

pub mod backoff;
pub mod codec;
pub mod connection;
pub mod keepalive;
pub mod messages;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use codec::{CodecError, FeedCodec};
pub use connection::{
    ConnectionState, FeedCommand, FeedConnection, FeedError, FeedHandle, FeedStatus,
};
pub use keepalive::{KeepaliveConfig, KeepaliveEvent, KeepaliveMonitor, KeepaliveState};
pub use messages::{
    ErrorMessage, FeedMessage, PingMessage, SubscribeRequest, SubscribedMessage,
    TickMessage, TickPayload,
};
