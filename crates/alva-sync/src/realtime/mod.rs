pub mod client;
pub mod protocol;

pub use client::{ChannelStream, RealtimeClient, RealtimeConfig};
pub use protocol::{socket_url, topic_for, Frame};
