pub mod connection;
pub mod frames;

pub use connection::{ChannelOptions, ConnectionManager, ConnectionState, EventHandler};
pub use frames::{parse_frame, Handshake, InboundEvent, MuseMessageFrame};
