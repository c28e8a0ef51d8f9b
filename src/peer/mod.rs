pub mod backend;
pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod state;
pub mod tracks;
pub mod types;

pub use connection::{PeerSession, SessionOptions};
pub use data_channel::DataMessage;
pub use state::SessionState;
pub use types::{IceCandidate, NegotiationRole, Role, ServerConfig, SessionDescription, SignalPayload};
