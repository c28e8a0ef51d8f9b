//! Обёртка над WebRTC peer connection: один `PeerSession` на удалённого
//! участника, perfect negotiation, data channel и медиа-треки, события
//! вместо колбэков.

pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod utils;
pub mod webrtc_peer;

pub use capability::{check_support, ExecutionContext, PlatformFeatures, SupportReport};
pub use config::{Environment, PeerConfig};
pub use error::{ErrorClass, PeerError, Result};
pub use events::{EventBus, EventStream, PeerEvent};
pub use media::{LocalTrack, MediaConstraints, MediaStream, RemoteStream, RemoteTrack, TrackKind};
pub use peer::ice::get_ice_servers;
pub use peer::{
    DataMessage, IceCandidate, NegotiationRole, PeerSession, Role, SessionOptions, SessionState,
    SignalPayload,
};
pub use signaling::{ChannelTransport, SignalingTransport};
pub use webrtc_peer::WebRtcPlatform;
