//! Client for the Simli talking-head avatar service.
//!
//! A session token is requested over HTTPS, then a WebRTC peer connection is
//! negotiated: the remote side streams one video track to us and we stream
//! PCM audio to it over an ordered data channel.

mod client;
mod config;
mod error;
mod lifecycle;
pub mod types;

pub use client::SimliClient;
pub use config::{DEFAULT_FACE_ID, SimliConfig, SimliConfigBuilder};
pub use error::TransportError;
pub use lifecycle::TransportState;
pub use webrtc::track::track_remote::TrackRemote;
