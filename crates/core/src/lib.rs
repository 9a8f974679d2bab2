pub mod catalog;
pub mod error;
pub mod framing;
pub mod generic_types;
pub mod orchestrator;
pub mod persona;
pub mod realtime_api;
pub mod registry;
mod store;
pub mod transcript;
pub mod visualization;

pub use error::SessionError;
pub use orchestrator::{SessionOrchestrator, SessionSettings, SessionSnapshot, SessionStatus};
pub use store::StoreError;
