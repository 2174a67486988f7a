//! Browser control: discovery, launch, one lazily-held CDP session, and the
//! event pipelines that feed the telemetry buffers.

pub mod events;
pub mod launch;
pub mod session;
pub mod targets;

pub use session::SessionManager;
pub use targets::PageTarget;
