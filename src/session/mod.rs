//! Adapter session: which persona is active and the adapter realizing it.

pub mod adapter_session;
pub mod state;

pub use adapter_session::AdapterSession;
pub use state::{ActiveSession, AttachedAdapter};
