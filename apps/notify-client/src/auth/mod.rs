//! Session/auth gate consumed by the live channel and the REST layer.

pub mod session;

pub use session::{MemorySession, SessionGate, SessionSnapshot};
