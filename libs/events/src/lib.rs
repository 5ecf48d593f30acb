//! # dockward-events
//!
//! Event envelopes for the container runtime's live event feed.
//!
//! ## Flow
//!
//! The runtime emits one JSON object per lifecycle notification (container
//! start, image pull, network connect, ...). The hub decodes each object into
//! an [`EventEnvelope`], drops it if its action is in the configured
//! [`IgnoreSet`], and hands the survivors to subscribers.
//!
//! Envelopes are transient. Nothing here is persisted.

mod envelope;
mod error;
mod filter;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use filter::IgnoreSet;
pub use types::*;
