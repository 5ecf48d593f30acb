//! # dockward-id
//!
//! Typed identifiers used across dockward.
//!
//! Every identifier is a ULID wrapped in a newtype and rendered as
//! `{prefix}_{ulid}`, for example `key_01HV4Z2WQXKJNM8GPQY6VBKC3D`. The prefix
//! makes a stray node id passed where a key id is expected fail at parse time
//! instead of silently matching nothing in the database.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
