//! dockward server library.
//!
//! The crate ships the `dockward` binary; the library surface exists so the
//! integration tests can assemble the router and workers themselves.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod hub;
pub mod runtime;
pub mod state;
pub mod update;
