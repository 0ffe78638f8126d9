//! Peg Rate Controller Library
//!
//! Exposes the controller core, the rate store adapters and the status
//! server for use by the binary and integration tests.

pub mod controller;
pub mod status;
pub mod store;
