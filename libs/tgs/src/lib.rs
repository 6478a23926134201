//! # throttle-tgs
//!
//! Minimal client for the Tgstation Server (TGS) REST API.
//!
//! Only the calls the deploy throttler needs are covered:
//! - Session login (basic auth exchanged for a bearer token)
//! - Reading the identity of the logged-in user
//! - Reading and updating an instance's repository
//! - Starting a deployment (DreamMaker compile job)
//!
//! Instance scoped calls carry the numeric instance id in the `Instance`
//! header, as the server expects.

mod client;
mod error;
mod types;

pub use client::{TgsClient, TgsSettings, DEFAULT_API_VERSION};
pub use error::{TgsError, TgsResult};
pub use types::*;
