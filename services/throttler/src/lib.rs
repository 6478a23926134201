//! Deploy throttler library.
//!
//! The crate ships a `throttler` binary meant to be run on a schedule; the
//! library surface exists so runs can be driven from integration tests.
//!
//! ## Modules
//!
//! - `config`: file and environment configuration
//! - `db`: read-only access to the orchestrator's state store
//! - `git`: working copy inspection
//! - `oracle`: last deployed vs latest upstream revision
//! - `orchestrator`: update and deploy requests
//! - `scheduler`: the admission-control run
//! - `startup`: dependency acquisition

pub mod config;
pub mod db;
pub mod git;
pub mod model;
pub mod oracle;
pub mod orchestrator;
pub mod scheduler;
pub mod startup;
pub mod testing;

pub use scheduler::{RunReport, Throttler};
