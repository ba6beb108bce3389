//! Apiary process orchestration core.
//!
//! This crate is the supervision layer of a multi-tenant agent hosting
//! platform. Each tenant runs an isolated agent runtime as its own OS
//! process (plus a companion bridge process for channels that need one);
//! the supervisor owns the full lifecycle:
//!
//! - launch: config resolution, secret decryption, workspace bootstrap,
//!   deterministic port assignment, process spawning ([`supervisor`])
//! - crash recovery with a bounded restart budget ([`supervisor::restart`])
//! - usage metering from agent stdout into a credit ledger ([`metering`])
//! - at-rest field encryption for tenant credentials ([`secrets`])
//!
//! The crate is a library: the surrounding API service constructs a
//! [`supervisor::ProcessSupervisor`] with its store, ledger, and catalog
//! implementations and drives it from its request handlers. External
//! systems are reached only through the traits in [`store`], so the whole
//! pipeline is testable with in-memory fakes.

pub mod config;
pub mod error;
pub mod metering;
pub mod observability;
pub mod process;
pub mod secrets;
pub mod store;
pub mod supervisor;
pub mod workspace;

pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use supervisor::ProcessSupervisor;
