//! In-memory broker backend for relayq
//!
//! Provides a process-local queue/topic provider with support for:
//! - queue and topic lifecycle (create, list, delete)
//! - topic subscriptions with publish fan-out
//! - visibility timeouts, receipt handle rotation, long-poll waits
//!
//! Useful for tests and local development; messages do not survive the
//! process.

mod broker;


pub use broker::MemoryBroker;
