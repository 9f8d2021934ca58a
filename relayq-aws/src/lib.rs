//! AWS broker backend for relayq
//!
//! Implements the [`relayq_core::Broker`] trait over SQS (queues) and
//! SNS (topics) using the official AWS SDK clients. Point it at a custom
//! endpoint to run against a local emulator.

mod broker;

pub use broker::AwsBroker;
