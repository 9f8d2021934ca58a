//! Core types and traits for relayq
//!
//! This crate provides the provider seam shared by every relayq backend:
//! the [`Broker`] trait plus the message and option types that cross it.

pub mod broker;
pub mod message;

pub use broker::{Broker, BrokerError, ReceiveOptions};
pub use message::QueueMessage;
