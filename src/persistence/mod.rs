//! The `persistence` module stores persistent messages published to durable
//! queues of the in-memory broker, so they outlive the broker instance.
//!
//! It uses `sled` as an embedded key-value store.

pub mod sled_store;

pub use sled_store::Persistence;

#[cfg(test)]
mod tests;
