//! NATS connection used to publish activity events

pub mod client;

pub use client::NatsClient;
