//! Testing utilities for unitbridge
//!
//! This crate provides:
//! - A simulated appliance gateway implementing the core `Transport` trait
//! - Fixture contents of a typical heating unit
//! - A publisher recording everything it receives

pub mod fixtures;
pub mod gateway;
pub mod publisher;

pub use gateway::{GatewayHandle, SimulatedGateway, CODE_NOT_FOUND};
pub use publisher::RecordingPublisher;
