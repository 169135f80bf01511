#![deny(unsafe_code)]

//! Shared test utilities for the docbot workspace.
//!
//! Fakes for the engine's external collaborators and config builders, so
//! integration tests can drive a [`docbot_core::DocEngine`] without touching
//! the network.
//!
//! ```toml
//! [dev-dependencies]
//! docbot-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fakes;

pub use config::{TestConfigBuilder, TestConfigFile};
pub use fakes::{CountingRenderer, Scripted, ScriptedInventorySource};
