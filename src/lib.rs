//! Simulation of a repeated two-player communication game with hidden
//! honesty roles.
//!
//! Each round, both players are assigned a role, draw an effort from the
//! distribution learned for that role, and judge each other through a
//! noisy signal. The outcome of the round reinforces the effort
//! distributions and the threshold used to judge honesty.

pub mod analysis;
pub mod config;
pub mod distributions;
pub mod engine;
pub mod error;
pub mod manager;
pub mod simulator;
pub mod stats;

pub use error::{Error, Result};
pub use simulator::{RoundOutcome, Simulator};
