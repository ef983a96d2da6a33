//! convoy-lib: Core types and logic for Convoy
//!
//! This crate provides the building blocks of the deployment engine:
//! - `config`: the TOML deployment manifest and its settings snapshot
//! - `fingerprint`: content-derived dependency fingerprints
//! - `state`: the persisted deployment state and its storage backends
//! - `step`: the step contract handed to provisioning actions
//! - `runner`: the per-step skip/execute/retry decision engine
//! - `pipeline`: the ordered, linear sequencer over all steps

pub mod config;
pub mod fingerprint;
pub mod pipeline;
pub mod runner;
pub mod state;
pub mod step;
