//! The inspection pipeline: configuration, the cycle controller and its
//! telemetry plumbing.

pub mod config;
pub mod controller;
pub mod telemetry;
