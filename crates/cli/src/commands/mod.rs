//! Command implementations for each `actl` subcommand group.

pub mod autopilot;
pub mod predictions;
pub mod prescale;
pub mod workloads;
