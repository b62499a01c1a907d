//! Subsystem modules for the persona bot.

pub mod agents;
pub mod comms;
pub mod memory;
