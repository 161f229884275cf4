//! Helpers shared by tool adapters

pub mod binary;
pub mod command;
pub mod matlab;
pub mod npy;
pub mod phy;
pub mod template;
