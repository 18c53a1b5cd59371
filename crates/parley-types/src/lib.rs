//! Shared data and wire types for the parley server crates.

pub mod api;
pub mod events;
pub mod models;
