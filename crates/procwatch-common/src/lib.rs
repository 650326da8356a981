//! Common types and traits for procwatch
//!
//! This crate provides the shared data model, the argv matching engine and
//! the collaborator contracts used across the procwatch agent.

pub mod events;
pub mod platform;
pub mod targets;

pub use events::*;
pub use platform::*;
pub use targets::*;
