//! Domain layer types and invariants.

pub mod activity;
pub mod entities;
pub mod error;
pub mod mentions;
pub mod threads;
pub mod types;
pub mod users;
