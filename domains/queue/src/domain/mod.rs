//! Queue domain types

pub mod entities;
pub mod state;
