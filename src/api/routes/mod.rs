//! API routes
//!
//! Route handlers organized by functionality.

pub mod analysis;
pub mod cache;
pub mod collection;
pub mod health;
pub mod metrics;
