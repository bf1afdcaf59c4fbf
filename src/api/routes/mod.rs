//! API Routes
//!
//! Route handlers organized by functionality.

pub mod health;
pub mod resource;
pub mod root;
pub mod timescale_config;
pub mod timeserie;
