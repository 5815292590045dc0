//! Core logic — recipes, planning, execution, state, activation.

pub mod activate;
pub mod cancel;
pub mod config;
pub mod download;
pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod recipe;
pub mod resolver;
pub mod state;
pub mod sysdeps;
pub mod target;
pub mod types;
pub mod version;
pub mod version_cache;
