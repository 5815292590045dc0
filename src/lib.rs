//! Ferrule — developer tool and version manager.
//!
//! Recipes compile into deterministic installation plans, plans apply into
//! versioned directories, and one version per tool is activated on PATH.

pub mod actions;
pub mod cli;
pub mod core;
pub mod transport;
pub mod tripwire;
