//! Command handlers

pub mod config;
pub mod project;
pub mod session;
pub mod status;
pub mod sync;
pub mod task;
