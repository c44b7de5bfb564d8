//! Synchronisation layer between a reconstruction workspace and the
//! SQLite database shared with the external structure-from-motion tool.

pub mod blob;
pub mod config;
pub mod database;
pub mod services;
