//! Sync PCC articles into a local post store.

pub mod config;
pub mod db;
pub mod model;
pub mod pcc;
pub mod settings;
pub mod sync;
pub mod webhook;
