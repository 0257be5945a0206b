//! Database module: view models and SQL repositories for the local store.
//!
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions over posts, post metadata and options.
//!
//! External modules import from `pcc_sync::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::MappedPost;
