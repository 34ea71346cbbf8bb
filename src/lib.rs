//! Staged editing for SQLite files.
//!
//! Edits land on a disposable preview copy of the database, are checked for
//! referential integrity there, and reach the real file only on commit.

pub mod config;
pub mod db;
pub mod import;
pub mod router;
pub mod session;
pub mod staging;
pub mod types;
pub mod worker;

pub use config::Config;
pub use db::{Handle, Result, StageError};
pub use router::{Request, Response, Router};
pub use session::{ConnectionManager, Session};
pub use worker::Worker;
