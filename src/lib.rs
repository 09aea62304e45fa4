//! dumpwarden - scheduled, encrypted MySQL/MariaDB backups.
//!
//! A cycle dumps the database, encrypts the dump into a password-protected
//! zip, optionally uploads it to Telegram and applies retention. A separate
//! trimmer keeps a shared log directory under a byte cap.

pub mod archive;
pub mod artifact;
pub mod backup;
pub mod build_info;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fsutil;
pub mod history;
pub mod log_trim;
pub mod process;
pub mod retention;
pub mod scheduler;
pub mod snapshot;
