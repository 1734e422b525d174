//! # Custodia
//!
//! Credential custody and access authorization for an OAuth2 authorization
//! server.
//!
//! - [`store`] keeps authorization codes, access tokens and refresh tokens.
//!   Each identifier can be revoked on its own without deleting the row.
//! - [`gc`] periodically deletes rows that are expired or fully revoked.
//! - [`directory`] reads client registrations and user accounts.
//! - [`authz`] admits callers: admins always, other users only from an address
//!   bound to one of their clients, with an optional TOTP second factor at login.
//! - [`api`] exposes login, identity, client listing and QR enrollment over HTTP.

pub mod api;
pub mod authz;
pub mod cli;
pub mod clock;
pub mod directory;
pub mod error;
pub mod gc;
pub mod session;
pub mod store;
pub mod totp;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
