//! Container plumbing shared by the database-backed integration tests.

pub mod postgres;
pub mod runtime;
