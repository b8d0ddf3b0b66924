//! Test helpers module
//!
//! Shared infrastructure for the integration tests: a throwaway Postgres
//! store, in-memory fakes for the VPN panel and the outcome sink, and seed
//! data builders.

#![allow(dead_code)]

pub mod database_helper;
pub mod fakes;
pub mod test_context;
pub mod test_data;

pub use database_helper::*;
pub use fakes::*;
pub use test_context::*;
pub use test_data::*;
