//! sw-sql - SQL script layer for Stepwise
//!
//! This crate splits migration scripts into individual statements and routes
//! each statement to the transactional or non-transactional list using a
//! platform-supplied rule.

pub mod splitter;

pub use splitter::{split, split_classified, SplitScript};
