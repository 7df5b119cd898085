//! Test infrastructure for the cohort crate.
//!
//! Request builders live in [`fixtures`]; scripted collaborators that count
//! their invocations live in [`mocks`].

#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
