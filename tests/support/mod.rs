//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod fake_github;
pub mod socket_guard;
