//! Shared test helpers for `mailpilot-core` integration tests.
//!
//! In-memory ports plus a [`fixtures::Harness`] wiring every service the
//! way the server does, on a manual clock.

#![allow(dead_code)]

pub mod fixtures;
pub mod providers;
pub mod repositories;
