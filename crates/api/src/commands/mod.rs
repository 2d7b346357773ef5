//! HTTP route groups

pub mod admin;
pub mod health;
pub mod sweeps;
pub mod webhook;
