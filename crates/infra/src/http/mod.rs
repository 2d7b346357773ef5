//! HTTP client shared by the provider adapters

/// Retrying reqwest wrapper.
pub mod client;

pub use client::{HttpClient, HttpClientBuilder};
