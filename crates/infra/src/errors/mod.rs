//! Infrastructure error conversions

mod conversions;

pub use conversions::{status_to_provider_error, InfraError};
