//! Display/FromStr generation for persisted status enums
//!
//! Status enums are stored as lowercase text in SQLite and echoed in logs and
//! admin responses, so they share one string mapping.
//!
//! # Example
//!
//! ```rust
//! use mailpilot_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum LeaseState {
//!     Held,
//!     Released,
//! }
//!
//! impl_domain_status_conversions!(LeaseState {
//!     Held => "held",
//!     Released => "released",
//! });
//!
//! assert_eq!(LeaseState::Held.to_string(), "held");
//! assert_eq!("RELEASED".parse::<LeaseState>(), Ok(LeaseState::Released));
//! ```

/// Implements `Display` and case-insensitive `FromStr` for a status enum.
///
/// Parsing failures return `Err(String)` naming the enum and the rejected
/// input.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable storage representation.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
