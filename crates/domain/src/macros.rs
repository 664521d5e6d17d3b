//! Macro for implementing string conversions on domain enums
//!
//! Priorities, alert levels and event statuses all travel as lowercase
//! strings (config files, store payloads, operator tooling). This macro
//! generates `as_str`, `Display` and case-insensitive `FromStr` from one
//! variant table.
//!
//! # Example
//!
//! ```rust
//! use keel_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum DeliveryState {
//!     Queued,
//!     Sent,
//! }
//!
//! impl_domain_status_conversions!(DeliveryState {
//!     Queued => "queued",
//!     Sent => "sent",
//! });
//!
//! assert_eq!(DeliveryState::Sent.as_str(), "sent");
//! assert_eq!("QUEUED".parse::<DeliveryState>().unwrap(), DeliveryState::Queued);
//! ```

/// Implements `as_str`, `Display` and `FromStr` for status-like enums
///
/// Parsing is case-insensitive and surrounding whitespace is ignored.
/// Unknown input yields [`KeelError::InvalidInput`](crate::KeelError).
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable lowercase name
            pub const fn as_str(self) -> &'static str {
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
            type Err = $crate::errors::KeelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err($crate::errors::KeelError::InvalidInput(format!(
                        "Invalid {}: {}",
                        stringify!($enum_name),
                        s
                    ))),
                }
            }
        }
    };
}
