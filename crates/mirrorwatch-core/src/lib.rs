//! Core types for mirrorwatch.
//!
//! This crate provides the identity type shared by every other crate:
//!
//! - **Identifiers**: [`EndpointHash`], a stable 32-byte identity derived from a
//!   device's tenant and hardware address
//!
//! # Example
//!
//! ```
//! use mirrorwatch_core::EndpointHash;
//!
//! let a = EndpointHash::compute("vlan10", "AA:BB:CC:00:00:01");
//! let b = EndpointHash::compute("vlan10", "aa:bb:cc:00:00:01");
//! assert_eq!(a, b);
//!
//! let parsed = EndpointHash::from_hex(&a.to_hex()).unwrap();
//! assert_eq!(a, parsed);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{normalize_mac, EndpointHash, IdError};
