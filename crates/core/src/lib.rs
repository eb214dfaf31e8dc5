//! Winback Core - Shared types library.
//!
//! This crate provides common types used across all Winback components:
//! - `engine` - Cart abandonment lifecycle and reminder dispatch service
//! - `cli` - Command-line tools for migrations and management
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, emails, session keys,
//!   currencies, lifecycle states, and reminder tiers

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
