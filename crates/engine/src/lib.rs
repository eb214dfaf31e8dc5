//! Winback Engine library.
//!
//! This crate provides the cart recovery engine as a library, allowing it
//! to be tested and reused. The engine observes cart activity, classifies
//! each cart's lifecycle state from elapsed inactivity, and drives a
//! scheduled, idempotent sequence of recovery reminders.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
