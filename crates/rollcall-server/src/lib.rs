//! # rollcall-server
//!
//! HTTP server library for the rollcall attendance tracking system.
//!
//! This library provides the API handlers and state management for rollcall.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
