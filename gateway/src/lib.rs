//! `paychan-gateway`: the HTTP transport layer over `paychan-core`.
//!
//! Exposed as a library so both the receiver-side server binary
//! (`src/main.rs`) and the sender-side buyer binary (`src/bin/buyer.rs`) can
//! share the configuration loader, wire types, error mapping, and client
//! facade without duplicating them.

pub mod config;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod model;
