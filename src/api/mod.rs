//! API Module
//!
//! This module handles the HTTP API for receiving user transactions.
//! It provides the endpoint that clients use to submit transactions, plus
//! read-only status and block lookups.

mod server;


pub use server::{ApiError, Server, router};
