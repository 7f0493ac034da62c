//! Validation Module
//!
//! Checks transactions against the pending state of an open batch:
//! time window, replay nonces, spent inputs and colliding outputs.

mod validator;
pub use validator::Validator;
