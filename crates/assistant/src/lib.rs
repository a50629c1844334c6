//! Chat assistant for the HSB Accounting & Finance site.
//!
//! The crate owns the conversation shown in the site's chat widget and drives the
//! streaming client from `hsb-llm`; rendering is left to the caller.

#![deny(unsafe_code)]

pub mod chat;
/// Greeting, fallback texts and the system instruction.
pub mod persona;
/// Layered settings loading.
pub mod settings;
pub mod terminal;
