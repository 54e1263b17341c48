//! mail-rules: declarative rule processing for stored email.

pub mod config;
pub mod error;
pub mod rules;
pub mod store;
