//! Command runners and the application error boundary.

pub mod commands;
pub mod error;
