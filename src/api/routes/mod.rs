//! API route modules.

pub mod meetings;
pub mod webhooks;
