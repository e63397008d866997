pub mod channel;
pub mod config;
pub mod messages;
pub mod router;
pub mod runtime;
