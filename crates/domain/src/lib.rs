pub mod config;
pub mod error;
pub mod identity;
pub mod message;
pub mod model;
pub mod request;
pub mod trace;
