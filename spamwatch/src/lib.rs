//! spamwatch library crate.
//!
//! Watches company phone numbers for spam labels on caller-ID services, by simulating
//! calls on device gateways and by querying detection APIs, and hands out clean numbers.

pub mod allocator;
pub mod api_check;
pub mod checker;
pub mod config;
pub mod database;
pub mod device;
pub mod domain;
pub mod error;
pub mod http;
pub mod logging;
pub mod notification;
pub mod resource;
pub mod scheduler;
pub mod services;

pub use error::{Error, Result};
