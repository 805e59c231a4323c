//! nomad-event-notifier library crate.
//!
//! Subscribes to the Nomad event stream, filters and classifies events and
//! delivers human-readable notifications to Slack or a generic webhook.

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod notification;
pub mod retry;
pub mod shutdown;
pub mod stream;
pub mod utils;

pub use error::{Error, Result};
