//! EmbyPulse: library-event aggregation and multi-channel notifications for Emby.
//!
//! Webhooks are decoded by [`webhook`], library events are batched and grouped by
//! [`library`], and [`notification`] renders and delivers the result. [`service`] wires
//! everything together and owns the background tasks.

pub mod bot;
pub mod config;
pub mod domain;
pub mod emby;
pub mod error;
pub mod library;
pub mod logging;
pub mod notification;
pub mod playback;
pub mod service;
pub mod stats;
pub mod utils;
pub mod webhook;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
