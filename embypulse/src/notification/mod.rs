//! Notification rendering and delivery.
//!
//! A [`NotificationUnit`] is the channel-neutral description of one message. The
//! [`Dispatcher`] renders it per channel style and delivers to every enabled channel.

pub mod channels;
pub mod dispatcher;
pub mod render;
pub mod token;
pub mod unit;

pub use channels::{ChannelConfig, NotificationChannel};
pub use dispatcher::{DeliveryResult, Dispatcher, PosterResolver};
pub use render::{ChannelMessage, MessageBody, RenderStyle, render};
pub use unit::{NotificationUnit, PosterRef, UnitField, UnitKind};
