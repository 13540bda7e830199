//! Domain layer for embypulse.
//!
//! Records handed over by the webhook ingress and the value objects shared by the
//! configuration and the pipeline.

pub mod media;
pub mod playback;
pub mod value_objects;

pub use media::{ImageKind, ItemKind, RawLibraryEvent};
pub use playback::{PlaybackAction, PlaybackEvent, PlaybackItem};
pub use value_objects::*;
