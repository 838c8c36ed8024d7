//! Voiceprint: learns a writer's voice from the edits they make to generated
//! drafts.

pub mod api;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod voice;

pub use error::{Error, Result};
