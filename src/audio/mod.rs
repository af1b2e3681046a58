//! Microphone capture and reply playback via cpal.

pub mod capture;
pub mod playback;
