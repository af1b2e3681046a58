//! Reply delivery: audio playback via cpal plus text display.

use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};
use crate::pipeline::messages::AudioBuffer;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Where replies go.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Play `audio`. Resolves once playback has finished.
    async fn play(&self, audio: AudioBuffer) -> Result<()>;

    /// Show text to the user. Must not block.
    fn display_text(&self, text: &str);
}

/// Playback to the system speakers via cpal; text goes to stdout.
pub struct CpalPlayback {
    output_device: Option<String>,
}

impl CpalPlayback {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            output_device: config.output_device.clone(),
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| VoiceError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl PlaybackSink for CpalPlayback {
    async fn play(&self, audio: AudioBuffer) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }
        let device = self.output_device.clone();
        tokio::task::spawn_blocking(move || play_blocking(device.as_deref(), &audio))
            .await
            .map_err(|e| VoiceError::Audio(format!("playback task failed: {e}")))?
    }

    fn display_text(&self, text: &str) {
        println!("[assistant] {text}");
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

fn play_blocking(device_name: Option<&str>, audio: &AudioBuffer) -> Result<()> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.output_devices()
            .map_err(|e| VoiceError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| VoiceError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| VoiceError::Audio("no default output device".into()))?
    };

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: audio.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples: audio.to_f32(),
        position: 0,
        finished: false,
    }));
    let buffer_clone = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer_clone.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };

                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| VoiceError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| VoiceError::Audio(format!("failed to start output stream: {e}")))?;

    info!("playing {}ms of reply audio", audio.duration().as_millis());

    loop {
        std::thread::sleep(Duration::from_millis(10));
        let buf = buffer
            .lock()
            .map_err(|e| VoiceError::Audio(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}
