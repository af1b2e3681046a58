//! Interactive demo: type a wake phrase on stdin, then talk to the microphone.
//!
//! The pipeline is an echo stand-in for real speech services, so the reply
//! describes what was heard and a short chime is played back.

use async_trait::async_trait;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;
use turnvox::scheduler::ProactiveScheduler;
use turnvox::{
    AudioBuffer, CaptureSession, CpalMicrophone, CpalPlayback, DialogueStateMachine,
    MicrophoneBackend, RuntimeEvent, TurnLock, TurnPipeline, VoiceConfig, VoiceCoordinator,
    WakeEvent,
};

struct EchoPipeline {
    sample_rate: u32,
}

#[async_trait]
impl TurnPipeline for EchoPipeline {
    async fn transcribe(&self, audio: AudioBuffer) -> turnvox::Result<String> {
        Ok(format!(
            "{:.1} seconds of speech",
            audio.duration().as_secs_f32()
        ))
    }

    async fn converse(&self, text: &str) -> turnvox::Result<String> {
        Ok(format!("I heard {text}."))
    }

    async fn synthesize(&self, _text: &str) -> turnvox::Result<Option<AudioBuffer>> {
        Ok(Some(chime(self.sample_rate)))
    }
}

/// 250ms at 660Hz with a linear fade-out.
fn chime(sample_rate: u32) -> AudioBuffer {
    let len = sample_rate as usize / 4;
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let fade = 1.0 - i as f32 / len as f32;
            ((2.0 * PI * 660.0 * t).sin() * fade * 0.3 * f32::from(i16::MAX)) as i16
        })
        .collect();
    AudioBuffer::new(samples, sample_rate)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turnvox=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut list_only = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("usage: turnvox-demo [--config <path>] [devices]"))?;
                config_path = Some(PathBuf::from(path));
            }
            "devices" => list_only = true,
            other => anyhow::bail!("unknown argument '{other}'"),
        }
    }

    if list_only {
        return list_devices();
    }

    let mut config = match config_path {
        Some(path) => VoiceConfig::from_file(&path)?,
        None => {
            let path = VoiceConfig::default_config_path();
            if path.exists() {
                VoiceConfig::from_file(&path)?
            } else {
                VoiceConfig::default()
            }
        }
    };

    if config.proactive.state_path.is_none() {
        config.proactive.state_path = ProactiveScheduler::default_state_path();
    }

    println!("turnvox v{}", env!("CARGO_PKG_VERSION"));

    let capture = CaptureSession::new(
        Box::new(CpalMicrophone::new()),
        &config.audio,
        config.endpointer.window_size,
    );
    let (runtime_tx, mut runtime_rx) = broadcast::channel(64);
    let machine = DialogueStateMachine::new(
        &config,
        capture,
        TurnLock::new(),
        Arc::new(EchoPipeline {
            sample_rate: config.audio.sample_rate,
        }),
        Arc::new(CpalPlayback::new(&config.audio)),
    )
    .with_runtime_events(runtime_tx);

    let (wake_tx, wake_rx) = mpsc::channel(8);
    let coordinator = VoiceCoordinator::new(config, machine, wake_rx)?;
    let cancel = coordinator.cancel_token();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    tokio::spawn(async move {
        loop {
            match runtime_rx.recv().await {
                Ok(RuntimeEvent::Transcription { text }) => println!("[you] {text}"),
                Ok(RuntimeEvent::SessionRemaining { secs }) => eprintln!("({secs}s left)"),
                Ok(RuntimeEvent::TurnError { message }) => eprintln!("[error] {message}"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let stdin_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line == "quit" {
                stdin_cancel.cancel();
                break;
            }
            if wake_tx.send(WakeEvent::new(line)).await.is_err() {
                break;
            }
        }
    });

    println!("\nType a wake phrase and press Enter, then speak. Type 'quit' to exit.\n");
    coordinator.run().await;
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalMicrophone::new().list_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}
