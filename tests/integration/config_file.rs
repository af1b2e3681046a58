//! Loading partial TOML files and building the engine from them.

use turnvox::VoiceConfig;
use turnvox::scheduler::ProactiveScheduler;

#[test]
fn partial_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[dialogue]
session_timeout_secs = 20
wake_phrases = ["computer"]

[[proactive.reminders]]
content = "stand up"
hour = 15
minute = 0
"#,
    )
    .unwrap();

    let config = VoiceConfig::from_file(&path).unwrap();
    assert_eq!(config.dialogue.session_timeout_secs, 20);
    assert!(config.dialogue.continuous_dialogue);
    assert_eq!(config.audio.sample_rate, 16_000);
    assert_eq!(config.endpointer.recording_silence_limit_ms, 2_000);

    let reminder = &config.proactive.reminders[0];
    assert!(reminder.repeat_daily);
    assert!(reminder.enabled);

    let scheduler = ProactiveScheduler::from_config(&config.proactive, turnvox::TurnLock::new())
        .unwrap();
    assert_eq!(scheduler.registry().len(), 3);
}

#[test]
fn malformed_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[dialogue\nsession_timeout_secs = ").unwrap();

    let err = VoiceConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, turnvox::VoiceError::Config(_)));
}

#[test]
fn out_of_range_reminder_time_is_rejected() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[[proactive.reminders]]\ncontent = \"x\"\nhour = 24\nminute = 0\n",
    )
    .unwrap();

    let config = VoiceConfig::from_file(&path).unwrap();
    assert!(ProactiveScheduler::from_config(&config.proactive, turnvox::TurnLock::new()).is_err());
}
