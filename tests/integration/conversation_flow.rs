//! User-initiated dialogue from wake to idle.

use crate::helpers::{engine, fast_config};
use turnvox::runtime::{RuntimeEvent, SessionEndReason};
use turnvox::testing::MockPipeline;
use turnvox::{DialogueState, TurnOwner};

#[tokio::test]
async fn continuous_dialogue_keeps_the_session_across_turns() {
    let mut e = engine(
        &fast_config(),
        MockPipeline::new().with_transcript("turn on the lights"),
    );
    assert!(e.machine.handle_wake("hey turnvox", e.at(0)));
    e.tick(20);

    e.utterance(500, 3_200);
    e.settle(800, DialogueState::Listening).await;
    assert_eq!(e.lock.holder(), Some(TurnOwner::User));

    e.utterance(2_000, 8_000);
    e.settle(2_300, DialogueState::Listening).await;

    assert_eq!(e.pipeline.transcribe_calls(), 2);
    assert_eq!(e.pipeline.transcribed_lengths(), vec![7_200, 12_000]);
    assert_eq!(e.playback.played(), 2);
    assert_eq!(e.mic.opens(), 3);
    assert_eq!(e.mic.open_streams(), 1);

    // Quiet room: the session lapses and everything is handed back.
    e.tick(13_000);
    assert_eq!(e.machine.state(), DialogueState::Idle);
    assert!(!e.lock.is_held());
    assert_eq!(e.mic.open_streams(), 0);

    let events = e.drain_events();
    let heard: Vec<&str> = events
        .iter()
        .filter_map(|evt| match evt {
            RuntimeEvent::Transcription { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(heard, vec!["turn on the lights", "turn on the lights"]);
    assert!(matches!(
        events.last(),
        Some(RuntimeEvent::StateChanged {
            to: DialogueState::Idle,
            ..
        })
    ));
    assert!(events.iter().any(|evt| matches!(
        evt,
        RuntimeEvent::SessionEnded {
            reason: SessionEndReason::Timeout,
            ..
        }
    )));
}

#[tokio::test]
async fn a_new_wake_after_idle_starts_a_fresh_session() {
    let mut config = fast_config();
    config.dialogue.continuous_dialogue = false;
    let mut e = engine(&config, MockPipeline::new());

    assert!(e.machine.handle_wake("hey turnvox", e.at(0)));
    e.tick(20);
    e.utterance(200, 1_600);
    e.settle(500, DialogueState::Idle).await;
    assert!(!e.lock.is_held());

    assert!(e.machine.handle_wake("hey turnvox", e.at(1_000)));
    assert_eq!(e.machine.session().unwrap().started_at, e.at(1_000));
    e.tick(1_020);
    assert_eq!(e.machine.state(), DialogueState::Listening);
}

#[tokio::test]
async fn text_only_replies_skip_playback() {
    let mut config = fast_config();
    config.dialogue.voice_replies = false;
    let mut e = engine(&config, MockPipeline::new().with_transcript("hi"));

    e.machine.handle_wake("hey turnvox", e.at(0));
    e.tick(20);
    e.utterance(200, 1_600);
    e.settle(500, DialogueState::Listening).await;

    assert_eq!(e.pipeline.synthesize_calls(), 0);
    assert_eq!(e.playback.played(), 0);
    assert_eq!(e.playback.displayed(), vec!["reply to: hi".to_owned()]);
}
