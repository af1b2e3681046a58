//! Scheduler and dialogue sharing the turn lock.

use crate::helpers::{engine, fast_config};
use chrono::{NaiveDate, NaiveDateTime};
use turnvox::config::{ProactiveConfig, ReminderConfig};
use turnvox::scheduler::ProactiveScheduler;
use turnvox::testing::MockPipeline;
use turnvox::{DialogueState, TurnOwner};

fn at(hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 6, 1)
        .unwrap()
        .and_hms_opt(hh, mm, ss)
        .unwrap()
}

fn scheduler(lock: turnvox::TurnLock) -> ProactiveScheduler {
    let config = ProactiveConfig {
        reminders: vec![ReminderConfig {
            id: None,
            content: "call the plumber".into(),
            hour: 9,
            minute: 30,
            repeat_daily: true,
            enabled: true,
        }],
        ..ProactiveConfig::default()
    };
    ProactiveScheduler::from_config(&config, lock).unwrap()
}

#[tokio::test]
async fn user_session_defers_a_due_reminder() {
    let mut e = engine(&fast_config(), MockPipeline::new());
    let mut scheduler = scheduler(e.lock.clone());

    assert!(e.machine.handle_wake("hey turnvox", e.at(0)));
    e.tick(20);
    assert!(scheduler.tick(at(9, 30, 0)).is_none());
    assert_eq!(e.lock.holder(), Some(TurnOwner::User));

    e.machine.shutdown();
    let turn = scheduler.tick(at(9, 30, 30)).expect("fires once the user is done");
    assert_eq!(turn.trigger_id, "reminder_0930_call_the_plumber");
    assert!(turn.prompt.contains("call the plumber"));

    e.machine.begin_proactive_turn(turn, e.at(1_000)).unwrap();
    e.settle(1_020, DialogueState::Idle).await;
    assert!(!e.lock.is_held());
    assert!(scheduler.tick(at(9, 30, 50)).is_none(), "already fired today");
}

#[tokio::test]
async fn proactive_turn_blocks_wake_until_it_finishes() {
    let mut e = engine(&fast_config(), MockPipeline::new());
    let mut scheduler = scheduler(e.lock.clone());

    let turn = scheduler.tick(at(8, 0, 0)).expect("morning greeting");
    e.machine.begin_proactive_turn(turn, e.at(0)).unwrap();
    assert_eq!(e.machine.state(), DialogueState::Processing);

    assert!(!e.machine.handle_wake("hey turnvox", e.at(10)));

    e.settle(20, DialogueState::Idle).await;
    assert_eq!(e.pipeline.transcribe_calls(), 0);
    assert_eq!(e.playback.played(), 1);
    assert_eq!(e.mic.opens(), 0, "proactive turns never open the microphone");

    assert!(e.machine.handle_wake("hey turnvox", e.at(100)));
    assert_eq!(e.lock.holder(), Some(TurnOwner::User));
}

#[tokio::test]
async fn failed_proactive_turn_still_releases_the_lock() {
    let mut e = engine(&fast_config(), MockPipeline::new().failing_converse());
    let mut scheduler = scheduler(e.lock.clone());

    let turn = scheduler.tick(at(20, 0, 5)).expect("evening greeting");
    e.machine.begin_proactive_turn(turn, e.at(0)).unwrap();
    e.settle(20, DialogueState::Idle).await;

    assert!(!e.lock.is_held());
    assert_eq!(e.playback.played(), 0);
    assert_eq!(e.playback.displayed().len(), 1);
}
