//! Integration tests for the pipeline lifecycle
//!
//! These tests validate:
//! - Build failures and the unusable-until-rebuilt state
//! - Fire-and-forget state changes and reconciliation
//! - End of stream injection and callback replacement

mod common;

use common::builders::VideoChainBuilder;
use common::{controller, play_and_wait, test_timeout, wait_until, EventRecorder};
use frameport::{BusMessage, FrameportError, PipelineController, PipelineState};
use std::time::Duration;

#[test]
fn test_bad_element_is_graph_error() {
    let mut player = PipelineController::default();
    let err = player.build_pipeline("bad-element ! sink").unwrap_err();
    assert!(matches!(err, FrameportError::Graph(_)));
    assert_eq!(player.state(), PipelineState::Null);

    player.set_state(PipelineState::Playing);
    for _ in 0..20 {
        assert!(player.get_frame().is_none());
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(player.state(), PipelineState::Null);
}

#[test]
fn test_play_then_null_releases_everything() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(64, 48).sync(true).build())
        .unwrap();
    let recorder = EventRecorder::new();
    player
        .register_sink_callback("sink", recorder.callback())
        .unwrap();

    player.set_state(PipelineState::Playing);
    player.set_state(PipelineState::Null);
    player
        .wait_for_state(PipelineState::Null, test_timeout())
        .unwrap();

    let settled = recorder.len();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(recorder.len(), settled);
    assert_eq!(player.state(), PipelineState::Null);
    assert!(player.get_frame().is_none());
}

#[test]
fn test_reregistration_replaces_callback() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(8, 8).num_buffers(3).build())
        .unwrap();
    let first = EventRecorder::new();
    let second = EventRecorder::new();
    player.register_sink_callback("sink", first.callback()).unwrap();
    player.register_sink_callback("sink", second.callback()).unwrap();

    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || second.has_eos()));
    assert_eq!(first.len(), 0);
    assert_eq!(second.count("new-sample"), 3);
}

#[test]
fn test_send_end_of_stream() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(16, 16).sync(true).build())
        .unwrap();
    let recorder = EventRecorder::new();
    player
        .register_sink_callback("sink", recorder.callback())
        .unwrap();

    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || recorder.count("new-sample") >= 2));
    player.send_end_of_stream();
    assert!(wait_until(test_timeout(), || recorder.has_eos()));

    let after_eos = recorder.len();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(recorder.len(), after_eos);
    assert_eq!(recorder.count("eos"), 1);
    assert_eq!(recorder.names().last(), Some(&"eos"));
    assert!(wait_until(test_timeout(), || player
        .drain_bus()
        .contains(&BusMessage::Eos)));
    assert_eq!(player.state(), PipelineState::Playing);
}

#[test]
fn test_eos_is_terminal_across_restarts() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(8, 8).num_buffers(2).build())
        .unwrap();
    let recorder = EventRecorder::new();
    player
        .register_sink_callback("sink", recorder.callback())
        .unwrap();

    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || recorder.has_eos()));
    let delivered = recorder.len();

    player.set_state(PipelineState::Ready);
    player
        .wait_for_state(PipelineState::Ready, test_timeout())
        .unwrap();
    play_and_wait(&player);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), delivered);

    // A rebuild starts every sink afresh
    player.set_state(PipelineState::Null);
    player
        .wait_for_state(PipelineState::Null, test_timeout())
        .unwrap();
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(8, 8).num_buffers(2).build())
        .unwrap();
    let fresh = EventRecorder::new();
    player.register_sink_callback("sink", fresh.callback()).unwrap();
    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || fresh.has_eos()));
    assert_eq!(fresh.count("setup"), 1);
}

#[test]
fn test_state_changes_on_bus() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(8, 8).build())
        .unwrap();
    play_and_wait(&player);
    player.set_state(PipelineState::Paused);
    player
        .wait_for_state(PipelineState::Paused, test_timeout())
        .unwrap();
    let snapshot = player.state_snapshot();
    assert_eq!(snapshot.current, PipelineState::Paused);
    assert!(snapshot.is_settled());

    let changes: Vec<_> = player
        .drain_bus()
        .into_iter()
        .filter_map(|msg| match msg {
            BusMessage::StateChanged { old, new, .. } => Some((old, new)),
            _ => None,
        })
        .collect();
    use PipelineState::*;
    assert_eq!(
        changes,
        vec![(Null, Ready), (Ready, Paused), (Paused, Playing), (Playing, Paused)]
    );
}

#[test]
fn test_negotiation_failure_keeps_ready() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline("videotestsrc ! capsfilter name=f ! appsink name=sink")
        .unwrap();
    player.set_property("f", "caps", "video/x-raw,format=I420").unwrap();
    player.set_property("sink", "caps", "video/x-raw,format=RGBA").unwrap();
    player.set_state(PipelineState::Playing);
    assert!(wait_until(test_timeout(), || {
        let snapshot = player.state_snapshot();
        snapshot.is_settled() && snapshot.current == PipelineState::Ready
    }));
    assert!(player
        .drain_bus()
        .iter()
        .any(|msg| matches!(msg, BusMessage::Error { .. })));
}

#[test]
fn test_property_errors_while_streaming() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(8, 8).filter_name("f").build())
        .unwrap();
    play_and_wait(&player);
    assert!(matches!(
        player.set_property("sink", "bogus", "1"),
        Err(FrameportError::Property(_))
    ));
    assert!(matches!(
        player.set_property("sink", "last-sample", "1"),
        Err(FrameportError::Property(_))
    ));
    assert!(matches!(
        player.set_property("nope", "sync", "true"),
        Err(FrameportError::ElementNotFound(_))
    ));
    player.set_property("sink", "sync", "true").unwrap();
    assert_eq!(player.property("sink", "sync").unwrap(), "true");
    assert_eq!(player.state(), PipelineState::Playing);
}
