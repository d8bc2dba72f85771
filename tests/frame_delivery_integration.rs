//! Integration tests for frame delivery
//!
//! These tests validate both read paths end to end:
//! - Push delivery through sink callbacks
//! - Poll delivery through the frame slot
//! - Owned frames built from sink events

mod common;

use common::builders::VideoChainBuilder;
use common::{controller, play_and_wait, test_timeout, wait_until, EventRecorder};
use frameport::{frame_callback, MediaInfo, OwnedFrame, PipelineState, SinkEvent, VideoFormat};
use std::sync::{Arc, Mutex};

const I420_640X480: usize = 640 * 480 * 3 / 2;

#[test]
fn test_i420_round_trip() {
    let mut player = controller(1920 * 1080 * 4, true);
    player
        .build_pipeline(
            &VideoChainBuilder::new("sink")
                .size(640, 480)
                .format("I420")
                .num_buffers(5)
                .build(),
        )
        .unwrap();
    let recorder = EventRecorder::new();
    player
        .register_sink_callback("sink", recorder.callback())
        .unwrap();

    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || recorder.has_eos()));

    assert_eq!(
        recorder.names(),
        vec!["setup", "new-preroll", "new-sample", "new-sample", "new-sample", "new-sample", "new-sample", "eos"]
    );
    let events = recorder.events();
    match &events[0] {
        SinkEvent::Setup(MediaInfo::Video(info)) => {
            assert_eq!((info.width, info.height), (640, 480));
            assert_eq!(info.pixel_format, VideoFormat::I420);
            assert_eq!(info.pixel_format.as_str(), "I420");
        }
        other => panic!("expected video setup, got {:?}", other),
    }
    for event in &events[1..7] {
        match event {
            SinkEvent::NewPreroll(data) | SinkEvent::NewSample(data) => {
                assert_eq!(data.len(), I420_640X480)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    // Poll path sees the latest frame once
    let frame = player.get_frame().unwrap();
    assert_eq!(frame.sequence, 5);
    assert_eq!(frame.size_bytes, I420_640X480);
    assert_eq!((frame.width, frame.height), (640, 480));
    assert_eq!(frame.data.len(), I420_640X480);
    assert!(player.get_frame().is_none());
}

#[test]
fn test_consecutive_polls_without_production() {
    let mut player = controller(1024 * 1024, false);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(64, 64).num_buffers(1).build())
        .unwrap();
    let recorder = EventRecorder::new();
    player
        .register_sink_callback("sink", recorder.callback())
        .unwrap();
    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || recorder.has_eos()));

    let first = player.get_frame().map(|frame| frame.detach());
    assert_eq!(first.map(|f| f.sequence), Some(1));
    for _ in 0..10 {
        assert!(player.get_frame().is_none());
    }
}

#[test]
fn test_polled_frames_match_rendered_samples() {
    let mut player = controller(1024 * 1024, false);
    player
        .build_pipeline(
            &VideoChainBuilder::new("sink")
                .size(32, 32)
                .format("GRAY8")
                .pattern("snow")
                .num_buffers(30)
                .sync(true)
                .build(),
        )
        .unwrap();
    let recorder = EventRecorder::new();
    player
        .register_sink_callback("sink", recorder.callback())
        .unwrap();
    play_and_wait(&player);

    let mut polled = Vec::new();
    assert!(wait_until(test_timeout(), || {
        if let Some(frame) = player.get_frame() {
            polled.push(frame.detach());
        }
        recorder.has_eos()
    }));
    if let Some(frame) = player.get_frame() {
        polled.push(frame.detach());
    }

    let samples: Vec<Vec<u8>> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SinkEvent::NewSample(data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(samples.len(), 30);
    assert!(!polled.is_empty());
    let mut last_sequence = 0;
    for frame in &polled {
        assert!(frame.sequence > last_sequence);
        last_sequence = frame.sequence;
        assert_eq!(frame.size_bytes, 32 * 32);
        // every polled frame is exactly one rendered buffer, never a mix
        assert_eq!(frame.data, samples[(frame.sequence - 1) as usize]);
    }
    assert_eq!(last_sequence, 30);
}

#[test]
fn test_shared_memory_info_tracks_resize_without_polling() {
    let mut player = controller(16, true);
    player
        .build_pipeline(
            &VideoChainBuilder::new("sink")
                .size(640, 480)
                .format("I420")
                .num_buffers(2)
                .build(),
        )
        .unwrap();
    let base = player.get_shared_memory_info();
    assert_eq!(base.size_bytes, 16);
    let recorder = EventRecorder::new();
    player
        .register_sink_callback("sink", recorder.callback())
        .unwrap();

    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || recorder.has_eos()));
    let info = player.get_shared_memory_info();
    assert_eq!(info.name, base.name);
    assert_eq!(info.size_bytes, I420_640X480);

    player.set_state(PipelineState::Null);
    player
        .wait_for_state(PipelineState::Null, test_timeout())
        .unwrap();
    assert_eq!(player.get_shared_memory_info(), base);
}

#[test]
fn test_push_path_delivers_owned_frames() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(
            &VideoChainBuilder::new("sink")
                .size(16, 8)
                .format("RGBA")
                .pattern("white")
                .num_buffers(4)
                .build(),
        )
        .unwrap();

    let frames: Arc<Mutex<Vec<OwnedFrame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    player
        .register_sink_callback(
            "sink",
            frame_callback(move |frame| {
                sink.lock().unwrap().push(frame);
                Ok(())
            }),
        )
        .unwrap();
    play_and_wait(&player);
    assert!(wait_until(test_timeout(), || frames.lock().unwrap().len() == 4));

    let frames = frames.lock().unwrap();
    let sequences: Vec<_> = frames.iter().map(|f| f.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    for frame in frames.iter() {
        assert_eq!(frame.pixel_format, VideoFormat::Rgba);
        assert_eq!(frame.size_bytes, 16 * 8 * 4);
        assert!(frame.data.iter().all(|&b| b == 0xff));
    }
}

#[test]
fn test_channel_handoff() {
    let mut player = controller(1024 * 1024, true);
    player
        .build_pipeline(&VideoChainBuilder::new("sink").size(8, 8).num_buffers(3).build())
        .unwrap();
    let rx = player.register_sink_channel("sink").unwrap();
    play_and_wait(&player);

    let mut names = Vec::new();
    while let Ok(event) = rx.recv_timeout(test_timeout()) {
        names.push(event.name());
        if matches!(event, SinkEvent::Eos) {
            break;
        }
    }
    assert_eq!(
        names,
        vec!["setup", "new-preroll", "new-sample", "new-sample", "new-sample", "eos"]
    );
    player.set_state(PipelineState::Null);
    player
        .wait_for_state(PipelineState::Null, test_timeout())
        .unwrap();
    assert!(player.get_frame().is_none());
}
