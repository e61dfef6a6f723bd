//! Speech segmentation integration tests
//!
//! Drives the assembler with synthetic frames; no audio hardware needed

use voxloop::config::VadConfig;
use voxloop::voice::{
    AudioFrame, NoiseFloorEstimator, SegmentAssembler, SegmentEvent, SegmentState, Utterance, VadEngine,
};

mod common;

use common::{Kind, noise_frame, sequence, settings, silent_frame, speech_frame};

/// Feed frames and collect every emitted utterance with the index that closed it
fn run(assembler: &mut SegmentAssembler, frames: Vec<AudioFrame>) -> Vec<(usize, SegmentEvent)> {
    frames
        .into_iter()
        .enumerate()
        .filter_map(|(i, frame)| match assembler.process(frame) {
            event @ (SegmentEvent::Emitted(_) | SegmentEvent::Discarded { .. }) => Some((i, event)),
            _ => None,
        })
        .collect()
}

fn emitted(event: &SegmentEvent) -> &Utterance {
    match event {
        SegmentEvent::Emitted(utterance) => utterance,
        other => panic!("expected an emitted utterance, got {other:?}"),
    }
}

#[test]
fn test_utterance_includes_preroll_and_trims_trailing_silence() {
    let mut assembler = SegmentAssembler::new(&VadConfig::default(), settings(5, 20, 8));
    let frames = sequence(&[(Kind::Silence, 5), (Kind::Speech, 10), (Kind::Silence, 25)]);

    let events = run(&mut assembler, frames);
    assert_eq!(events.len(), 1);

    let (closed_at, event) = &events[0];
    // 21st consecutive silent frame closes the segment
    assert_eq!(*closed_at, 5 + 10 + 20);

    let utterance = emitted(event);
    assert_eq!(utterance.frame_count(), 15);
    assert_eq!(utterance.sample_count(), 15 * 1600);
    assert_eq!(utterance.first_sequence(), Some(0));
    assert_eq!(assembler.state(), SegmentState::Idle);
}

#[test]
fn test_utterance_at_minimum_length_is_kept() {
    let mut assembler = SegmentAssembler::new(&VadConfig::default(), settings(0, 3, 8));
    let frames = sequence(&[(Kind::Speech, 8), (Kind::Silence, 4)]);

    let events = run(&mut assembler, frames);
    assert_eq!(events.len(), 1);
    assert_eq!(emitted(&events[0].1).frame_count(), 8);
}

#[test]
fn test_utterance_below_minimum_length_is_discarded() {
    let mut assembler = SegmentAssembler::new(&VadConfig::default(), settings(0, 3, 8));
    let frames = sequence(&[(Kind::Speech, 7), (Kind::Silence, 4)]);

    let events = run(&mut assembler, frames);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1, SegmentEvent::Discarded { frames: 7 });
    assert_eq!(assembler.state(), SegmentState::Idle);
}

#[test]
fn test_soft_frames_keep_utterance_open_without_resetting_countdown() {
    let mut assembler = SegmentAssembler::new(&VadConfig::default(), settings(0, 3, 1));

    let mut frames: Vec<_> = (0..5).map(speech_frame).collect();
    // Once the onset is learned the floor is about 0.026, so silence ends
    // near 0.064 and speech starts near 0.103
    frames.extend((5..8).map(|seq| noise_frame(seq, 0.08)));
    frames.extend((8..12).map(silent_frame));

    let events = run(&mut assembler, frames);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 11);
    assert_eq!(emitted(&events[0].1).frame_count(), 8);
}

#[test]
fn test_suppression_discards_segment_and_preroll() {
    let mut assembler = SegmentAssembler::new(&VadConfig::default(), settings(5, 2, 1));

    for frame in sequence(&[(Kind::Silence, 4), (Kind::Speech, 3)]) {
        assembler.process(frame);
    }
    assert!(assembler.is_active());

    // Shield raised: segment and pre-roll both go
    assert!(assembler.suppress());
    assert_eq!(assembler.state(), SegmentState::Idle);
    assert!(!assembler.suppress());

    let mut events = Vec::new();
    for seq in 100..102 {
        events.push(assembler.process(silent_frame(seq)));
    }
    for seq in 102..104 {
        events.push(assembler.process(speech_frame(seq)));
    }
    for seq in 104..107 {
        events.push(assembler.process(silent_frame(seq)));
    }

    let utterances: Vec<&Utterance> = events
        .iter()
        .filter_map(|e| match e {
            SegmentEvent::Emitted(u) => Some(u),
            _ => None,
        })
        .collect();
    assert_eq!(utterances.len(), 1);
    // Only audio captured after suppression
    assert_eq!(utterances[0].first_sequence(), Some(100));
    assert_eq!(utterances[0].frame_count(), 4);
}

#[test]
fn test_steady_room_noise_never_opens_a_segment() {
    let mut assembler = SegmentAssembler::new(&VadConfig::default(), settings(5, 20, 8));

    for seq in 0..600 {
        let event = assembler.process(noise_frame(seq, 0.025));
        assert_eq!(event, SegmentEvent::Idle, "frame {seq}");
    }
    assert_eq!(assembler.state(), SegmentState::Idle);

    let floor = assembler.vad().noise_floor();
    assert!((0.022..0.026).contains(&floor), "floor {floor}");

    // A real voice still opens one
    assert_eq!(assembler.process(speech_frame(600)), SegmentEvent::Started);
}

#[test]
fn test_room_tone_before_each_utterance_keeps_floor_low() {
    let mut assembler = SegmentAssembler::new(&VadConfig::default(), settings(2, 3, 4));
    let mut frames = Vec::new();
    for _ in 0..5 {
        frames.extend(sequence(&[(Kind::Room, 4), (Kind::Speech, 6), (Kind::Silence, 5)]));
    }

    let events = run(&mut assembler, frames);
    assert_eq!(events.len(), 5);
    for (_, event) in &events {
        assert_eq!(emitted(event).frame_count(), 8);
    }
}

#[test]
fn test_noise_floor_never_below_minimum() {
    let mut estimator = NoiseFloorEstimator::new(10, 10.0, 0.002, 0.005);
    assert!((estimator.estimate() - 0.005).abs() < 1e-9);

    for i in 0..50_u16 {
        let energy = if i % 3 == 0 { 0.0 } else { 1e-5 * f32::from(i) };
        estimator.update(energy);
        assert!(estimator.estimate() >= estimator.minimum());
    }
    assert!((estimator.estimate() - 0.002).abs() < 1e-9);
}

#[test]
fn test_floor_follows_room_noise() {
    let mut vad = VadEngine::new(&VadConfig::default());

    for seq in 0..150 {
        let decision = vad.classify(&noise_frame(seq, 0.01), true);
        assert!(!decision.is_speech);
    }

    let floor = vad.noise_floor();
    assert!((0.008..0.012).contains(&floor), "floor {floor}");

    // Loud enough for a quiet room, not for this one
    let decision = vad.classify(&noise_frame(500, 0.03), false);
    assert!(!decision.is_speech);
    assert!(vad.classify(&speech_frame(501), false).is_speech);
}

#[test]
fn test_digital_silence_is_not_learned() {
    let mut vad = VadEngine::new(&VadConfig::default());
    let before = vad.noise_floor();

    for seq in 0..200 {
        let decision = vad.classify(&silent_frame(seq), true);
        assert!(decision.is_silence);
        assert!(decision.energy.abs() < f32::EPSILON);
    }

    assert!((vad.noise_floor() - before).abs() < f32::EPSILON);
}
