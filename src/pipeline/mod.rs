//! Full-duplex voice pipeline
//!
//! ```text
//! capture ─frames─▶ segmentation ─utterances─▶ transcription ─text─▶ dialogue ─turns─▶ speech
//!                        ▲                                                              │
//!                        └──────────────────────── echo shield ◀────────────────────────┘
//! ```
//!
//! Each stage is a tokio task reading a bounded queue. Capture pushes
//! without blocking and drops frames when segmentation falls behind; every
//! other hop applies backpressure. Shutdown is an in-band sentinel that
//! each stage forwards before returning.

mod stages;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::{Config, VadConfig};
use crate::dialogue::DialogueEngine;
use crate::shield::EchoShield;
use crate::voice::{
    AudioFrame, AudioSink, FrameGeometry, SegmentAssembler, SegmenterSettings, Synthesizer,
    Transcriber,
};

/// Queue message: a payload or the shutdown sentinel
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    /// Work item
    Data(T),
    /// Finish up, forward this, and stop
    Shutdown,
}

/// External services the pipeline talks to
///
/// A missing collaborator makes its stage exit at startup; the stages in
/// front of it keep running and log that their output is discarded.
#[derive(Default)]
pub struct Collaborators {
    /// Speech-to-text
    pub transcriber: Option<Arc<dyn Transcriber>>,
    /// Dialogue model
    pub dialogue: Option<DialogueEngine>,
    /// Text-to-speech
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    /// Speaker
    pub sink: Option<Arc<dyn AudioSink>>,
}

/// Pipeline tuning resolved against the capture geometry
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// VAD thresholds and noise floor window
    pub vad: VadConfig,
    /// Segmentation frame counts
    pub segmenter: SegmenterSettings,
    /// Capture → segmentation queue size
    pub frame_queue: usize,
    /// Segmentation → transcription queue size
    pub utterance_queue: usize,
    /// Transcription → dialogue queue size
    pub transcript_queue: usize,
    /// Dialogue → speech queue size
    pub turn_queue: usize,
    /// Bounded wait on every stage input
    pub poll_interval: Duration,
    /// How long shutdown waits before aborting stages
    pub shutdown_grace: Duration,
    /// Echo shield hold time after playback
    pub cooldown: Duration,
    /// Minimum characters per synthesized chunk
    pub min_chunk_chars: usize,
}

impl PipelineSettings {
    /// Resolve configuration for frames of the given geometry
    #[must_use]
    pub fn from_config(config: &Config, geometry: FrameGeometry) -> Self {
        Self {
            vad: config.vad.clone(),
            segmenter: SegmenterSettings::from_config(&config.segmentation, geometry),
            frame_queue: config.pipeline.frame_queue,
            utterance_queue: config.pipeline.utterance_queue,
            transcript_queue: config.pipeline.transcript_queue,
            turn_queue: config.pipeline.turn_queue,
            poll_interval: config.pipeline.poll_interval(),
            shutdown_grace: config.pipeline.shutdown_grace(),
            cooldown: config.shield.cooldown(geometry.chunk_duration()),
            min_chunk_chars: config.synthesis.min_chunk_chars,
        }
    }
}

/// Non-blocking entry point for captured frames
///
/// Cheap to clone; safe to use from the audio callback.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Envelope<AudioFrame>>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Enqueue a frame without waiting
    ///
    /// A full queue drops this frame and counts it. Returns `false` if the
    /// frame was not enqueued.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(Envelope::Data(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue a frame, waiting for room
    ///
    /// For replaying recorded audio; capture uses [`Self::push`].
    pub async fn send(&self, frame: AudioFrame) -> bool {
        self.tx.send(Envelope::Data(frame)).await.is_ok()
    }

    /// Frames dropped because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Outcome of [`PipelineHandle::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Stages that returned on their own
    pub completed: usize,
    /// Stages that panicked
    pub failed: usize,
    /// Stages aborted after the grace period
    pub aborted: usize,
}

impl ShutdownReport {
    /// Whether every stage stopped cleanly
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.aborted == 0
    }
}

/// Running pipeline
pub struct PipelineHandle {
    frames: FrameSender,
    stages: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_grace: Duration,
}

impl PipelineHandle {
    /// Sender for captured frames
    #[must_use]
    pub fn frame_sender(&self) -> FrameSender {
        self.frames.clone()
    }

    /// Frames dropped at the capture queue so far
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.frames.dropped()
    }

    /// Whether every stage task has returned
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stages.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Stop the pipeline
    ///
    /// Injects the shutdown sentinel at the head and waits for it to pass
    /// through every stage. Stages still running after the grace period
    /// are aborted.
    pub async fn shutdown(self) -> ShutdownReport {
        let deadline = Instant::now() + self.shutdown_grace;
        tracing::info!("shutting down pipeline");

        match tokio::time::timeout(
            self.shutdown_grace,
            self.frames.tx.send(Envelope::Shutdown),
        )
        .await
        {
            Ok(Ok(())) => {}
            // Segmentation already gone; downstream sees closed channels
            Ok(Err(_)) => tracing::debug!("segmentation stage already stopped"),
            Err(_) => tracing::warn!("frame queue stayed full, shutdown sentinel not delivered"),
        }
        drop(self.frames);

        let mut report = ShutdownReport::default();
        for (name, mut handle) in self.stages {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => report.completed += 1,
                Ok(Err(e)) => {
                    tracing::error!(stage = name, error = %e, "stage task failed");
                    report.failed += 1;
                }
                Err(_) => {
                    tracing::warn!(stage = name, "stage did not stop in time, aborting");
                    handle.abort();
                    report.aborted += 1;
                }
            }
        }

        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            aborted = report.aborted,
            "pipeline stopped"
        );
        report
    }
}

/// Wire the stages together and start them
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn spawn(
    settings: &PipelineSettings,
    collaborators: Collaborators,
    shield: Arc<dyn EchoShield>,
) -> PipelineHandle {
    let (frame_tx, frame_rx) = mpsc::channel(settings.frame_queue.max(1));
    let (utterance_tx, utterance_rx) = mpsc::channel(settings.utterance_queue.max(1));
    let (transcript_tx, transcript_rx) = mpsc::channel(settings.transcript_queue.max(1));
    let (turn_tx, turn_rx) = mpsc::channel(settings.turn_queue.max(1));

    let dropped = Arc::new(AtomicU64::new(0));
    let poll = settings.poll_interval;

    let assembler = SegmentAssembler::new(&settings.vad, settings.segmenter);

    let segmentation = tokio::spawn(stages::run_segmentation_stage(
        frame_rx,
        utterance_tx,
        assembler,
        Arc::clone(&shield),
        Arc::clone(&dropped),
        poll,
    ));

    let transcription = tokio::spawn(stages::run_transcription_stage(
        utterance_rx,
        transcript_tx,
        collaborators.transcriber,
        poll,
    ));

    let dialogue = tokio::spawn(stages::run_dialogue_stage(
        transcript_rx,
        turn_tx,
        collaborators.dialogue,
        poll,
    ));

    let speech = tokio::spawn(stages::run_speech_stage(
        turn_rx,
        collaborators.synthesizer,
        collaborators.sink,
        shield,
        stages::SpeechSettings {
            cooldown: settings.cooldown,
            min_chunk_chars: settings.min_chunk_chars,
            poll,
        },
    ));

    tracing::debug!(
        frame_queue = settings.frame_queue,
        utterance_queue = settings.utterance_queue,
        transcript_queue = settings.transcript_queue,
        turn_queue = settings.turn_queue,
        "pipeline started"
    );

    PipelineHandle {
        frames: FrameSender {
            tx: frame_tx,
            dropped,
        },
        stages: vec![
            ("segmentation", segmentation),
            ("transcription", transcription),
            ("dialogue", dialogue),
            ("speech", speech),
        ],
        shutdown_grace: settings.shutdown_grace,
    }
}
