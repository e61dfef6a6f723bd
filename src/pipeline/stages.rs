//! Stage tasks
//!
//! Every stage reads its input with a bounded wait so periodic work (drop
//! reporting, shield release) still happens while the queue is quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::Envelope;
use crate::Result;
use crate::dialogue::{DialogueEngine, DialogueTurn, split_into_speakable};
use crate::shield::EchoShield;
use crate::voice::{
    AudioFrame, AudioSink, SegmentAssembler, SegmentEvent, Synthesizer, Transcriber, Utterance,
    resample,
};

/// Log target for the user/assistant exchange
const CONVERSATION: &str = "voxloop::conversation";

enum Recv<T> {
    Item(T),
    Idle,
    Shutdown,
}

/// Wait up to `poll` for the next message; a closed channel reads as shutdown
async fn recv<T>(rx: &mut mpsc::Receiver<Envelope<T>>, poll: Duration) -> Recv<T> {
    match tokio::time::timeout(poll, rx.recv()).await {
        Err(_) => Recv::Idle,
        Ok(Some(Envelope::Data(item))) => Recv::Item(item),
        Ok(Some(Envelope::Shutdown) | None) => Recv::Shutdown,
    }
}

/// Output side of a stage
///
/// Once the next stage is gone its output is discarded; that is logged
/// once and the stage keeps consuming its own input.
struct Downstream<T> {
    stage: &'static str,
    tx: Option<mpsc::Sender<Envelope<T>>>,
}

impl<T> Downstream<T> {
    const fn new(stage: &'static str, tx: mpsc::Sender<Envelope<T>>) -> Self {
        Self {
            stage,
            tx: Some(tx),
        }
    }

    async fn send(&mut self, item: T) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(Envelope::Data(item)).await.is_err() {
            tracing::error!(stage = self.stage, "stage has stopped, discarding its input");
            self.tx = None;
        }
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.tx.take() {
            // Receiver gone means the stage already exited
            let _ = tx.send(Envelope::Shutdown).await;
        }
    }
}

/// Resample on the blocking pool
async fn resample_off_thread(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to {
        return Ok(samples);
    }
    tokio::task::spawn_blocking(move || resample(&samples, from, to))
        .await
        .map_err(|e| crate::Error::Pipeline(format!("resample task failed: {e}")))?
}

/// Frames → utterances
pub async fn run_segmentation_stage(
    mut rx: mpsc::Receiver<Envelope<AudioFrame>>,
    tx: mpsc::Sender<Envelope<Utterance>>,
    mut assembler: SegmentAssembler,
    shield: Arc<dyn EchoShield>,
    dropped: Arc<AtomicU64>,
    poll: Duration,
) {
    let mut downstream = Downstream::new("transcription", tx);
    let mut reported_drops = 0;
    let mut suppressing = false;

    loop {
        let total = dropped.load(Ordering::Relaxed);
        if total > reported_drops {
            tracing::warn!(
                dropped = total - reported_drops,
                total,
                "segmentation fell behind, capture frames dropped"
            );
            reported_drops = total;
        }

        let frame = match recv(&mut rx, poll).await {
            Recv::Item(frame) => frame,
            Recv::Idle => continue,
            Recv::Shutdown => break,
        };

        if shield.is_active() {
            assembler.suppress();
            if !suppressing {
                tracing::debug!("echo shield raised, ignoring input");
                suppressing = true;
            }
            continue;
        }
        if suppressing {
            tracing::debug!("echo shield lowered, listening");
            suppressing = false;
        }

        match assembler.process(frame) {
            SegmentEvent::Started => tracing::debug!("speech started"),
            SegmentEvent::Emitted(utterance) => {
                tracing::info!(
                    frames = utterance.frame_count(),
                    duration_ms = utterance.duration().as_millis(),
                    "utterance captured"
                );
                downstream.send(utterance).await;
            }
            SegmentEvent::Discarded { frames } => {
                tracing::debug!(frames, "utterance too short, discarded");
            }
            SegmentEvent::Idle | SegmentEvent::Continued => {}
        }
    }

    assembler.reset();
    downstream.shutdown().await;
    tracing::debug!("segmentation stage stopped");
}

/// Utterances → user text
pub async fn run_transcription_stage(
    mut rx: mpsc::Receiver<Envelope<Utterance>>,
    tx: mpsc::Sender<Envelope<String>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    poll: Duration,
) {
    let Some(transcriber) = transcriber else {
        tracing::error!("no transcriber available, transcription stage exiting");
        return;
    };
    tracing::debug!(backend = transcriber.name(), "transcription stage started");

    let mut downstream = Downstream::new("dialogue", tx);

    loop {
        let utterance = match recv(&mut rx, poll).await {
            Recv::Item(utterance) => utterance,
            Recv::Idle => continue,
            Recv::Shutdown => break,
        };

        let source_rate = utterance.sample_rate();
        let target_rate = transcriber.sample_rate().unwrap_or(source_rate);
        let samples =
            match resample_off_thread(utterance.into_samples(), source_rate, target_rate).await {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to resample utterance, skipping");
                    continue;
                }
            };

        match transcriber.transcribe(&samples, target_rate).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    tracing::debug!("no speech in utterance");
                    continue;
                }
                tracing::info!(target: CONVERSATION, "user: {text}");
                downstream.send(text.to_string()).await;
            }
            Err(e) => tracing::warn!(error = %e, "transcription failed, skipping utterance"),
        }
    }

    downstream.shutdown().await;
    tracing::debug!("transcription stage stopped");
}

/// User text → assistant turns
pub async fn run_dialogue_stage(
    mut rx: mpsc::Receiver<Envelope<String>>,
    tx: mpsc::Sender<Envelope<DialogueTurn>>,
    engine: Option<DialogueEngine>,
    poll: Duration,
) {
    let Some(engine) = engine else {
        tracing::error!("no dialogue backend available, dialogue stage exiting");
        return;
    };
    tracing::debug!(backend = engine.name(), "dialogue stage started");

    let mut downstream = Downstream::new("speech", tx);

    loop {
        let text = match recv(&mut rx, poll).await {
            Recv::Item(text) => text,
            Recv::Idle => continue,
            Recv::Shutdown => break,
        };

        match engine.respond(&text).await {
            Ok(turns) => {
                for turn in turns {
                    tracing::info!(target: CONVERSATION, style = %turn.style, "assistant: {}", turn.text);
                    downstream.send(turn).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "no reply, moving on to next input"),
        }
    }

    downstream.shutdown().await;
    tracing::debug!("dialogue stage stopped");
}

/// Speech stage tuning
#[derive(Debug, Clone, Copy)]
pub struct SpeechSettings {
    pub cooldown: Duration,
    pub min_chunk_chars: usize,
    pub poll: Duration,
}

/// Assistant turns → speaker
pub async fn run_speech_stage(
    mut rx: mpsc::Receiver<Envelope<DialogueTurn>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    sink: Option<Arc<dyn AudioSink>>,
    shield: Arc<dyn EchoShield>,
    settings: SpeechSettings,
) {
    let (Some(synthesizer), Some(sink)) = (synthesizer, sink) else {
        tracing::error!("no synthesizer or audio output available, speech stage exiting");
        return;
    };
    tracing::debug!(backend = synthesizer.name(), "speech stage started");

    let mut release_at: Option<Instant> = None;

    loop {
        let turn = match recv(&mut rx, settings.poll).await {
            Recv::Item(turn) => turn,
            Recv::Idle => {
                if release_at.is_some_and(|at| Instant::now() >= at) {
                    release_at = None;
                    if let Err(e) = shield.lower() {
                        tracing::warn!(error = %e, "failed to lower echo shield");
                    }
                }
                continue;
            }
            Recv::Shutdown => break,
        };

        let mut spoke = false;
        for chunk in split_into_speakable(&turn.text, settings.min_chunk_chars) {
            let speech = match synthesizer.synthesize(turn.style, &chunk).await {
                Ok(speech) if !speech.is_empty() => speech,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "synthesis failed, skipping chunk");
                    continue;
                }
            };

            let samples =
                match resample_off_thread(speech.samples, speech.sample_rate, sink.sample_rate())
                    .await
                {
                    Ok(samples) => samples,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to resample speech, skipping chunk");
                        continue;
                    }
                };

            if let Err(e) = shield.raise() {
                tracing::warn!(error = %e, "failed to raise echo shield");
            }
            spoke = true;

            if let Err(e) = sink.play(samples).await {
                tracing::warn!(error = %e, "playback failed");
            }
        }

        if spoke {
            match shield.schedule_lower(settings.cooldown) {
                Ok(()) => release_at = Some(Instant::now() + settings.cooldown),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to schedule echo shield release");
                    release_at = Some(Instant::now());
                }
            }
        }
    }

    if let Err(e) = shield.lower() {
        tracing::warn!(error = %e, "failed to lower echo shield");
    }
    tracing::debug!("speech stage stopped");
}
