//! Continuous Listening State Machine
//!
//! `idle → initializing → listening ⇄ processing → idle`.
//!
//! The controller stands up audio capture and a streaming transcriber, then
//! hands both to a session task. That task is the only consumer of transcript
//! results: final results are accumulated and committed to a `CommandSink` one
//! at a time, and volatile results may be dispatched speculatively when the
//! fast path is on. Stopping the session returns the capture and transcriber
//! to the controller so listening can be restarted.

use crate::{
    dispatcher::DispatchOutcome,
    error::{CommandError, VoiceError},
    speech::{AudioCapture, PermissionGate, SpeechTranscriber, TranscriptEvent},
    utterance,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};

/// Where committed command text goes.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn submit(&self, text: &str) -> Result<DispatchOutcome, CommandError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningState {
    #[default]
    Idle,
    Initializing,
    Listening,
    Processing,
}

/// Observable view of the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListeningSnapshot {
    pub state: ListeningState,
    /// Committed text accumulated since the last successful command.
    pub finalized: String,
    /// Latest volatile hypothesis.
    pub volatile: String,
    /// Text currently being processed, if any.
    pub pending: String,
    /// The setup error that ended the last session, if it failed.
    pub last_error: Option<String>,
    /// Whether volatile results are dispatched speculatively.
    pub volatile_processing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListeningConfig {
    /// Dispatch volatile results without waiting for the final one.
    pub volatile_processing: bool,
    /// Minimum time between two speculative dispatches.
    pub volatile_cooldown: Duration,
    /// Volatile text shorter than this is never dispatched.
    pub min_volatile_len: usize,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            volatile_processing: false,
            volatile_cooldown: Duration::from_millis(800),
            min_volatile_len: 3,
        }
    }
}

/// Decides whether a volatile result may be dispatched speculatively.
#[derive(Debug, Clone)]
pub struct VolatileGate {
    cooldown: Duration,
    min_len: usize,
    last: Option<Instant>,
}

impl VolatileGate {
    pub fn new(cooldown: Duration, min_len: usize) -> Self {
        Self {
            cooldown,
            min_len,
            last: None,
        }
    }

    /// Admits `text` if it is long enough and the cooldown has elapsed since
    /// the last admitted text. Admission restarts the cooldown.
    pub fn admit(&mut self, text: &str, now: Instant) -> bool {
        if text.chars().count() < self.min_len {
            return false;
        }
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Flips the speculative fast path without access to the controller.
#[derive(Clone)]
pub struct VolatileSwitch {
    enabled: Arc<AtomicBool>,
    status: Arc<watch::Sender<ListeningSnapshot>>,
}

impl VolatileSwitch {
    pub fn set(&self, enabled: bool) {
        info!(enabled, "Volatile processing toggled");
        self.enabled.store(enabled, Ordering::Relaxed);
        publish(&self.status, |s| s.volatile_processing = enabled);
    }

    pub fn get(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

struct Pipeline {
    capture: Box<dyn AudioCapture>,
    transcriber: Box<dyn SpeechTranscriber>,
}

struct ActiveSession {
    stop: watch::Sender<bool>,
    task: JoinHandle<Pipeline>,
}

pub struct ListeningController {
    permissions: Arc<dyn PermissionGate>,
    pipeline: Option<Pipeline>,
    sink: Arc<dyn CommandSink>,
    config: ListeningConfig,
    volatile_processing: Arc<AtomicBool>,
    status: Arc<watch::Sender<ListeningSnapshot>>,
    session: Option<ActiveSession>,
}

impl ListeningController {
    pub fn new(
        permissions: Arc<dyn PermissionGate>,
        capture: Box<dyn AudioCapture>,
        transcriber: Box<dyn SpeechTranscriber>,
        sink: Arc<dyn CommandSink>,
        config: ListeningConfig,
    ) -> Self {
        let (status, _) = watch::channel(ListeningSnapshot {
            volatile_processing: config.volatile_processing,
            ..Default::default()
        });
        Self {
            permissions,
            pipeline: Some(Pipeline {
                capture,
                transcriber,
            }),
            sink,
            volatile_processing: Arc::new(AtomicBool::new(config.volatile_processing)),
            config,
            status: Arc::new(status),
            session: None,
        }
    }

    pub fn state(&self) -> ListeningState {
        self.status.borrow().state
    }

    pub fn snapshot(&self) -> ListeningSnapshot {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListeningSnapshot> {
        self.status.subscribe()
    }

    /// A handle to the fast-path flag that stays usable while the controller
    /// is busy starting or stopping.
    pub fn volatile_switch(&self) -> VolatileSwitch {
        VolatileSwitch {
            enabled: self.volatile_processing.clone(),
            status: self.status.clone(),
        }
    }

    /// Turns the speculative fast path on or off, including for a running session.
    pub fn set_volatile_processing(&self, enabled: bool) {
        self.volatile_switch().set(enabled);
    }

    pub fn volatile_processing(&self) -> bool {
        self.volatile_processing.load(Ordering::Relaxed)
    }

    /// Starts listening. A no-op if a session is already running.
    ///
    /// Any setup failure tears down what was set up, returns the controller to
    /// idle and is returned to the caller.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), VoiceError> {
        self.reap().await;
        if self.session.is_some() {
            debug!("Already listening");
            return Ok(());
        }
        let Some(mut pipeline) = self.pipeline.take() else {
            return Err(VoiceError::AudioSetupFailure("audio pipeline was lost".into()));
        };

        publish(&self.status, |s| {
            *s = ListeningSnapshot {
                state: ListeningState::Initializing,
                volatile_processing: s.volatile_processing,
                ..Default::default()
            }
        });

        match stand_up(self.permissions.as_ref(), &self.status, &mut pipeline).await {
            Ok(transcripts) => {
                let (stop, stop_rx) = watch::channel(false);
                let session = Session {
                    sink: self.sink.clone(),
                    status: self.status.clone(),
                    volatile_processing: self.volatile_processing.clone(),
                    gate: VolatileGate::new(self.config.volatile_cooldown, self.config.min_volatile_len),
                    stopping: stop_rx.clone(),
                    buffer: String::new(),
                    speculative: None,
                    held_behind_speculation: false,
                    already_executed: None,
                };
                let task = tokio::spawn(session.run(pipeline, transcripts, stop_rx));
                self.session = Some(ActiveSession { stop, task });
                info!("Listening started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Listening setup failed");
                pipeline.capture.stop().await;
                pipeline.transcriber.finish().await;
                self.pipeline = Some(pipeline);
                publish(&self.status, |s| {
                    s.state = ListeningState::Idle;
                    s.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Stops listening and waits for the session to wind down.
    ///
    /// A command already being processed is allowed to finish first.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            publish(&self.status, |s| s.state = ListeningState::Idle);
            return;
        };
        let _ = session.stop.send(true);
        self.reclaim(session.task).await;
        info!("Listening stopped");
    }

    /// Starts when idle, stops when listening, and ignores the request while
    /// initializing or processing.
    pub async fn toggle(&mut self) -> Result<(), VoiceError> {
        self.reap().await;
        match self.state() {
            ListeningState::Idle => self.start().await,
            ListeningState::Listening => {
                self.stop().await;
                Ok(())
            }
            ListeningState::Initializing | ListeningState::Processing => {
                debug!("Toggle ignored while busy");
                Ok(())
            }
        }
    }

    /// Collects a session that ended on its own, e.g. because the transcript
    /// stream closed.
    async fn reap(&mut self) {
        if self.session.as_ref().is_some_and(|s| s.task.is_finished()) {
            if let Some(session) = self.session.take() {
                self.reclaim(session.task).await;
            }
        }
    }

    async fn reclaim(&mut self, task: JoinHandle<Pipeline>) {
        match task.await {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(e) => error!(error = %e, "Listening session task failed"),
        }
        publish(&self.status, |s| s.state = ListeningState::Idle);
    }
}

async fn stand_up(
    permissions: &dyn PermissionGate,
    status: &watch::Sender<ListeningSnapshot>,
    pipeline: &mut Pipeline,
) -> Result<mpsc::Receiver<TranscriptEvent>, VoiceError> {
    if !permissions.request_microphone().await {
        return Err(VoiceError::PermissionDenied);
    }
    pipeline.capture.prepare().await?;
    pipeline.transcriber.prepare().await?;

    publish(status, |s| s.state = ListeningState::Listening);
    let audio = pipeline.capture.start().await?;
    pipeline.transcriber.start(audio).await
}

fn publish(status: &watch::Sender<ListeningSnapshot>, change: impl FnOnce(&mut ListeningSnapshot)) {
    status.send_modify(change);
}

struct SpeculativeOutcome {
    text: String,
    result: Result<DispatchOutcome, CommandError>,
}

/// Words that may trail a spoken command without changing what it asks for.
const TRAILING_FILLER: [&str; 9] = ["please", "now", "thanks", "thank", "you", "ok", "okay", "um", "uh"];

/// Whether the final result `spoken` asks for exactly what `executed` already did.
///
/// Both are word sequences. The final may only add trailing filler words.
fn repeats_executed(executed: &[String], spoken: &[String]) -> bool {
    !executed.is_empty()
        && spoken.starts_with(executed)
        && spoken[executed.len()..]
            .iter()
            .all(|w| TRAILING_FILLER.contains(&w.as_str()))
}

/// State owned by the single transcript consumer.
struct Session {
    sink: Arc<dyn CommandSink>,
    status: Arc<watch::Sender<ListeningSnapshot>>,
    volatile_processing: Arc<AtomicBool>,
    gate: VolatileGate,
    stopping: watch::Receiver<bool>,
    /// Accumulated committed text awaiting a successful dispatch.
    buffer: String,
    speculative: Option<JoinHandle<()>>,
    /// A final result was buffered while a speculative dispatch was in flight.
    held_behind_speculation: bool,
    /// Words of a speculative command that already succeeded.
    already_executed: Option<Vec<String>>,
}

impl Session {
    async fn run(
        mut self,
        mut pipeline: Pipeline,
        mut transcripts: mpsc::Receiver<TranscriptEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Pipeline {
        let (speculative_tx, mut speculative_rx) = mpsc::channel::<SpeculativeOutcome>(1);

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *self.stopping.borrow() {
                        break;
                    }
                }
                Some(outcome) = speculative_rx.recv() => {
                    self.on_speculative_outcome(outcome, &mut transcripts).await;
                }
                event = transcripts.recv() => match event {
                    Some(event) if event.is_final => self.on_final(event.text, &mut transcripts).await,
                    Some(event) => self.on_volatile(event.text, &speculative_tx),
                    None => {
                        info!("Transcript stream ended");
                        break;
                    }
                },
            }
        }

        if let Some(task) = self.speculative.take() {
            task.abort();
        }
        self.gate.reset();
        pipeline.capture.stop().await;
        pipeline.transcriber.finish().await;
        publish(&self.status, |s| {
            *s = ListeningSnapshot {
                volatile_processing: s.volatile_processing,
                ..Default::default()
            }
        });
        pipeline
    }

    fn on_volatile(&mut self, text: String, outcomes: &mpsc::Sender<SpeculativeOutcome>) {
        publish(&self.status, |s| s.volatile = text.clone());

        if !self.volatile_processing.load(Ordering::Relaxed) || self.speculative.is_some() {
            return;
        }
        let text = utterance::clean(&text);
        if !self.gate.admit(&text, Instant::now()) {
            return;
        }

        debug!(%text, "Dispatching volatile result speculatively");
        let sink = self.sink.clone();
        let outcomes = outcomes.clone();
        self.speculative = Some(tokio::spawn(async move {
            let result = sink.submit(&text).await;
            let _ = outcomes.send(SpeculativeOutcome { text, result }).await;
        }));
    }

    async fn on_speculative_outcome(
        &mut self,
        outcome: SpeculativeOutcome,
        transcripts: &mut mpsc::Receiver<TranscriptEvent>,
    ) {
        self.speculative = None;
        let held = std::mem::take(&mut self.held_behind_speculation);
        match outcome.result {
            Ok(done) => {
                info!(text = %outcome.text, kind = %done.kind, "Speculative command applied");
                self.buffer.clear();
                // The guard only covers a final that has not arrived yet.
                if !held {
                    self.already_executed = Some(utterance::words(&outcome.text));
                }
                publish(&self.status, |s| {
                    s.finalized.clear();
                    s.volatile.clear();
                });
            }
            Err(e) => {
                debug!(text = %outcome.text, error = %e, "Speculative command failed, waiting for final result");
                if held {
                    self.process(transcripts).await;
                }
            }
        }
    }

    async fn on_final(&mut self, text: String, transcripts: &mut mpsc::Receiver<TranscriptEvent>) {
        publish(&self.status, |s| s.volatile.clear());
        let text = utterance::clean(&text);

        if let Some(executed) = self.already_executed.take() {
            if repeats_executed(&executed, &utterance::words(&text)) {
                debug!(%text, "Final result already executed speculatively");
                return;
            }
        }
        if text.is_empty() {
            return;
        }

        self.append(&text);
        if self.speculative.is_some() {
            debug!(%text, "Holding final result behind speculative command");
            self.held_behind_speculation = true;
            return;
        }
        self.process(transcripts).await;
    }

    fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.buffer.push(' ');
        let finalized = self.buffer.clone();
        publish(&self.status, |s| s.finalized = finalized);
    }

    /// Submits the buffer and waits for the result.
    ///
    /// Transcripts keep being read meanwhile. Final results are only appended
    /// to the buffer, so they ride along with a retry after a failure and are
    /// discarded with the buffer after a success.
    async fn process(&mut self, transcripts: &mut mpsc::Receiver<TranscriptEvent>) {
        let pending = self.buffer.trim().to_string();
        publish(&self.status, |s| {
            s.state = ListeningState::Processing;
            s.pending = pending.clone();
        });

        let sink = self.sink.clone();
        let submission = async move { sink.submit(&pending).await };
        tokio::pin!(submission);
        let mut open = true;
        let result = loop {
            tokio::select! {
                biased;
                result = &mut submission => break result,
                event = transcripts.recv(), if open => match event {
                    Some(event) => self.hold(event),
                    None => open = false,
                },
            }
        };

        match result {
            Ok(done) => {
                info!(kind = %done.kind, summary = %done.summary, "Command processed");
                self.buffer.clear();
                publish(&self.status, |s| s.finalized.clear());
            }
            Err(e) if e.keeps_transcript() => {
                warn!(error = %e, "Command failed, keeping transcript for retry");
            }
            Err(e) => {
                warn!(error = %e, "Command failed");
                self.buffer.clear();
                publish(&self.status, |s| s.finalized.clear());
            }
        }

        let stopping = *self.stopping.borrow();
        publish(&self.status, |s| {
            s.pending.clear();
            s.state = if stopping {
                ListeningState::Idle
            } else {
                ListeningState::Listening
            };
        });
    }

    /// Takes a transcript result that arrived while a command was running.
    fn hold(&mut self, event: TranscriptEvent) {
        if !event.is_final {
            publish(&self.status, |s| s.volatile = event.text);
            return;
        }
        publish(&self.status, |s| s.volatile.clear());
        let text = utterance::clean(&event.text);
        if !text.is_empty() {
            debug!(%text, "Holding final result until the running command completes");
            self.append(&text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_rejects_short_text() {
        let mut gate = VolatileGate::new(Duration::from_millis(800), 3);
        assert!(!gate.admit("go", Instant::now()));
        assert!(gate.admit("red", Instant::now()));
    }

    #[test]
    fn test_gate_cooldown_boundary() {
        let mut gate = VolatileGate::new(Duration::from_millis(800), 3);
        let t0 = Instant::now();
        assert!(gate.admit("make a cube", t0));
        assert!(!gate.admit("make a cube", t0 + Duration::from_millis(799)));
        assert!(gate.admit("make a cube", t0 + Duration::from_millis(800)));
        // The rejected attempt did not restart the cooldown.
        assert!(!gate.admit("make a cube", t0 + Duration::from_millis(1599)));
        assert!(gate.admit("make a cube", t0 + Duration::from_millis(1600)));
    }

    #[test]
    fn test_gate_reset_clears_cooldown() {
        let mut gate = VolatileGate::new(Duration::from_secs(10), 3);
        let t0 = Instant::now();
        assert!(gate.admit("make a cube", t0));
        gate.reset();
        assert!(gate.admit("make a cube", t0));
    }

    fn words(text: &str) -> Vec<String> {
        utterance::words(text)
    }

    #[test]
    fn test_repeat_matches_whole_words() {
        let executed = words("make a red cube");
        assert!(repeats_executed(&executed, &words("Make a red cube.")));
        assert!(repeats_executed(&executed, &words("make a red cube please")));
        assert!(!repeats_executed(&executed, &words("make a red cube and a blue one")));
    }

    #[test]
    fn test_partial_speculation_does_not_swallow_final() {
        assert!(!repeats_executed(&words("make a red"), &words("make a red cube")));
        assert!(!repeats_executed(&words("make a red"), &words("make a reddish cone")));
        assert!(!repeats_executed(&words("make a red cube"), &words("make a red")));
        assert!(!repeats_executed(&[], &words("please")));
    }

    #[test]
    fn test_default_config() {
        let config = ListeningConfig::default();
        assert!(!config.volatile_processing);
        assert_eq!(config.volatile_cooldown, Duration::from_millis(800));
        assert_eq!(config.min_volatile_len, 3);
    }
}
