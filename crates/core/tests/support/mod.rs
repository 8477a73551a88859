#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use voicecraft_core::{
    action::{ACTION_INSTRUCTIONS, ActionKind},
    dispatcher::{Command, DispatchOutcome},
    error::{CommandError, ExtractionError, VoiceError},
    extraction::{ExtractionRequest, StructuredExtractor},
    listening::CommandSink,
    params::{CREATE_INSTRUCTIONS, MODIFY_INSTRUCTIONS, MOVE_INSTRUCTIONS, SCALE_INSTRUCTIONS},
    speech::{AudioBuffer, AudioCapture, PermissionGate, SpeechTranscriber, TranscriptEvent},
    utterance,
};

/// A stand-in language model that answers from keywords in the prompt.
///
/// It deliberately leaves some answers wrong (count, move direction, shrink
/// factor) so the deterministic guards are exercised.
#[derive(Default)]
pub struct KeywordModel {
    pub calls: AtomicUsize,
}

const COLORS: [&str; 12] = [
    "black", "blue", "brown", "cyan", "gray", "green", "magenta", "orange", "purple", "red",
    "white", "yellow",
];

impl KeywordModel {
    fn classify(prompt: &str) -> &'static str {
        let has = |words: &[&str]| utterance::has_any_word(prompt, words);
        if has(&["move", "right", "left", "forward", "backward", "lift", "slide", "translate"]) {
            "movement"
        } else if has(&["bigger", "smaller", "scale", "shrink"]) {
            "scaling"
        } else if has(&["rotate", "spin"]) {
            "rotation"
        } else if has(&["it"]) && has(&COLORS) {
            "modification"
        } else {
            "creation"
        }
    }

    fn color(prompt: &str) -> &'static str {
        utterance::words(prompt)
            .iter()
            .find_map(|w| COLORS.iter().find(|c| **c == w.as_str()).copied())
            .unwrap_or("white")
    }

    fn shape(prompt: &str) -> &'static str {
        let words = utterance::words(prompt);
        ["sphere", "spheres", "ball", "orb", "cone", "cylinder"]
            .iter()
            .find(|s| words.iter().any(|w| w == *s))
            .map(|s| match *s {
                "spheres" => "sphere",
                other => other,
            })
            .unwrap_or("cube")
    }
}

#[async_trait]
impl StructuredExtractor for KeywordModel {
    async fn respond(&self, request: ExtractionRequest) -> Result<Value, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.prompt.as_str();
        let answer = match request.instructions.as_str() {
            i if i == ACTION_INSTRUCTIONS => json!({ "action_type": Self::classify(prompt) }),
            i if i == CREATE_INSTRUCTIONS => json!({
                "shape": Self::shape(prompt),
                "size": if utterance::has_any_word(prompt, &["big"]) { 0.15 } else { 0.1 },
                "color": Self::color(prompt),
                "metallic": utterance::has_any_word(prompt, &["metallic", "shiny"]),
                "roughness": 0.5,
                "count": 1,
            }),
            i if i == MOVE_INSTRUCTIONS => json!({ "axis": "y", "direction": "positive" }),
            i if i == SCALE_INSTRUCTIONS => {
                json!({ "factor": utterance::first_number(prompt).unwrap_or(2.0) })
            }
            i if i == MODIFY_INSTRUCTIONS => json!({
                "color": Self::color(prompt),
                "roughness": 0.2,
                "metallic": true,
            }),
            _ => json!({ "action_word": utterance::words(prompt).first().cloned().unwrap_or_default() }),
        };
        Ok(answer)
    }
}

pub struct FixedPermission(pub bool);

#[async_trait]
impl PermissionGate for FixedPermission {
    async fn request_microphone(&self) -> bool {
        self.0
    }
}

/// Counters shared between a fake pipeline and the test body.
#[derive(Default)]
pub struct PipelineProbe {
    pub prepared: AtomicUsize,
    pub stopped: AtomicUsize,
    pub finished: AtomicUsize,
}

pub struct FakeCapture {
    probe: Arc<PipelineProbe>,
    fail_prepare: bool,
    tap: Option<mpsc::Sender<AudioBuffer>>,
}

impl FakeCapture {
    pub fn new(probe: Arc<PipelineProbe>) -> Self {
        Self { probe, fail_prepare: false, tap: None }
    }

    pub fn failing(probe: Arc<PipelineProbe>) -> Self {
        Self { probe, fail_prepare: true, tap: None }
    }
}

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn prepare(&mut self) -> Result<(), VoiceError> {
        if self.fail_prepare {
            return Err(VoiceError::AudioSetupFailure("no input device".into()));
        }
        self.probe.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBuffer>, VoiceError> {
        let (tx, rx) = mpsc::channel(8);
        self.tap = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.tap = None;
        self.probe.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Replays transcript feeds handed in by the test, one per session.
pub struct FakeTranscriber {
    probe: Arc<PipelineProbe>,
    feeds: VecDeque<mpsc::Receiver<TranscriptEvent>>,
}

impl FakeTranscriber {
    pub fn new(probe: Arc<PipelineProbe>, feeds: Vec<mpsc::Receiver<TranscriptEvent>>) -> Self {
        Self { probe, feeds: feeds.into() }
    }
}

#[async_trait]
impl SpeechTranscriber for FakeTranscriber {
    async fn prepare(&mut self) -> Result<(), VoiceError> {
        if self.feeds.is_empty() {
            return Err(VoiceError::TranscriberSetupFailure("language model not installed".into()));
        }
        Ok(())
    }

    async fn start(
        &mut self,
        _audio: mpsc::Receiver<AudioBuffer>,
    ) -> Result<mpsc::Receiver<TranscriptEvent>, VoiceError> {
        self.feeds
            .pop_front()
            .ok_or_else(|| VoiceError::TranscriberSetupFailure("no feed".into()))
    }

    async fn finish(&mut self) {
        self.probe.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records submissions, takes `delay` per command, and fails with queued
/// errors before succeeding.
pub struct RecordingSink {
    delay: Duration,
    failures: Mutex<VecDeque<CommandError>>,
    pub submitted: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub busy: AtomicBool,
}

impl RecordingSink {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            failures: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
        })
    }

    pub fn fail_next(&self, error: CommandError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn submit(&self, text: &str) -> Result<DispatchOutcome, CommandError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.busy.store(true, Ordering::SeqCst);
        let sequence = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(text.to_string());
            submitted.len() as u64 - 1
        };

        tokio::time::sleep(self.delay).await;

        let failure = self.failures.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
        match failure {
            Some(e) => Err(e),
            None => Ok(DispatchOutcome {
                command: Command {
                    sequence,
                    text: text.to_string(),
                    received_at: Utc::now(),
                },
                kind: ActionKind::Creation,
                summary: format!("handled {text}"),
                events: Vec::new(),
            }),
        }
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
