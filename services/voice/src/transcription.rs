//! Streaming speech-to-text over the OpenAI Realtime API.
//!
//! Captured audio is downmixed, resampled to 24 kHz PCM16 and appended to the
//! realtime input buffer. Server-side voice activity detection segments the
//! stream; transcription deltas become volatile results and completed
//! transcriptions become final ones.

use crate::{
    audio_utils::{self, OPENAI_REALTIME_API_PCM16_SAMPLE_RATE, StreamResampler},
    config::is_supported_language,
};
use anyhow::Result;
use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent as OAIClientEvent, ServerEvent as OAIServerEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{Instrument, debug, error, info, warn};
use voicecraft_core::{
    error::VoiceError,
    speech::{AudioBuffer, SpeechTranscriber, TranscriptEvent},
};

const RESAMPLER_CHUNK: usize = 1024;
const TRANSCRIPT_CHANNEL_CAPACITY: usize = 32;

type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RealtimeTranscriber {
    url: String,
    api_key: String,
    model: String,
    language: String,
    task: Option<JoinHandle<()>>,
}

impl RealtimeTranscriber {
    /// `url` is the realtime WebSocket endpoint, model query included.
    pub fn new(url: String, api_key: String, model: String, language: String) -> Self {
        Self {
            url,
            api_key,
            model,
            language,
            task: None,
        }
    }

    async fn connect(&self) -> Result<RealtimeSocket> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", self.api_key).parse()?);
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (mut socket, _) = connect_async(request).await?;
        info!(url = %self.url, "Connected to OpenAI Realtime API.");

        let event = session_update(&self.model, &self.language);
        socket
            .send(WsMessage::Text(serde_json::to_string(&event)?.into()))
            .await?;
        Ok(socket)
    }
}

#[async_trait]
impl SpeechTranscriber for RealtimeTranscriber {
    async fn prepare(&mut self) -> Result<(), VoiceError> {
        if self.api_key.trim().is_empty() {
            return Err(VoiceError::TranscriberSetupFailure(
                "no API key for the transcription service".into(),
            ));
        }
        if !is_supported_language(&self.language) {
            return Err(VoiceError::TranscriberSetupFailure(format!(
                "language '{}' is not supported",
                self.language
            )));
        }
        Ok(())
    }

    async fn start(
        &mut self,
        audio: mpsc::Receiver<AudioBuffer>,
    ) -> Result<mpsc::Receiver<TranscriptEvent>, VoiceError> {
        let socket = self
            .connect()
            .await
            .map_err(|e| VoiceError::TranscriberSetupFailure(format!("{e:#}")))?;
        let (tx, rx) = mpsc::channel(TRANSCRIPT_CHANNEL_CAPACITY);

        let span = tracing::info_span!("transcriber", model = %self.model, language = %self.language);
        self.task = Some(tokio::spawn(
            async move {
                if let Err(e) = pump(socket, audio, tx).await {
                    error!(error = ?e, "Realtime transcription failed");
                }
                info!("Realtime transcription finished.");
            }
            .instrument(span),
        ));
        Ok(rx)
    }

    async fn finish(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Configures a text-only session that transcribes input audio and never
/// generates responses.
fn session_update(model: &str, language: &str) -> OAIClientEvent {
    let session = oai_realtime::SessionResource {
        modalities: Some(vec!["text".to_string()]),
        input_audio_format: Some(oai_realtime::AudioFormat::PCM16),
        input_audio_transcription: Some(oai_realtime::AudioTranscription {
            model: Some(model.to_string()),
            language: Some(language.to_string()),
            ..Default::default()
        }),
        turn_detection: Some(oai_realtime::TurnDetection::ServerVAD {
            threshold: 0.5,
            prefix_padding_ms: 200,
            silence_duration_ms: 500,
            interrupt_response: Some(false),
            create_response: Some(false),
        }),
        ..Default::default()
    };
    OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
        session,
        event_id: None,
    })
}

/// Maps a server event to a transcript result. Deltas are accumulated into
/// `partial` so each volatile result carries the whole hypothesis so far.
fn interpret(event: OAIServerEvent, partial: &mut String) -> Option<TranscriptEvent> {
    match event {
        OAIServerEvent::ConversationItemInputAudioTranscriptionDelta(e) => {
            partial.push_str(&e.delta);
            Some(TranscriptEvent::volatile(partial.trim()))
        }
        OAIServerEvent::ConversationItemInputAudioTranscriptionCompleted(e) => {
            partial.clear();
            Some(TranscriptEvent::committed(e.transcript.trim()))
        }
        OAIServerEvent::Error(e) => {
            warn!(message = %e.error.message, "Realtime API reported an error");
            None
        }
        _ => None,
    }
}

async fn pump(
    socket: RealtimeSocket,
    mut audio: mpsc::Receiver<AudioBuffer>,
    events: mpsc::Sender<TranscriptEvent>,
) -> Result<()> {
    let (mut openai_tx, mut openai_rx) = socket.split();
    let mut resampler: Option<(u32, StreamResampler)> = None;
    let mut partial = String::new();

    loop {
        tokio::select! {
            buffer = audio.recv() => {
                let Some(buffer) = buffer else {
                    debug!("Audio stream ended");
                    break;
                };
                if resampler.as_ref().is_none_or(|(rate, _)| *rate != buffer.sample_rate) {
                    let stream = StreamResampler::new(
                        f64::from(buffer.sample_rate),
                        OPENAI_REALTIME_API_PCM16_SAMPLE_RATE,
                        RESAMPLER_CHUNK,
                    )?;
                    resampler = Some((buffer.sample_rate, stream));
                }
                let Some((_, stream)) = resampler.as_mut() else { continue };
                let pcm = stream.push(&audio_utils::downmix(&buffer.samples, buffer.channels))?;
                if pcm.is_empty() {
                    continue;
                }
                let append = oai_realtime::InputAudioBufferAppendEvent {
                    audio: audio_utils::encode_f32_to_base64_i16(&pcm),
                    event_id: None,
                };
                openai_tx
                    .send(WsMessage::Text(serde_json::to_string(&OAIClientEvent::InputAudioBufferAppend(append))?.into()))
                    .await?;
            },
            msg = openai_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let Ok(server_event) = serde_json::from_str::<OAIServerEvent>(&text) else {
                            continue;
                        };
                        if let Some(result) = interpret(server_event, &mut partial) {
                            if result.text.is_empty() {
                                continue;
                            }
                            if events.send(result).await.is_err() {
                                debug!("Transcript consumer went away");
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "Realtime API closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            },
        }
    }
    let _ = openai_tx.close().await;
    Ok(())
}
