//! Microphone capture through the default `cpal` input device.
//!
//! `cpal` streams are not `Send` on every platform, so the stream lives on a
//! dedicated thread for the whole capture and is dropped there on stop.

use async_trait::async_trait;
use cpal::{
    FromSample, Sample, SampleFormat, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use voicecraft_core::{
    error::VoiceError,
    speech::{AudioBuffer, AudioCapture, PermissionGate},
};

const BUFFER_CHANNEL_CAPACITY: usize = 64;

/// Treats the presence of a default input device as granted access.
pub struct DevicePermission;

#[async_trait]
impl PermissionGate for DevicePermission {
    async fn request_microphone(&self) -> bool {
        tokio::task::spawn_blocking(|| cpal::default_host().default_input_device().is_some())
            .await
            .unwrap_or(false)
    }
}

struct Worker {
    stop: std::sync::mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

#[derive(Default)]
pub struct MicrophoneCapture {
    config: Option<cpal::SupportedStreamConfig>,
    worker: Option<Worker>,
}

impl MicrophoneCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioCapture for MicrophoneCapture {
    async fn prepare(&mut self) -> Result<(), VoiceError> {
        let config = tokio::task::spawn_blocking(|| {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| VoiceError::AudioSetupFailure("no default input device".into()))?;
            let name = device.name().unwrap_or_else(|_| "unknown".into());
            let config = device
                .default_input_config()
                .map_err(|e| VoiceError::AudioSetupFailure(e.to_string()))?;
            info!(device = %name, sample_rate = config.sample_rate().0, channels = config.channels(), "Input device configured");
            Ok::<_, VoiceError>(config)
        })
        .await
        .map_err(|e| VoiceError::AudioSetupFailure(e.to_string()))??;

        self.config = Some(config);
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBuffer>, VoiceError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| VoiceError::AudioSetupFailure("capture was not prepared".into()))?;
        let (tx, rx) = mpsc::channel(BUFFER_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match open_stream(&config, tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop is requested or the capture handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Capture thread finished");
            })
            .map_err(|e| VoiceError::AudioSetupFailure(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| VoiceError::AudioSetupFailure("capture thread exited".into()))??;
        self.worker = Some(Worker { stop, thread });
        info!("Microphone capture started");
        Ok(rx)
    }

    async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.stop.send(());
        if tokio::task::spawn_blocking(move || worker.thread.join())
            .await
            .is_err()
        {
            warn!("Capture thread did not shut down cleanly");
        }
        info!("Microphone capture stopped");
    }
}

fn open_stream(
    supported: &cpal::SupportedStreamConfig,
    tx: mpsc::Sender<AudioBuffer>,
) -> Result<cpal::Stream, VoiceError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::AudioSetupFailure("input device disappeared".into()))?;
    let config = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, tx),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, tx),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, tx),
        other => {
            return Err(VoiceError::AudioSetupFailure(format!(
                "unsupported sample format {other}"
            )));
        }
    }
    .map_err(|e| VoiceError::AudioSetupFailure(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceError::AudioSetupFailure(e.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::Sender<AudioBuffer>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let buffer = AudioBuffer {
                samples: data.iter().map(|s| f32::from_sample(*s)).collect(),
                sample_rate,
                channels,
            };
            // A full channel means the transcriber is behind; dropping audio
            // beats blocking the device callback.
            let _ = tx.try_send(buffer);
        },
        |err| error!(error = %err, "Audio input stream error"),
        None,
    )
}
