//! Audio device management using cpal.
//!
//! The manager is an explicitly owned value: it opens the default
//! capture and playback devices on demand and tears everything down
//! deterministically when the returned handles drop. There is no
//! module-level mixer state.
//!
//! cpal streams are `!Send`, so each opened path spawns a dedicated
//! thread that owns its stream and parks until told to stop.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::error::AudioError;
use crate::traits::{AudioBackend, CaptureHandle, FrameCallback, PlaybackSink};
use crate::types::{AudioFrame, SAMPLE_RATE_HZ};

/// Playback-side buffer between the drain thread and the device
/// callback, in samples. Half a second at 16kHz; `write` blocks once
/// it fills, which is what paces the drain loop to real time.
const PLAYBACK_CHANNEL_SAMPLES: usize = (SAMPLE_RATE_HZ / 2) as usize;

/// Owns access to the default capture and playback devices.
pub struct AudioDeviceManager;

impl AudioDeviceManager {
    /// Probe the default devices. Fails early if either is missing so a
    /// slot can be skipped before its session opens.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        if host.default_input_device().is_none() {
            return Err(AudioError::NoInputDevice.into());
        }
        if host.default_output_device().is_none() {
            return Err(AudioError::NoOutputDevice.into());
        }
        Ok(Self)
    }
}

impl AudioBackend for AudioDeviceManager {
    fn open_playback(&mut self) -> Result<Box<dyn PlaybackSink>> {
        let (sample_tx, sample_rx) = mpsc::sync_channel::<i16>(PLAYBACK_CHANNEL_SAMPLES);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let thread = std::thread::spawn(move || {
            run_playback_thread(sample_rx, stop_rx, ready_tx);
        });

        wait_ready(ready_rx, "playback")?;
        Ok(Box::new(CpalPlaybackSink {
            sample_tx,
            stop_tx,
            thread: Some(thread),
        }))
    }

    fn open_capture(&mut self, on_frame: FrameCallback) -> Result<Box<dyn CaptureHandle>> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let thread = std::thread::spawn(move || {
            run_capture_thread(on_frame, stop_rx, ready_tx);
        });

        wait_ready(ready_rx, "capture")?;
        Ok(Box::new(CpalCaptureGuard {
            stop_tx,
            thread: Some(thread),
        }))
    }
}

fn wait_ready(ready_rx: Receiver<Result<(), String>>, path: &str) -> Result<()> {
    match ready_rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AudioError::Device(format!("{path} path: {e}")).into()),
        Err(_) => Err(AudioError::Device(format!("{path} thread failed to start")).into()),
    }
}

fn run_playback_thread(
    sample_rx: Receiver<i16>,
    stop_rx: Receiver<()>,
    ready_tx: mpsc::Sender<Result<(), String>>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err("no output device".to_string()));
            return;
        }
    };

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(SAMPLE_RATE_HZ),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream_result = device
        .build_output_stream(
            &config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in out.iter_mut() {
                    *sample = sample_rx
                        .try_recv()
                        .map(|s| f32::from(s) / f32::from(i16::MAX))
                        .unwrap_or(0.0);
                }
            },
            |err| error!("playback stream error: {err}"),
            None,
        )
        .map_err(anyhow::Error::from)
        .and_then(|s| {
            s.play()?;
            Ok(s)
        });

    let _stream = match stream_result {
        Ok(s) => {
            let _ = ready_tx.send(Ok(()));
            s
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    info!("playback stream started");
    // Stream lives until the sink drops and the stop channel closes.
    let _ = stop_rx.recv();
    debug!("playback thread exiting");
}

fn run_capture_thread(
    on_frame: FrameCallback,
    stop_rx: Receiver<()>,
    ready_tx: mpsc::Sender<Result<(), String>>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err("no input device".to_string()));
            return;
        }
    };

    let (config, sample_format) = match input_config(&device) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    let rate = config.sample_rate.0;
    let stream_result = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_frame(to_frame(data, rate));
            },
            |err| error!("capture stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> =
                    data.iter().map(|&s| f32::from(s) / f32::from(i16::MAX)).collect();
                on_frame(to_frame(&samples, rate));
            },
            |err| error!("capture stream error: {err}"),
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(format!("unsupported sample format: {other:?}")));
            return;
        }
    };

    let _stream = match stream_result.map_err(anyhow::Error::from).and_then(|s| {
        s.play()?;
        Ok(s)
    }) {
        Ok(s) => {
            let _ = ready_tx.send(Ok(()));
            s
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    info!("capture stream started");
    match stop_rx.recv() {
        Ok(()) => debug!("capture thread received stop signal"),
        Err(_) => warn!("capture stop channel closed"),
    }
}

fn input_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let supported: Vec<_> = device.supported_input_configs()?.collect();
    let chosen = supported
        .iter()
        .filter(|c| c.channels() <= 2)
        .find(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .ok_or_else(|| anyhow!("no supported audio input config found"))?;

    let desired = SampleRate(SAMPLE_RATE_HZ);
    let sample_rate =
        if chosen.min_sample_rate() <= desired && desired <= chosen.max_sample_rate() {
            desired
        } else {
            chosen.min_sample_rate()
        };

    Ok((
        StreamConfig {
            channels: std::cmp::min(1, chosen.channels()),
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        },
        chosen.sample_format(),
    ))
}

/// Normalize captured samples to a 16kHz mono i16 frame.
fn to_frame(samples: &[f32], source_rate: u32) -> AudioFrame {
    let resampled: Vec<i16> = if source_rate == SAMPLE_RATE_HZ {
        samples.iter().map(|&s| to_i16(s)).collect()
    } else {
        let ratio = source_rate as f32 / SAMPLE_RATE_HZ as f32;
        let output_len = (samples.len() as f32 / ratio) as usize;
        (0..output_len)
            .map(|i| {
                let src = (i as f32 * ratio) as usize;
                to_i16(samples.get(src).copied().unwrap_or(0.0))
            })
            .collect()
    };
    AudioFrame::new(resampled)
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

struct CpalPlaybackSink {
    sample_tx: SyncSender<i16>,
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackSink for CpalPlaybackSink {
    fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        for &sample in frame.samples() {
            self.sample_tx
                .send(sample)
                .map_err(|_| AudioError::Device("playback stream closed".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct CpalCaptureGuard {
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle for CpalCaptureGuard {}

impl Drop for CpalCaptureGuard {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
