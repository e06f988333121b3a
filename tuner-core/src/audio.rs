//! # Audio Capture Module
//!
//! Capture collaborators and the glue that turns device callbacks into pooled
//! buffers.
//!
//! ## Features
//! - [`CaptureSource`] trait: start, stop, sample rate, buffer-filled sink
//! - [`FrameAccumulator`]: fills pooled buffers from device slices of any size,
//!   downmixing interleaved channels to mono
//! - [`CpalCapture`]: default input device through CPAL

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfigRange};
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::error::{Result, TunerError};
use crate::float::Float;

/// Sink receiving each filled buffer.
pub type BufferFilledCallback<T> = Box<dyn FnMut(PooledBuffer<T>) + Send>;

/// What a producer does when every pooled buffer is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Wait for a buffer to be released
    Block,
    /// Discard incoming samples until a buffer is free
    Drop,
}

/// A device delivering mono sample buffers.
pub trait CaptureSource {
    /// Registers where filled buffers go. Must be called before [`start`](Self::start).
    fn on_buffer_filled(&mut self, pool: BufferPool<f32>, callback: BufferFilledCallback<f32>);

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Sample rate of the delivered buffers, in Hz.
    fn sample_rate(&self) -> u32;
}

/// Accumulates device samples into pooled buffers.
pub struct FrameAccumulator<T> {
    pool: BufferPool<T>,
    channels: usize,
    backpressure: Backpressure,
    current: Option<PooledBuffer<T>>,
    filled: usize,
    dropped_samples: u64,
    dropping: bool,
    on_filled: BufferFilledCallback<T>,
}

impl<T: Float> FrameAccumulator<T> {
    /// # Panics
    /// If `channels` is zero.
    pub fn new(
        pool: BufferPool<T>,
        channels: usize,
        backpressure: Backpressure,
        on_filled: BufferFilledCallback<T>,
    ) -> Self {
        assert!(channels > 0, "capture needs at least one channel");
        Self {
            pool,
            channels,
            backpressure,
            current: None,
            filled: 0,
            dropped_samples: 0,
            dropping: false,
            on_filled,
        }
    }

    /// Appends interleaved samples; each frame of `channels` samples is averaged.
    ///
    /// A trailing partial frame is ignored.
    pub fn push_interleaved(&mut self, data: &[T]) {
        if self.channels == 1 {
            for &sample in data {
                self.push_sample(sample);
            }
            return;
        }

        let scale = T::cast(1.0 / self.channels as f64);
        for frame in data.chunks_exact(self.channels) {
            let sum: T = frame.iter().copied().sum();
            self.push_sample(sum * scale);
        }
    }

    fn push_sample(&mut self, sample: T) {
        if self.current.is_none() {
            self.current = self.next_buffer();
        }
        let Some(buffer) = self.current.as_mut() else {
            self.dropped_samples += 1;
            return;
        };

        buffer[self.filled] = sample;
        self.filled += 1;
        if self.filled == buffer.len() {
            self.filled = 0;
            if let Some(full) = self.current.take() {
                (self.on_filled)(full);
            }
        }
    }

    fn next_buffer(&mut self) -> Option<PooledBuffer<T>> {
        let buffer = match self.backpressure {
            Backpressure::Block => Some(self.pool.acquire()),
            Backpressure::Drop => self.pool.try_acquire(),
        };
        match (&buffer, self.dropping) {
            (None, false) => {
                warn!("[POOL] No free buffer, dropping captured samples");
                self.dropping = true;
            }
            (Some(_), true) => {
                warn!(
                    "[POOL] Buffer available again after {} dropped samples",
                    self.dropped_samples
                );
                self.dropping = false;
            }
            _ => {}
        }
        buffer
    }

    /// Samples discarded because no buffer was free.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Samples in the buffer currently being filled.
    pub fn pending(&self) -> usize {
        self.filled
    }
}

/// Capture from the default CPAL input device.
///
/// Non-blocking: samples arriving while every buffer is in use are dropped, so
/// the device callback never waits on analysis.
pub struct CpalCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_rate: u32,
    accumulator: Arc<Mutex<Option<FrameAccumulator<f32>>>>,
    stream: Option<cpal::Stream>,
}

impl CpalCapture {
    /// Opens the default input device at the supported rate closest to
    /// `target_rate`.
    ///
    /// # Errors
    /// * [`TunerError::AudioDevice`] if there is no input device or no `f32` format
    pub fn open_default(target_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| TunerError::AudioDevice("No input device available".to_owned()))?;

        let name = device
            .name()
            .unwrap_or_else(|_| "<unnamed device>".to_owned());
        info!("[AUDIO] Using audio input device: {}", name);

        let configs = device
            .supported_input_configs()
            .map_err(|e| TunerError::AudioDevice(e.to_string()))?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, target_rate).ok_or_else(|| {
            TunerError::AudioDevice("No suitable f32 input format found".to_owned())
        })?;

        let rate = target_rate.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
        let config: cpal::StreamConfig = supported.with_sample_rate(SampleRate(rate)).into();
        info!(
            "[AUDIO] Selected {} Hz, {} channel(s)",
            config.sample_rate.0, config.channels
        );

        Ok(Self {
            device,
            sample_rate: config.sample_rate.0,
            config,
            accumulator: Arc::new(Mutex::new(None)),
            stream: None,
        })
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

impl CaptureSource for CpalCapture {
    fn on_buffer_filled(&mut self, pool: BufferPool<f32>, callback: BufferFilledCallback<f32>) {
        let accumulator = FrameAccumulator::new(
            pool,
            usize::from(self.config.channels),
            Backpressure::Drop,
            callback,
        );
        *self.accumulator.lock() = Some(accumulator);
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if self.accumulator.lock().is_none() {
            return Err(TunerError::AudioStream(
                "no buffer-filled callback registered".to_owned(),
            ));
        }

        let accumulator = Arc::clone(&self.accumulator);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Some(accumulator) = accumulator.lock().as_mut() {
                        accumulator.push_interleaved(data);
                    }
                },
                |err| error!("[AUDIO] An error occurred on the audio stream: {}", err),
                None,
            )
            .map_err(|e| TunerError::AudioStream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| TunerError::AudioStream(e.to_string()))?;

        info!("[AUDIO] Capture started at {} Hz", self.sample_rate);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        stream
            .pause()
            .map_err(|e| TunerError::AudioStream(e.to_string()))?;
        drop(stream);
        info!("[AUDIO] Capture stopped");
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("[AUDIO] Error stopping stream: {}", e);
        }
    }
}

/// Picks the `f32` input configuration best suited to `target_rate`.
///
/// Ranges containing the target rate win, then fewer channels, then the
/// closest rate bound.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (distance, c.channels())
        })
}
