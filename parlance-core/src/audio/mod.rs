//! Microphone capture and voice-activity segmentation.
//!
//! ```text
//! cpal callback ──push_slice──▶ SPSC ring ──▶ segment worker ──▶ chunk channel ──▶ listener
//!   (audio thread)                              (blocking thread)   (bounded)      (dispatch thread)
//! ```
//!
//! The cpal input callback runs on an OS audio thread at elevated priority
//! and must not allocate, block, or perform I/O. It writes straight into a
//! lock-free ring buffer producer; all segmentation and base64 encoding
//! happens on a plain worker thread that drains the consumer half.
//!
//! `cpal::Stream` is `!Send` on most platforms, so the stream is opened and
//! dropped on a dedicated capture thread that the bridge owns.

pub mod encode;
pub mod segmenter;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::{traits::Split, HeapRb};
use tracing::{debug, info, warn};

pub use ringbuf::traits::{Consumer, Producer};

use crate::error::{ParlanceError, Result};
use segmenter::{AudioSegmenter, SegmenterConfig};

/// Producer half, held by the audio callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;
/// Consumer half, held by the segment worker.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^20 f32 samples ≈ 65 s at 16 kHz. Generous enough that a stalled worker
/// never forces the audio callback to drop frames under normal operation.
pub const RING_CAPACITY: usize = 1 << 20;

pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Block size fed to the segmenter, matching the capture granularity the
/// segmenter's thresholds are tuned for (8 ms at 16 kHz).
const SEGMENT_BLOCK: usize = 128;

/// Backstop flush interval. Whatever the voice-activity state, buffered audio
/// older than this goes out, bounding chunk latency during long speech.
const INTERVAL_FLUSH: Duration = Duration::from_millis(200);

/// Sleep when the ring is empty, to avoid spinning a core.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Output of the capture pipeline, delivered to the registered listener on a
/// dedicated dispatch thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkMessage {
    /// One base64 PCM16 audio chunk ready to send.
    Chunk(String),
    /// The pipeline hit an unrecoverable error and stopped producing.
    Error(String),
}

pub type ChunkListener = Box<dyn Fn(ChunkMessage) + Send + 'static>;

/// Owns the capture/segmentation threads for one recording session.
///
/// `start_conversion` opens the default microphone; `start_with_consumer`
/// accepts an externally filled ring instead, for hosts that bring their own
/// capture (and for tests). Either way, chunks flow to the listener until
/// `stop_conversion`, which drains remaining audio, emits a final flush, and
/// joins all threads.
pub struct CaptureBridge {
    running: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Default for CaptureBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBridge {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            capture: None,
            worker: None,
            dispatcher: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open the default microphone and start streaming chunks to `listener`.
    pub fn start_conversion(
        &mut self,
        config: SegmenterConfig,
        listener: ChunkListener,
    ) -> Result<()> {
        if self.is_recording() {
            return Err(ParlanceError::AlreadyRecording);
        }

        let (producer, consumer) = create_audio_ring();
        self.running.store(true, Ordering::Release);

        // The stream is !Send: open it on the thread that will drop it, and
        // report success/failure back before start_conversion returns.
        let (confirm_tx, confirm_rx) = bounded::<Result<u32>>(1);
        let running = Arc::clone(&self.running);
        let capture = std::thread::Builder::new()
            .name("parlance-capture".into())
            .spawn(move || match AudioCapture::open_default(producer, Arc::clone(&running)) {
                Ok(capture) => {
                    let _ = confirm_tx.send(Ok(capture.sample_rate));
                    while running.load(Ordering::Acquire) {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    capture.stop();
                }
                Err(e) => {
                    running.store(false, Ordering::Release);
                    let _ = confirm_tx.send(Err(e));
                }
            })
            .map_err(|e| ParlanceError::AudioStream(e.to_string()))?;

        let sample_rate = match confirm_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = capture.join();
                return Err(e);
            }
            Err(_) => {
                self.running.store(false, Ordering::Release);
                let _ = capture.join();
                return Err(ParlanceError::AudioStream(
                    "timed out opening input device".into(),
                ));
            }
        };
        info!(sample_rate, "microphone capture started");

        self.capture = Some(capture);
        self.spawn_pipeline(consumer, config, listener)
    }

    /// Start streaming from an externally filled ring consumer.
    pub fn start_with_consumer(
        &mut self,
        consumer: AudioConsumer,
        config: SegmenterConfig,
        listener: ChunkListener,
    ) -> Result<()> {
        if self.is_recording() {
            return Err(ParlanceError::AlreadyRecording);
        }
        self.running.store(true, Ordering::Release);
        self.spawn_pipeline(consumer, config, listener)
    }

    fn spawn_pipeline(
        &mut self,
        consumer: AudioConsumer,
        config: SegmenterConfig,
        listener: ChunkListener,
    ) -> Result<()> {
        let (chunk_tx, chunk_rx) = bounded::<ChunkMessage>(CHUNK_CHANNEL_CAPACITY);

        let running = Arc::clone(&self.running);
        let worker = std::thread::Builder::new()
            .name("parlance-segment".into())
            .spawn(move || run_segment_worker(consumer, config, running, chunk_tx))
            .map_err(|e| ParlanceError::AudioStream(e.to_string()))?;

        let dispatcher = std::thread::Builder::new()
            .name("parlance-dispatch".into())
            .spawn(move || dispatch_chunks(chunk_rx, listener))
            .map_err(|e| ParlanceError::AudioStream(e.to_string()))?;

        self.worker = Some(worker);
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    /// Stop capturing. Remaining ring audio is segmented, a final flush is
    /// delivered, and all threads are joined before this returns.
    pub fn stop_conversion(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(capture) = self.capture.take() {
            let _ = capture.join();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // The worker dropping its sender ends the dispatch loop.
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        debug!("capture bridge stopped");
    }
}

impl Drop for CaptureBridge {
    fn drop(&mut self) {
        self.stop_conversion();
    }
}

/// Drain the ring in fixed blocks, segment, and push chunks to the channel.
/// Runs until `running` clears, then drains whatever is left and emits the
/// final flush.
fn run_segment_worker(
    mut consumer: AudioConsumer,
    config: SegmenterConfig,
    running: Arc<AtomicBool>,
    chunk_tx: Sender<ChunkMessage>,
) {
    let mut segmenter = AudioSegmenter::new(config);
    let mut scratch = vec![0f32; SEGMENT_BLOCK];
    let mut pending: Vec<f32> = Vec::with_capacity(SEGMENT_BLOCK * 4);
    let epoch = Instant::now();
    let mut last_interval_flush = Instant::now();

    while running.load(Ordering::Acquire) {
        let popped = consumer.pop_slice(&mut scratch);
        if popped == 0 {
            std::thread::sleep(EMPTY_SLEEP);
        } else {
            pending.extend_from_slice(&scratch[..popped]);
        }

        while pending.len() >= SEGMENT_BLOCK {
            let block: Vec<f32> = pending.drain(..SEGMENT_BLOCK).collect();
            if !process_one_block(&mut segmenter, &block, epoch, &chunk_tx, &running) {
                return;
            }
        }

        if last_interval_flush.elapsed() >= INTERVAL_FLUSH {
            if let Some(chunk) = segmenter.flush() {
                if chunk_tx.send(ChunkMessage::Chunk(chunk)).is_err() {
                    return;
                }
            }
            last_interval_flush = Instant::now();
        }
    }

    // Teardown drain: everything still in the ring, then the final flush.
    loop {
        let popped = consumer.pop_slice(&mut scratch);
        if popped == 0 {
            break;
        }
        pending.extend_from_slice(&scratch[..popped]);
    }
    while pending.len() >= SEGMENT_BLOCK {
        let block: Vec<f32> = pending.drain(..SEGMENT_BLOCK).collect();
        if !process_one_block(&mut segmenter, &block, epoch, &chunk_tx, &running) {
            return;
        }
    }
    if !pending.is_empty() {
        let tail = std::mem::take(&mut pending);
        if !process_one_block(&mut segmenter, &tail, epoch, &chunk_tx, &running) {
            return;
        }
    }
    if let Some(chunk) = segmenter.finish() {
        let _ = chunk_tx.send(ChunkMessage::Chunk(chunk));
    }
}

/// Returns false when the worker should exit (listener gone or panic).
fn process_one_block(
    segmenter: &mut AudioSegmenter,
    block: &[f32],
    epoch: Instant,
    chunk_tx: &Sender<ChunkMessage>,
    running: &AtomicBool,
) -> bool {
    let now = epoch.elapsed();
    match catch_unwind(AssertUnwindSafe(|| segmenter.process_block(block, now))) {
        Ok(Some(chunk)) => chunk_tx.send(ChunkMessage::Chunk(chunk)).is_ok(),
        Ok(None) => true,
        Err(_) => {
            warn!("segment worker panicked while processing a block");
            running.store(false, Ordering::Release);
            let _ = chunk_tx.send(ChunkMessage::Error(
                "audio segmentation failed, capture stopped".into(),
            ));
            false
        }
    }
}

fn dispatch_chunks(chunk_rx: Receiver<ChunkMessage>, listener: ChunkListener) {
    for message in chunk_rx {
        listener(message);
    }
}

/// Handle to an active cpal input stream.
///
/// Not `Send`: the stream is bound to its creation thread on Windows/macOS,
/// so this is created and dropped on the bridge's capture thread.
#[cfg(feature = "audio-cpal")]
pub struct AudioCapture {
    _stream: cpal::Stream,
    running: Arc<AtomicBool>,
    /// Capture rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open the default input device and push mono f32 frames into `producer`.
    pub fn open_default(mut producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use cpal::{SampleFormat, SampleRate, StreamConfig};

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(ParlanceError::NoDefaultInputDevice)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| ParlanceError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_cb = Arc::clone(&running);
        let mut mix_buf: Vec<f32> = Vec::new();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    mix_to_mono(data, channels, &mut mix_buf, |s| s);
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!("ring full: dropped {} frames", mix_buf.len() - written);
                    }
                },
                |err| warn!("input stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    mix_to_mono(data, channels, &mut mix_buf, |s| s as f32 / 32768.0);
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!("ring full: dropped {} frames", mix_buf.len() - written);
                    }
                },
                |err| warn!("input stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(ParlanceError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ParlanceError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ParlanceError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Signal the callback to no-op; the stream itself dies with the handle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled. Hosts then use
/// `start_with_consumer` with their own capture.
#[cfg(not(feature = "audio-cpal"))]
pub struct AudioCapture {
    running: Arc<AtomicBool>,
    pub sample_rate: u32,
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_default(_producer: AudioProducer, _running: Arc<AtomicBool>) -> Result<Self> {
        Err(ParlanceError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Interleaved multi-channel to mono mixdown into a reused scratch buffer.
/// No allocation after the first callback at steady buffer sizes.
#[cfg(feature = "audio-cpal")]
fn mix_to_mono<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    if channels <= 1 {
        out.resize(data.len(), 0.0);
        for (dst, src) in out.iter_mut().zip(data) {
            *dst = to_f32(*src);
        }
        return;
    }
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for frame in 0..frames {
        let base = frame * channels;
        let mut sum = 0f32;
        for ch in 0..channels {
            sum += to_f32(data[base + ch]);
        }
        out[frame] = sum / channels as f32;
    }
}
