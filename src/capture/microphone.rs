// src/capture/microphone.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::capture::wav::WavBlobWriter;
use crate::capture::{CaptureReceiver, Microphone, MicrophoneStream};
use crate::error::EngineError;

const RING_CAPACITY: usize = 192_000;

/// Default system input device.
#[derive(Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn request_access(&mut self) -> Result<Box<dyn MicrophoneStream>, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| EngineError::PermissionDenied("no input device available".into()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| EngineError::PermissionDenied(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        info!(
            channels = config.channels,
            sample_rate = config.sample_rate.0,
            ?sample_format,
            "Microphone opened."
        );
        Ok(Box::new(CpalMicrophoneStream {
            started: false,
            config,
            sample_format,
            stop: Arc::new(AtomicBool::new(false)),
            done: None,
            worker: None,
        }))
    }
}

/// The cpal stream lives on its own capture thread; this handle only owns
/// the stop flag and the completion channel.
pub struct CpalMicrophoneStream {
    started: bool,
    config: StreamConfig,
    sample_format: SampleFormat,
    stop: Arc<AtomicBool>,
    done: Option<CaptureReceiver>,
    worker: Option<thread::JoinHandle<()>>,
}

impl MicrophoneStream for CpalMicrophoneStream {
    fn start(&mut self) -> Result<()> {
        if self.started {
            anyhow::bail!("microphone stream already started");
        }
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let stop = self.stop.clone();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let worker = thread::Builder::new()
            .name("studiomix-capture".into())
            .spawn(move || capture_thread(config, sample_format, stop, ready_tx, done_tx))?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("capture thread exited during startup"))??;
        self.started = true;
        self.done = Some(done_rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(mut self: Box<Self>) -> CaptureReceiver {
        self.stop.store(true, Ordering::Release);
        // The worker reports through the channel; it is not joined here so
        // stopping never blocks the caller.
        drop(self.worker.take());
        match self.done.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(anyhow!("microphone was never started")));
                rx
            }
        }
    }
}

fn capture_thread(
    config: StreamConfig,
    sample_format: SampleFormat,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<()>>,
    done: oneshot::Sender<Result<Vec<u8>>>,
) {
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    let (producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();

    // cpal streams are not Send, so the device is opened on this thread.
    let Some(device) = cpal::default_host().default_input_device() else {
        let _ = ready.send(Err(anyhow!("input device disappeared")));
        return;
    };
    let stream = match build_input_stream(&device, &config, sample_format, producer) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(e.into()));
        return;
    }
    let _ = ready.send(Ok(()));

    let mut writer = WavBlobWriter::new(sample_rate, channels);
    let mut tmp = vec![0.0f32; 4096];
    while !stop.load(Ordering::Acquire) {
        let popped = consumer.pop_slice(&mut tmp);
        if popped == 0 {
            thread::sleep(Duration::from_millis(5));
            continue;
        }
        writer.write(&tmp[..popped]);
    }

    // Stop capture, then drain what is still buffered.
    drop(stream);
    loop {
        let popped = consumer.pop_slice(&mut tmp);
        if popped == 0 {
            break;
        }
        writer.write(&tmp[..popped]);
    }

    debug!(frames = writer.frames(), "Microphone capture finished.");
    if done.send(writer.finish()).is_err() {
        warn!("Capture result dropped: nobody was waiting for it.");
    }
}

fn build_input_stream<P>(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    producer: P,
) -> Result<Stream>
where
    P: Producer<Item = f32> + Send + 'static,
{
    match sample_format {
        SampleFormat::F32 => build_typed::<f32, P>(device, config, producer),
        SampleFormat::I16 => build_typed::<i16, P>(device, config, producer),
        SampleFormat::U16 => build_typed::<u16, P>(device, config, producer),
        other => anyhow::bail!("Unsupported sample format: {:?}", other),
    }
}

fn build_typed<T, P>(device: &Device, config: &StreamConfig, mut producer: P) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
    P: Producer<Item = f32> + Send + 'static,
{
    let err_fn = |err| error!(%err, "Input stream error.");
    let mut conv: Vec<f32> = Vec::with_capacity(4096);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            conv.clear();
            conv.extend(data.iter().map(|&s| s.to_sample::<f32>()));
            // Full ring: the remainder is dropped rather than blocking.
            let _ = producer.push_slice(&conv);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
