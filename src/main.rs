//! wavefeed - play an audio file through a streaming buffer
//!
//! Decodes the file on the worker pool, receives the buffer on the main
//! thread (acting as the delivery thread) and plays it with cpal through a
//! [`SoundInstance`] rendered from the output callback.
//!
//! Usage: `wavefeed <file> [--float]`

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use dasp_sample::{FromSample, Sample};
use thiserror::Error;

use wavefeed::audio::{CodecRegistry, DecodeError, PcmFormat, SoundInstance};
use wavefeed::pipeline::{delivery_queue, DecodeJob, DecodePipeline, WorkerPool};
use wavefeed::settings::StreamSettings;

/// Errors that end playback
#[derive(Error, Debug)]
enum PlayerError {
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] std::io::Error),

    #[error("Failed to decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("No output device available")]
    NoDevice,

    #[error("Failed to get output config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("Unsupported output sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("Failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("Failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Starting wavefeed");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(path) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("usage: wavefeed <file> [--float]");
        return ExitCode::FAILURE;
    };

    let mut settings = StreamSettings::load();
    if args.iter().any(|a| a == "--float") {
        settings.output_format = PcmFormat::Float32;
    }

    match play(path, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn play(path: &str, settings: StreamSettings) -> Result<(), PlayerError> {
    let pool = WorkerPool::new(settings.worker_threads)?;
    let (queue, pump) = delivery_queue();
    let pipeline = DecodePipeline::new(&pool, queue, CodecRegistry::default(), settings);

    let (tx, rx) = crossbeam_channel::bounded(1);
    pipeline.request_detailed(DecodeJob::from_path(path), move |result| {
        let _ = tx.send(result);
    });

    // This thread owns buffer construction, so it drives the delivery queue
    let buffer = loop {
        pump.pump_timeout(Duration::from_millis(50));
        if let Ok(result) = rx.try_recv() {
            break result?;
        }
    };
    pool.shutdown();

    let Some(descriptor) = buffer.descriptor() else {
        return Err(PlayerError::Decode(DecodeError::DecodeEngineFailure(
            "buffer delivered without stream metadata".to_string(),
        )));
    };
    let sound = Arc::new(SoundInstance::new(buffer));

    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(PlayerError::NoDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using output device: {}", device_name);

    let config = cpal::StreamConfig {
        channels: descriptor.channels,
        sample_rate: cpal::SampleRate(descriptor.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match device.default_output_config()?.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&sound))?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&sound))?,
        format => return Err(PlayerError::UnsupportedFormat(format)),
    };
    sound.play();
    stream.play()?;

    log::info!(
        "Playing {:.2}s ({} Hz, {} ch)",
        descriptor.duration_secs(),
        descriptor.sample_rate,
        descriptor.channels
    );
    thread::sleep(descriptor.duration + Duration::from_millis(250));

    log::info!("Done, {} underrun(s)", sound.buffer().underrun_count());
    Ok(())
}

/// Output stream whose callback renders `sound`
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sound: Arc<SoundInstance>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + FromSample<i16> + FromSample<f32>,
{
    let format = sound.buffer().format();
    let width = format.byte_width();
    let mut scratch: Vec<u8> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let need = data.len() * width;
            if scratch.len() < need {
                scratch.resize(need, 0);
            }

            // Each pull is capped by the generate ceiling, so keep pulling
            let mut filled = 0;
            while filled < need {
                let n = sound.render(&mut scratch[filled..need]);
                if n == 0 {
                    break;
                }
                filled += n;
            }
            scratch[filled..need].fill(0);

            for (out, bytes) in data.iter_mut().zip(scratch[..need].chunks_exact(width)) {
                *out = match format {
                    PcmFormat::Int16 => T::from_sample(i16::from_le_bytes([bytes[0], bytes[1]])),
                    PcmFormat::Float32 => {
                        T::from_sample(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                    }
                };
            }
        },
        |err| log::error!("Audio output error: {}", err),
        None,
    )
}
