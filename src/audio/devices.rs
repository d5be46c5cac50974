//! Live input capture. The device callback is the external producer: it
//! copies each buffer into an owned [`CapturedChunk`] and sends it down a
//! channel that the analysis thread drains.

use std::sync::mpsc::Sender;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, Stream, StreamConfig};

use super::processor::{AudioChunk, StreamFormat};

/// A buffer handed over from the audio callback.
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub samples: Vec<f32>,
    pub format: StreamFormat,
    pub time_offset: f64,
}

impl CapturedChunk {
    pub fn as_chunk(&self) -> AudioChunk<'_> {
        AudioChunk::new(&self.samples, self.format, self.time_offset)
    }
}

pub fn list_input_devices(host: &Host) -> Vec<String> {
    let mut devices = Vec::new();

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                devices.push(name);
            }
        }
    }

    devices
}

/// Find an input device by exact name, or the host default when `name` is `None`.
pub fn get_input_device(host: &Host, name: Option<&str>) -> Option<Device> {
    let Some(name) = name else {
        return host.default_input_device();
    };

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(device_name) = device.name() {
                if device_name == name {
                    return Some(device);
                }
            }
        }
    }

    None
}

/// Open `device` with its default configuration and start streaming chunks
/// into `sender`. Dropping the returned stream stops capture.
pub fn start_capture(device: &Device, sender: Sender<CapturedChunk>) -> Result<Stream, String> {
    let input_config = device
        .default_input_config()
        .map_err(|e| format!("Failed to get input config: {}", e))?;

    if input_config.sample_format() != SampleFormat::F32 {
        return Err("Input device doesn't support F32 format".to_string());
    }

    let stream_config: StreamConfig = input_config.config();
    let format = StreamFormat::new(stream_config.sample_rate.0, stream_config.channels);
    log::info!(
        "Capturing from {} at {} Hz, {} channels",
        device.name().unwrap_or_else(|_| "<unnamed>".to_string()),
        format.sample_rate,
        format.channels
    );

    let mut frames_sent: u64 = 0;
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let chunk = CapturedChunk {
                    samples: data.to_vec(),
                    format,
                    time_offset: frames_sent as f64 / format.sample_rate as f64,
                };
                frames_sent += (data.len() / format.channels.max(1) as usize) as u64;

                if sender.send(chunk).is_err() {
                    log::debug!("Analysis side hung up; dropping captured buffer");
                }
            },
            |err| log::error!("Input stream error: {}", err),
            None,
        )
        .map_err(|e| format!("Failed to build input stream: {}", e))?;

    stream
        .play()
        .map_err(|e| format!("Failed to start input stream: {}", e))?;

    Ok(stream)
}
