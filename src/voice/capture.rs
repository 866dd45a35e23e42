//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::frame::{FrameAssembler, FrameSink, SAMPLE_RATE};
use crate::{Error, Result};

/// A source of captured frames that can be opened once per listening phase
pub trait AudioInput {
    /// Start delivering frames into `sink` until the returned handle is closed
    ///
    /// # Errors
    ///
    /// Returns error if the capture stream cannot be opened
    fn open(&mut self, sink: FrameSink) -> Result<Box<dyn ActiveCapture>>;
}

/// An open capture stream
pub trait ActiveCapture {
    /// Stop the stream; no frames are offered after this returns
    fn close(self: Box<Self>);
}

/// Captures audio from the default input device
pub struct CpalInput {
    device: Device,
    config: StreamConfig,
    frame_samples: usize,
}

impl CpalInput {
    /// Open the default input device at 16kHz mono
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(frame_samples: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            frame_samples,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            frame_samples,
        })
    }

    /// Samples per emitted frame
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

impl AudioInput for CpalInput {
    fn open(&mut self, sink: FrameSink) -> Result<Box<dyn ActiveCapture>> {
        let mut assembler = FrameAssembler::new(self.frame_samples);
        let data_sink = sink.clone();

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push_f32(data, |frame| {
                        data_sink.offer(frame);
                    });
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    sink.fault(err.to_string());
                },
                None,
            )
            .map_err(|e| Error::Capture(e.to_string()))?;

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;

        tracing::debug!("audio capture started");
        Ok(Box::new(CpalCapture { stream }))
    }
}

/// Open cpal input stream
struct CpalCapture {
    stream: Stream,
}

impl ActiveCapture for CpalCapture {
    fn close(self: Box<Self>) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "failed to pause capture stream");
        }
        drop(self.stream);
        tracing::debug!("audio capture stopped");
    }
}

/// Encode 16-bit PCM samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_roundtrip_header() {
        let samples = vec![0i16, 1000, -1000, 32767];
        let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 4);
    }
}
