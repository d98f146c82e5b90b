//! Bitrate planning from the measured source rate.

use crate::config::VideoConfig;

/// What is known about the source before encoding starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitrateProbe {
    /// Bitrate declared by the video stream, bits/s
    pub stream_bit_rate: i64,
    /// Bitrate declared by the container, bits/s
    pub container_bit_rate: i64,
    /// Source file size in bytes
    pub file_size: u64,
    /// Container duration in microseconds
    pub duration_us: i64,
}

impl BitrateProbe {
    /// Best available estimate of the source bitrate, `None` if nothing is known
    pub fn source_bitrate(&self) -> Option<u64> {
        if self.stream_bit_rate > 0 {
            return Some(self.stream_bit_rate as u64);
        }
        if self.container_bit_rate > 0 {
            return Some(self.container_bit_rate as u64);
        }
        if self.file_size > 0 && self.duration_us > 0 {
            let seconds = self.duration_us as f64 / 1_000_000.0;
            return Some(((self.file_size * 8) as f64 / seconds) as u64);
        }
        None
    }
}

/// Rate-control targets handed to the encoder, all in bits/s (buffer in bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitratePlan {
    /// Clamped source bitrate the plan is derived from
    pub source: u64,
    pub target: u64,
    pub max: u64,
    pub bufsize: u64,
}

impl BitratePlan {
    pub fn compute(probe: &BitrateProbe, settings: &VideoConfig) -> Self {
        let source = probe
            .source_bitrate()
            .unwrap_or(0)
            .clamp(settings.min_bitrate, settings.max_bitrate);

        let target = (source as f64 * settings.target_ratio).round() as u64;
        let max = settings
            .maxrate
            .unwrap_or((source as f64 * settings.max_ratio).round() as u64);
        let bufsize = settings.bufsize.unwrap_or(max * 2);

        Self {
            source,
            target,
            max,
            bufsize,
        }
    }
}
