//! H.264 encoder backends and their rate-control options.

use super::bitrate::BitratePlan;
use crate::config::VideoConfig;

/// Encoder family, decided by the FFmpeg encoder name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderBackend {
    Nvenc,
    Amf,
    Qsv,
    X264,
    /// Any other encoder, driven with plain bitrate targets
    Generic(String),
}

impl EncoderBackend {
    pub fn from_name(name: &str) -> Self {
        match name {
            "h264_nvenc" => Self::Nvenc,
            "h264_amf" => Self::Amf,
            "h264_qsv" => Self::Qsv,
            "libx264" => Self::X264,
            other => Self::Generic(other.to_string()),
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Nvenc | Self::Amf | Self::Qsv)
    }
}

/// Everything set on the encoder before it is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Context `bit_rate`, 0 means quality-driven
    pub bit_rate: usize,
    /// Context `rc_max_rate`, 0 leaves it unset
    pub max_bit_rate: usize,
    /// Options passed to `avcodec_open2`
    pub options: Vec<(&'static str, String)>,
}

impl EncoderSettings {
    pub fn for_backend(backend: &EncoderBackend, plan: &BitratePlan, settings: &VideoConfig) -> Self {
        let q = settings.hw_quality;
        let target = plan.target as usize;

        match backend {
            EncoderBackend::Nvenc => Self {
                bit_rate: target,
                max_bit_rate: plan.max as usize,
                options: vec![
                    ("preset", "p4".to_string()),
                    ("tune", "hq".to_string()),
                    ("rc", "vbr".to_string()),
                    ("cq", q.to_string()),
                    ("maxrate", plan.max.to_string()),
                    ("bufsize", plan.bufsize.to_string()),
                    ("bf", "0".to_string()),
                ],
            },
            EncoderBackend::Amf => Self {
                bit_rate: target,
                max_bit_rate: 0,
                options: vec![
                    ("quality", "balanced".to_string()),
                    ("rc", "vbr_latency".to_string()),
                    ("qp_i", q.saturating_sub(2).to_string()),
                    ("qp_p", q.to_string()),
                    ("qp_b", q.saturating_add(2).min(51).to_string()),
                    ("bf", "0".to_string()),
                ],
            },
            EncoderBackend::Qsv => Self {
                bit_rate: target,
                max_bit_rate: 0,
                options: vec![
                    ("preset", "fast".to_string()),
                    ("global_quality", q.to_string()),
                    ("bf", "0".to_string()),
                ],
            },
            EncoderBackend::X264 => Self {
                bit_rate: 0,
                max_bit_rate: plan.max as usize,
                options: vec![
                    ("crf", settings.crf.to_string()),
                    ("preset", settings.preset.clone()),
                    ("tune", "fastdecode".to_string()),
                    ("maxrate", plan.max.to_string()),
                    ("bufsize", plan.bufsize.to_string()),
                ],
            },
            EncoderBackend::Generic(_) => Self {
                bit_rate: target,
                max_bit_rate: plan.max as usize,
                options: vec![("bufsize", plan.bufsize.to_string())],
            },
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}
