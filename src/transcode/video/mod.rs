//! # Video Transcoder
//!
//! Ricodifica la traccia video in H.264 tramite FFmpeg (ffmpeg-next).
//!
//! ## Responsabilità:
//! - Stima del bitrate sorgente e calcolo dei target
//! - Selezione dell'encoder (hardware prima, software come ripiego)
//! - Decodifica, conversione pixel e codifica dei frame
//! - Stream-copy di audio, sottotitoli e altre tracce
//! - Metadati del contenitore copiati nell'output

pub mod bitrate;
pub mod context;
pub mod encoder;

pub use self::bitrate::{BitratePlan, BitrateProbe};
pub use self::context::VideoCompressionContext;
pub use self::encoder::{EncoderBackend, EncoderSettings};

use super::{TranscodeResult, Transcoder};
use crate::config::VideoConfig;
use crate::error::MigrateError;
use ffmpeg_next as ffmpeg;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

static FFMPEG_INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();

/// Register FFmpeg codecs and formats once per process
fn ensure_ffmpeg() -> Result<(), MigrateError> {
    FFMPEG_INIT
        .get_or_init(|| {
            ffmpeg::init()?;
            ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
            Ok(())
        })
        .clone()
        .map_err(MigrateError::ffmpeg("initializing FFmpeg"))
}

pub struct VideoTranscoder {
    settings: VideoConfig,
}

impl VideoTranscoder {
    pub fn new(settings: VideoConfig) -> Self {
        Self { settings }
    }

    /// Decode `input`, re-encode its first video stream and write `output`.
    ///
    /// The output container is picked from the extension of `output`.
    pub fn transcode(&self, input: &Path, output: &Path) -> Result<(), MigrateError> {
        ensure_ffmpeg()?;
        info!("Compressing video: {}", input.display());

        let mut context = VideoCompressionContext::open(input, output, &self.settings)?;
        context.run()?;
        context.flush()?;
        let frames = context.finish()?;

        debug!("Wrote {} frames to {}", frames, output.display());
        Ok(())
    }
}

impl Transcoder for VideoTranscoder {
    fn compress(&self, input: &Path, output: &Path) -> TranscodeResult {
        self.transcode(input, output).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::format::{sample, Pixel, Sample};
    use ffmpeg::{codec, encoder, format, frame, media, ChannelLayout, Dictionary, Packet, Rational};
    use std::fs;
    use tempfile::TempDir;

    const CLIP_FRAMES: i64 = 50;
    const CLIP_FPS: i32 = 25;
    const AUDIO_RATE: i32 = 8000;

    fn transcoder() -> VideoTranscoder {
        VideoTranscoder::new(VideoConfig::default())
    }

    /// Software-only settings that work on any FFmpeg build
    fn portable_settings() -> VideoConfig {
        ensure_ffmpeg().unwrap();
        let codec = if encoder::find_by_name("libx264").is_some() {
            "libx264"
        } else {
            "mpeg4"
        };
        VideoConfig {
            codec: codec.to_string(),
            hardware_encoders: Vec::new(),
            ..VideoConfig::default()
        }
    }

    fn write_packets(
        encoder: &mut encoder::Encoder,
        stream: usize,
        time_base: Rational,
        output: &mut format::context::Output,
    ) {
        let mut packet = Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(stream);
            let out_time_base = output.stream(stream).unwrap().time_base();
            packet.rescale_ts(time_base, out_time_base);
            packet.write_interleaved(output).unwrap();
        }
    }

    /// Write a 64x64 mpeg4 clip of near-lossless noise, optionally with a
    /// silent PCM track, so the re-encode has room to shrink it.
    fn synthesize_clip(path: &Path, with_video: bool, with_audio: bool) {
        ensure_ffmpeg().unwrap();
        let mut output = format::output(&path).unwrap();
        let global_header = output
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);
        let video_tb = Rational::new(1, CLIP_FPS);
        let audio_tb = Rational::new(1, AUDIO_RATE);

        let mut video = if with_video {
            let codec = encoder::find(codec::Id::MPEG4).unwrap();
            let mut setup = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .unwrap();
            setup.set_width(64);
            setup.set_height(64);
            setup.set_format(Pixel::YUV420P);
            setup.set_time_base(video_tb);
            setup.set_frame_rate(Some(Rational::new(CLIP_FPS, 1)));
            setup.set_bit_rate(8_000_000);
            if global_header {
                setup.set_flags(codec::flag::Flags::GLOBAL_HEADER);
            }
            let mut options = Dictionary::new();
            options.set("qmin", "1");
            options.set("qmax", "2");
            let opened = setup.open_as_with(codec, options).unwrap();

            let mut ost = output.add_stream(codec).unwrap();
            ost.set_parameters(&opened);
            ost.set_time_base(video_tb);
            Some((ost.index(), opened))
        } else {
            None
        };

        let mut audio = if with_audio {
            let codec = encoder::find(codec::Id::PCM_S16LE).unwrap();
            let mut setup = codec::context::Context::new_with_codec(codec)
                .encoder()
                .audio()
                .unwrap();
            setup.set_rate(AUDIO_RATE);
            setup.set_format(Sample::I16(sample::Type::Packed));
            setup.set_channel_layout(ChannelLayout::MONO);
            setup.set_time_base(audio_tb);
            let opened = setup.open_as(codec).unwrap();

            let mut ost = output.add_stream(codec).unwrap();
            ost.set_parameters(&opened);
            ost.set_time_base(audio_tb);
            Some((ost.index(), opened))
        } else {
            None
        };

        output.write_header().unwrap();

        let samples_per_frame = (AUDIO_RATE / CLIP_FPS) as usize;
        let mut seed = 0x2545_F491_u32;
        for i in 0..CLIP_FRAMES {
            if let Some((index, encoder)) = video.as_mut() {
                let mut picture = frame::Video::new(Pixel::YUV420P, 64, 64);
                for plane in 0..picture.planes() {
                    for byte in picture.data_mut(plane).iter_mut() {
                        seed ^= seed << 13;
                        seed ^= seed >> 17;
                        seed ^= seed << 5;
                        *byte = seed as u8;
                    }
                }
                picture.set_pts(Some(i));
                encoder.send_frame(&picture).unwrap();
                write_packets(encoder, *index, video_tb, &mut output);
            }
            if let Some((index, encoder)) = audio.as_mut() {
                let mut silence = frame::Audio::new(
                    Sample::I16(sample::Type::Packed),
                    samples_per_frame,
                    ChannelLayout::MONO,
                );
                silence.set_rate(AUDIO_RATE as u32);
                silence.data_mut(0).fill(0);
                silence.set_pts(Some(i * samples_per_frame as i64));
                encoder.send_frame(&silence).unwrap();
                write_packets(encoder, *index, audio_tb, &mut output);
            }
        }

        if let Some((index, encoder)) = video.as_mut() {
            encoder.send_eof().unwrap();
            write_packets(encoder, *index, video_tb, &mut output);
        }
        if let Some((index, encoder)) = audio.as_mut() {
            encoder.send_eof().unwrap();
            write_packets(encoder, *index, audio_tb, &mut output);
        }
        output.write_trailer().unwrap();
    }

    /// Number of streams of each kind in a container
    fn stream_kinds(path: &Path) -> (usize, usize, usize) {
        let input = format::input(&path).unwrap();
        let count = |kind| {
            input
                .streams()
                .filter(|stream| stream.parameters().medium() == kind)
                .count()
        };
        (input.nb_streams() as usize, count(media::Type::Video), count(media::Type::Audio))
    }

    #[test]
    fn test_clip_with_audio_is_compressed() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mkv");
        let output = dir.path().join("out.mkv");
        synthesize_clip(&input, true, true);
        assert_eq!(stream_kinds(&input), (2, 1, 1));

        VideoTranscoder::new(portable_settings())
            .transcode(&input, &output)
            .unwrap();

        let before = fs::metadata(&input).unwrap().len();
        let after = fs::metadata(&output).unwrap().len();
        assert!(after < before, "{} bytes grew to {}", before, after);
        assert_eq!(stream_kinds(&output), (2, 1, 1));
    }

    #[test]
    fn test_every_frame_survives_the_flush() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mkv");
        let output = dir.path().join("out.mkv");
        synthesize_clip(&input, true, false);

        let mut context = VideoCompressionContext::open(&input, &output, &portable_settings()).unwrap();
        context.run().unwrap();
        context.flush().unwrap();
        assert_eq!(context.finish().unwrap(), CLIP_FRAMES as u64);
        assert_eq!(stream_kinds(&output), (1, 1, 0));
    }

    #[test]
    fn test_audio_only_input_is_rejected() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("voice.mkv");
        let output = dir.path().join("out.mkv");
        synthesize_clip(&input, false, true);

        let result = VideoTranscoder::new(portable_settings()).transcode(&input, &output);
        assert!(matches!(result, Err(MigrateError::NoVideoStream(ref path)) if path == &input));
        assert!(!output.exists());
    }

    #[test]
    fn test_garbage_input_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mp4");
        let output = dir.path().join("out.mp4");
        fs::write(&input, b"this is definitely not a video container").unwrap();

        let result = transcoder().compress(&input, &output);
        assert!(!result.is_ok());
        assert!(!result.message().is_empty());
        assert!(!output.exists());
    }

    #[test]
    fn test_truncated_header_fails() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("cut.mp4");
        let output = dir.path().join("out.mp4");
        // ftyp box with nothing after it
        let mut data = vec![0x00, 0x00, 0x00, 0x18];
        data.extend_from_slice(b"ftypisom\0\0\x02\0isomiso2");
        fs::write(&input, &data).unwrap();

        assert!(!transcoder().compress(&input, &output).is_ok());
    }

    #[test]
    fn test_missing_input() {
        let dir = TempDir::new().unwrap();
        let result = transcoder().compress(&dir.path().join("nope.mkv"), &dir.path().join("out.mkv"));
        assert!(!result.is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(ensure_ffmpeg().is_ok());
        assert!(ensure_ffmpeg().is_ok());
    }
}
