//! Working state of one video transcode.
//!
//! Every native handle (format contexts, codecs, scaler, frames, packet) is
//! owned by [`VideoCompressionContext`], one [`StreamSlot`] per input stream.
//! Dropping the context releases all of them, whichever step failed.

use super::bitrate::{BitratePlan, BitrateProbe};
use super::encoder::{EncoderBackend, EncoderSettings};
use crate::config::VideoConfig;
use crate::error::MigrateError;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::context::{Input, Output};
use ffmpeg::format::{stream::Stream, Pixel};
use ffmpeg::software::scaling;
use ffmpeg::{codec, decoder, encoder, format, frame, media, picture, Dictionary, Packet, Rational, Rescale};
use std::path::Path;
use tracing::{debug, info, warn};

/// Pixel layout every encoder is fed with
pub const TARGET_PIXEL: Pixel = Pixel::YUV420P;

/// Above this the reported rate is a timebase artifact, not a frame rate
const MAX_PLAUSIBLE_FPS: f64 = 240.0;

/// Muxers that understand `movflags=faststart`
const FASTSTART_MUXERS: &[&str] = &["mp4", "mov", "ipod", "3gp", "3g2", "ismv", "f4v"];

/// `EAGAIN` or end of stream: nothing more to receive right now
pub fn is_drained(err: &ffmpeg::Error) -> bool {
    match err {
        ffmpeg::Error::Eof => true,
        ffmpeg::Error::Other { errno } => *errno == ffmpeg::error::EAGAIN,
        _ => false,
    }
}

/// First plausible rate among `candidates`, `fallback` fps otherwise
pub fn guess_frame_rate(candidates: &[Rational], fallback: u32) -> Rational {
    candidates
        .iter()
        .copied()
        .find(|rate| {
            rate.numerator() > 0
                && rate.denominator() > 0
                && f64::from(*rate) <= MAX_PLAUSIBLE_FPS
        })
        .unwrap_or_else(|| {
            warn!("Could not determine frame rate, defaulting to {} fps", fallback);
            Rational::new(fallback as i32, 1)
        })
}

/// Reusable frame and packet buffers of one transcode
struct FrameBuffers {
    decoded: frame::Video,
    scaled: frame::Video,
    encoded: Packet,
}

/// Output mapping of one input stream
enum StreamSlot {
    /// Setup failed or the stream broke mid-file, packets are dropped
    Unmapped,
    Copy(CopyLane),
    Transcode(Box<VideoLane>),
}

/// Stream-copied track: packets are rescaled and written untouched
struct CopyLane {
    out_index: usize,
    in_time_base: Rational,
    out_time_base: Rational,
}

impl CopyLane {
    fn open(ist: &Stream, output: &mut Output) -> Result<Self, MigrateError> {
        let params = ist.parameters();
        if params.id() == codec::Id::None {
            return Err(MigrateError::UnsupportedFormat(format!(
                "stream {} has no known codec",
                ist.index()
            )));
        }

        let mut ost = output
            .add_stream(encoder::find(codec::Id::None))
            .map_err(MigrateError::ffmpeg("adding stream-copy output"))?;
        ost.set_parameters(params);
        // The source container's codec tag may be invalid in the target one.
        // SAFETY: `ost` was just created by `add_stream`, so its `codecpar` is
        // allocated, and `output` is borrowed mutably for the whole write.
        unsafe {
            (*(*ost.as_mut_ptr()).codecpar).codec_tag = 0;
        }
        ost.set_time_base(ist.time_base());
        ost.set_metadata(ist.metadata().to_owned());

        Ok(Self {
            out_index: ost.index(),
            in_time_base: ist.time_base(),
            out_time_base: ist.time_base(),
        })
    }

    fn write(&self, mut packet: Packet, output: &mut Output) -> Result<(), MigrateError> {
        packet.rescale_ts(self.in_time_base, self.out_time_base);
        packet.set_position(-1);
        packet.set_stream(self.out_index);
        packet
            .write_interleaved(output)
            .map_err(MigrateError::ffmpeg("writing stream-copied packet"))
    }
}

/// The re-encoded video track
struct VideoLane {
    out_index: usize,
    in_time_base: Rational,
    enc_time_base: Rational,
    out_time_base: Rational,
    width: u32,
    height: u32,
    decoder: decoder::Video,
    encoder: encoder::Video,
    backend: EncoderBackend,
    scaler: Option<scaling::Context>,
    next_pts: i64,
    frames_encoded: u64,
}

/// Container-level facts used for bitrate planning
struct SourceInfo {
    container_bit_rate: i64,
    duration_us: i64,
    file_size: u64,
}

impl VideoLane {
    fn open(
        ist: &Stream,
        source: &SourceInfo,
        output: &mut Output,
        settings: &VideoConfig,
    ) -> Result<Self, MigrateError> {
        let decoder = codec::context::Context::from_parameters(ist.parameters())
            .map_err(MigrateError::ffmpeg("reading video parameters"))?
            .decoder()
            .video()
            .map_err(MigrateError::ffmpeg("opening video decoder"))?;

        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(MigrateError::UnsupportedFormat(
                "video stream reports no frame size".to_string(),
            ));
        }

        let probe = BitrateProbe {
            stream_bit_rate: decoder.bit_rate() as i64,
            container_bit_rate: source.container_bit_rate,
            file_size: source.file_size,
            duration_us: source.duration_us,
        };
        let plan = BitratePlan::compute(&probe, settings);
        info!(
            "Source bitrate: {}kbps -> target: {}kbps max: {}kbps",
            plan.source / 1000,
            plan.target / 1000,
            plan.max / 1000
        );

        let frame_rate = guess_frame_rate(&[ist.rate(), ist.avg_frame_rate()], settings.fallback_fps);
        let global_header = output
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let (codec, encoder, backend) =
            open_encoder(settings, &plan, width, height, frame_rate, global_header)?;

        let enc_time_base = frame_rate.invert();
        let mut ost = output
            .add_stream(codec)
            .map_err(MigrateError::ffmpeg("adding video output"))?;
        ost.set_parameters(&encoder);
        ost.set_time_base(enc_time_base);
        ost.set_metadata(ist.metadata().to_owned());

        Ok(Self {
            out_index: ost.index(),
            in_time_base: ist.time_base(),
            enc_time_base,
            out_time_base: enc_time_base,
            width,
            height,
            decoder,
            encoder,
            backend,
            scaler: None,
            next_pts: 0,
            frames_encoded: 0,
        })
    }

    fn decode(
        &mut self,
        packet: &Packet,
        buffers: &mut FrameBuffers,
        output: &mut Output,
    ) -> Result<(), MigrateError> {
        if let Err(e) = self.decoder.send_packet(packet) {
            debug!("Skipping undecodable video packet: {}", e);
            return Ok(());
        }
        self.drain_decoder(buffers, output)
    }

    fn drain_decoder(&mut self, buffers: &mut FrameBuffers, output: &mut Output) -> Result<(), MigrateError> {
        loop {
            match self.decoder.receive_frame(&mut buffers.decoded) {
                Ok(()) => self.encode_frame(buffers, output)?,
                Err(e) if is_drained(&e) => return Ok(()),
                Err(e) => return Err(MigrateError::ffmpeg("decoding video")(e)),
            }
        }
    }

    /// Scaler matching the geometry of `frame`, rebuilt when the source changes
    fn scaler_for(&mut self, frame: &frame::Video) -> Result<&mut scaling::Context, MigrateError> {
        let stale = self.scaler.as_ref().map_or(true, |scaler| {
            let input = scaler.input();
            input.format != frame.format() || input.width != frame.width() || input.height != frame.height()
        });

        if stale {
            let scaler = scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                TARGET_PIXEL,
                self.width,
                self.height,
                scaling::Flags::FAST_BILINEAR,
            )
            .map_err(MigrateError::ffmpeg("creating scaler"))?;
            return Ok(self.scaler.insert(scaler));
        }

        self.scaler.as_mut().ok_or(MigrateError::Ffmpeg {
            context: "reusing scaler",
            source: ffmpeg::Error::Bug,
        })
    }

    fn encode_frame(&mut self, buffers: &mut FrameBuffers, output: &mut Output) -> Result<(), MigrateError> {
        let FrameBuffers {
            decoded,
            scaled,
            encoded,
        } = buffers;

        if decoded.width() == 0 || decoded.height() == 0 || decoded.format() == Pixel::None {
            debug!("Skipping video frame without geometry");
            return Ok(());
        }

        // Encoders reject non-increasing pts.
        let pts = decoded
            .timestamp()
            .map(|ts| ts.rescale(self.in_time_base, self.enc_time_base))
            .unwrap_or(self.next_pts)
            .max(self.next_pts);
        self.next_pts = pts + 1;

        let needs_scale = decoded.format() != TARGET_PIXEL
            || decoded.width() != self.width
            || decoded.height() != self.height;

        let frame: &mut frame::Video = if needs_scale {
            // fresh buffer: the encoder may still reference the previous one
            *scaled = frame::Video::empty();
            self.scaler_for(decoded)?
                .run(decoded, scaled)
                .map_err(MigrateError::ffmpeg("converting pixel format"))?;
            scaled
        } else {
            decoded
        };

        frame.set_pts(Some(pts));
        frame.set_kind(picture::Type::None);
        self.encoder
            .send_frame(frame)
            .map_err(MigrateError::ffmpeg("encoding video"))?;
        self.frames_encoded += 1;

        self.drain_encoder(encoded, output)
    }

    fn drain_encoder(&mut self, encoded: &mut Packet, output: &mut Output) -> Result<(), MigrateError> {
        loop {
            match self.encoder.receive_packet(encoded) {
                Ok(()) => {
                    encoded.set_stream(self.out_index);
                    encoded.rescale_ts(self.enc_time_base, self.out_time_base);
                    encoded
                        .write_interleaved(output)
                        .map_err(MigrateError::ffmpeg("writing video packet"))?;
                }
                Err(e) if is_drained(&e) => return Ok(()),
                Err(e) => return Err(MigrateError::ffmpeg("receiving encoded packet")(e)),
            }
        }
    }
}

/// Try every configured encoder in priority order, return the first that opens
fn open_encoder(
    settings: &VideoConfig,
    plan: &BitratePlan,
    width: u32,
    height: u32,
    frame_rate: Rational,
    global_header: bool,
) -> Result<(ffmpeg::Codec, encoder::Video, EncoderBackend), MigrateError> {
    let names = settings.encoder_priority();

    for name in &names {
        let Some(codec) = encoder::find_by_name(name) else {
            debug!("Encoder {} not available in this FFmpeg build", name);
            continue;
        };

        let backend = EncoderBackend::from_name(name);
        let rc = EncoderSettings::for_backend(&backend, plan, settings);

        let mut setup = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(MigrateError::ffmpeg("allocating encoder"))?;
        setup.set_width(width);
        setup.set_height(height);
        setup.set_format(TARGET_PIXEL);
        setup.set_time_base(frame_rate.invert());
        setup.set_frame_rate(Some(frame_rate));
        setup.set_bit_rate(rc.bit_rate);
        if rc.max_bit_rate > 0 {
            setup.set_max_bit_rate(rc.max_bit_rate);
        }
        if global_header {
            setup.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let mut options = Dictionary::new();
        for (key, value) in &rc.options {
            options.set(key, value);
        }

        match setup.open_as_with(codec, options) {
            Ok(opened) => {
                let kind = if backend.is_hardware() { "hardware" } else { "software" };
                info!("Using {} encoder: {}", kind, name);
                return Ok((codec, opened, backend));
            }
            // hardware encoders fail to open without a device
            Err(e) if backend.is_hardware() => debug!("Encoder {} failed to open: {}", name, e),
            Err(e) => warn!("Software encoder {} failed to open: {}", name, e),
        }
    }

    Err(MigrateError::NoEncoder(names.join(", ")))
}

/// All native state of one transcode, released together on drop
pub struct VideoCompressionContext {
    slots: Vec<StreamSlot>,
    buffers: FrameBuffers,
    output: Output,
    input: Input,
}

impl VideoCompressionContext {
    /// Open input, plan the encode, map every stream and write the output header
    pub fn open(input_path: &Path, output_path: &Path, settings: &VideoConfig) -> Result<Self, MigrateError> {
        let input = format::input(&input_path).map_err(MigrateError::ffmpeg("opening input"))?;

        let video_index = input
            .streams()
            .find(|stream| stream.parameters().medium() == media::Type::Video)
            .map(|stream| stream.index())
            .ok_or_else(|| MigrateError::NoVideoStream(input_path.to_path_buf()))?;

        let source = SourceInfo {
            container_bit_rate: input.bit_rate(),
            duration_us: input.duration(),
            file_size: std::fs::metadata(input_path).map(|m| m.len()).unwrap_or(0),
        };

        let mut output = format::output(&output_path).map_err(MigrateError::ffmpeg("creating output"))?;
        output.set_metadata(input.metadata().to_owned());

        let mut slots = Vec::with_capacity(input.nb_streams() as usize);
        for ist in input.streams() {
            let slot = if ist.index() == video_index {
                StreamSlot::Transcode(Box::new(VideoLane::open(&ist, &source, &mut output, settings)?))
            } else {
                match CopyLane::open(&ist, &mut output) {
                    Ok(lane) => StreamSlot::Copy(lane),
                    Err(e) => {
                        warn!("Dropping stream {} of {}: {}", ist.index(), input_path.display(), e);
                        StreamSlot::Unmapped
                    }
                }
            };
            slots.push(slot);
        }

        let mut mux_options = Dictionary::new();
        if FASTSTART_MUXERS.contains(&output.format().name()) {
            mux_options.set("movflags", "faststart");
        }
        output
            .write_header_with(mux_options)
            .map_err(MigrateError::ffmpeg("writing header"))?;

        // The muxer may pick its own timebases while writing the header.
        for slot in &mut slots {
            let (out_index, out_time_base) = match slot {
                StreamSlot::Copy(lane) => (lane.out_index, &mut lane.out_time_base),
                StreamSlot::Transcode(lane) => (lane.out_index, &mut lane.out_time_base),
                StreamSlot::Unmapped => continue,
            };
            if let Some(stream) = output.stream(out_index) {
                *out_time_base = stream.time_base();
            }
        }

        Ok(Self {
            slots,
            buffers: FrameBuffers {
                decoded: frame::Video::empty(),
                scaled: frame::Video::empty(),
                encoded: Packet::empty(),
            },
            output,
            input,
        })
    }

    /// Read every packet: decode/encode the video, stream-copy the rest
    pub fn run(&mut self) -> Result<(), MigrateError> {
        let Self {
            slots,
            buffers,
            output,
            input,
        } = self;

        for (stream, packet) in input.packets() {
            let index = stream.index();
            let Some(slot) = slots.get_mut(index) else {
                continue;
            };

            let broken = match slot {
                StreamSlot::Unmapped => None,
                StreamSlot::Copy(lane) => lane.write(packet, output).err(),
                StreamSlot::Transcode(lane) => {
                    lane.decode(&packet, buffers, output)?;
                    None
                }
            };

            if let Some(e) = broken {
                warn!("Stream {} stopped: {}", index, e);
                *slot = StreamSlot::Unmapped;
            }
        }

        Ok(())
    }

    /// Drain decoders into the encode path, then drain the encoders
    pub fn flush(&mut self) -> Result<(), MigrateError> {
        let Self {
            slots,
            buffers,
            output,
            ..
        } = self;

        for slot in slots.iter_mut() {
            if let StreamSlot::Transcode(lane) = slot {
                lane.decoder
                    .send_eof()
                    .map_err(MigrateError::ffmpeg("flushing decoder"))?;
                lane.drain_decoder(buffers, output)?;
            }
        }

        for slot in slots.iter_mut() {
            if let StreamSlot::Transcode(lane) = slot {
                lane.encoder
                    .send_eof()
                    .map_err(MigrateError::ffmpeg("flushing encoder"))?;
                lane.drain_encoder(&mut buffers.encoded, output)?;
            }
        }

        Ok(())
    }

    /// Write the trailer, returns the number of frames encoded
    pub fn finish(mut self) -> Result<u64, MigrateError> {
        let (frames, backend) = self
            .slots
            .iter()
            .find_map(|slot| match slot {
                StreamSlot::Transcode(lane) => Some((lane.frames_encoded, lane.backend.clone())),
                _ => None,
            })
            .unwrap_or((0, EncoderBackend::Generic(String::new())));

        if frames == 0 {
            return Err(MigrateError::UnsupportedFormat(
                "video stream contains no decodable frames".to_string(),
            ));
        }

        self.output
            .write_trailer()
            .map_err(MigrateError::ffmpeg("writing trailer"))?;
        debug!("Encoded {} frames with {:?}", frames, backend);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_guess() {
        let rate = guess_frame_rate(&[Rational::new(30000, 1001), Rational::new(25, 1)], 30);
        assert_eq!(rate, Rational::new(30000, 1001));

        let rate = guess_frame_rate(&[Rational::new(0, 1), Rational::new(25, 1)], 30);
        assert_eq!(rate, Rational::new(25, 1));

        // 90k "frame rate" from a timebase is not plausible
        let rate = guess_frame_rate(&[Rational::new(90000, 1), Rational::new(0, 0)], 30);
        assert_eq!(rate, Rational::new(30, 1));
    }

    #[test]
    fn test_drained_errors() {
        assert!(is_drained(&ffmpeg::Error::Eof));
        assert!(is_drained(&ffmpeg::Error::Other {
            errno: ffmpeg::error::EAGAIN
        }));
        assert!(!is_drained(&ffmpeg::Error::InvalidData));
    }
}
