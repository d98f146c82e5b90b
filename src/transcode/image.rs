//! # Image Transcoder
//!
//! Ricodifica in-process delle immagini, senza tool esterni.
//!
//! ## Percorsi per formato:
//! - **JPEG**: decodifica a risoluzione nativa, ricodifica alla qualità
//!   configurata, copia del blocco EXIF in un marker APP1
//! - **PNG**: normalizzazione a 8 bit (palette, grigi a bassa profondità,
//!   16 bit), riduzione per campionamento righe/colonne entro le dimensioni
//!   massime, compressione deflate massima
//! - **HEIC/HEIF**: decodifica dell'immagine primaria con libheif e
//!   ricodifica lossy (HEVC, poi AV1 se HEVC non è disponibile); in
//!   alternativa conversione a JPEG se l'output ha estensione `.jpg`
//! - **Altro**: copia byte-per-byte
//!
//! ## Gestione risorse:
//! Tutti gli handle (buffer, contesti libheif, encoder) sono posseduti da
//! variabili locali e rilasciati dal `Drop` su ogni percorso d'uscita.

use super::exif;
use super::{TranscodeResult, Transcoder};
use crate::classify::normalized_extension;
use crate::config::ImageConfig;
use crate::error::MigrateError;
use crate::file_manager::FileManager;
use ::image::codecs::jpeg::JpegEncoder;
use ::image::codecs::png::{CompressionType, FilterType, PngEncoder};
use ::image::{ColorType, DynamicImage, ImageEncoder, ImageFormat};
use libheif_rs::{
    ColorSpace, CompressionFormat, EncoderQuality, HeifContext, Image, ImageHandle, LibHeif,
    RgbChroma,
};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Brand strings accepted at offset 4 of a HEIF file
const HEIF_SIGNATURES: &[&[u8; 8]] = &[b"ftypheic", b"ftypheix", b"ftypmif1", b"ftypmsf1"];

/// Decoded 8-bit pixels with their layout
#[derive(Debug, Clone, PartialEq)]
struct Raster {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    color: ColorType,
}

impl Raster {
    /// Convert any decoded image to an 8-bit layout the encoders accept
    fn from_dynamic(img: DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        let (pixels, color) = match img.color() {
            ColorType::L8 | ColorType::L16 => (img.into_luma8().into_raw(), ColorType::L8),
            ColorType::La8 | ColorType::La16 => (img.into_luma_alpha8().into_raw(), ColorType::La8),
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => {
                (img.into_rgb8().into_raw(), ColorType::Rgb8)
            }
            _ => (img.into_rgba8().into_raw(), ColorType::Rgba8),
        };

        Self {
            pixels,
            width,
            height,
            color,
        }
    }

    /// Drop alpha so the JPEG encoder accepts the buffer
    fn without_alpha(self) -> Self {
        match self.color {
            ColorType::La8 | ColorType::Rgba8 => {
                let channels = self.color.channel_count() as usize;
                let pixels = self
                    .pixels
                    .chunks_exact(channels)
                    .flat_map(|px| px[..channels - 1].iter().copied())
                    .collect();
                let color = if self.color == ColorType::La8 {
                    ColorType::L8
                } else {
                    ColorType::Rgb8
                };
                Self { pixels, color, ..self }
            }
            _ => self,
        }
    }

    /// Nearest-neighbour decimation so the result fits in `max_w` x `max_h`.
    ///
    /// Each dimension is clamped on its own. Output row `y` samples source row
    /// `y * height / out_height`, columns likewise.
    fn fit_within(self, max_w: u32, max_h: u32) -> Self {
        let out_w = self.width.min(max_w);
        let out_h = self.height.min(max_h);
        if out_w == self.width && out_h == self.height {
            return self;
        }

        let bpp = self.color.bytes_per_pixel() as usize;
        let src_stride = self.width as usize * bpp;
        let mut pixels = Vec::with_capacity(out_w as usize * out_h as usize * bpp);

        for y in 0..out_h as u64 {
            let src_y = (y * self.height as u64 / out_h as u64) as usize;
            let row = &self.pixels[src_y * src_stride..(src_y + 1) * src_stride];
            for x in 0..out_w as u64 {
                let src_x = (x * self.width as u64 / out_w as u64) as usize;
                pixels.extend_from_slice(&row[src_x * bpp..(src_x + 1) * bpp]);
            }
        }

        debug!(
            "Downscaled {}x{} -> {}x{}",
            self.width, self.height, out_w, out_h
        );
        Self {
            pixels,
            width: out_w,
            height: out_h,
            color: self.color,
        }
    }

    fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, MigrateError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality).encode(
            &self.pixels,
            self.width,
            self.height,
            self.color,
        )?;
        Ok(buf)
    }

    fn encode_png(&self) -> Result<Vec<u8>, MigrateError> {
        let mut buf = Vec::new();
        PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive)
            .write_image(&self.pixels, self.width, self.height, self.color)?;
        Ok(buf)
    }
}

/// Re-encodes JPEG/PNG/HEIC files, copies everything else
#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    settings: ImageConfig,
}

impl ImageTranscoder {
    pub fn new(settings: ImageConfig) -> Self {
        Self { settings }
    }

    fn transcode(&self, input: &Path, output: &Path) -> Result<(), MigrateError> {
        let input_ext = normalized_extension(input);
        let output_ext = normalized_extension(output);

        match (input_ext.as_deref(), output_ext.as_deref()) {
            (Some("jpg" | "jpeg"), _) => self.compress_jpeg(input, output),
            (Some("png"), _) => self.compress_png(input, output),
            (Some("heic" | "heif"), Some("jpg" | "jpeg")) => self.convert_heic_to_jpeg(input, output),
            (Some("heic" | "heif"), _) => self.compress_heic(input, output),
            _ => {
                debug!("No image codec for {}, copying", input.display());
                FileManager::copy_verbatim(input, output).map(|_| ())
            }
        }
    }

    /// Read the file and check its content matches the expected format
    fn read_checked(input: &Path, expected: ImageFormat) -> Result<Vec<u8>, MigrateError> {
        let data = fs::read(input)?;
        match ::image::guess_format(&data) {
            Ok(found) if found == expected => Ok(data),
            Ok(found) => Err(MigrateError::UnsupportedFormat(format!(
                "{} contains {:?} data, expected {:?}",
                input.display(),
                found,
                expected
            ))),
            Err(_) => Err(MigrateError::UnsupportedFormat(format!(
                "{} is not a valid {:?} file",
                input.display(),
                expected
            ))),
        }
    }

    fn compress_jpeg(&self, input: &Path, output: &Path) -> Result<(), MigrateError> {
        let data = Self::read_checked(input, ImageFormat::Jpeg)?;
        let decoded = ::image::load_from_memory_with_format(&data, ImageFormat::Jpeg)?;
        let raster = Raster::from_dynamic(decoded).without_alpha();

        let mut encoded = raster.encode_jpeg(self.settings.jpeg_quality)?;
        if let Some(payload) = exif::extract_exif(&data) {
            debug!("Carrying {} bytes of EXIF for {}", payload.len(), input.display());
            encoded = exif::insert_exif(encoded, payload);
        }

        fs::write(output, encoded)?;
        Ok(())
    }

    fn compress_png(&self, input: &Path, output: &Path) -> Result<(), MigrateError> {
        let data = Self::read_checked(input, ImageFormat::Png)?;
        let decoded = ::image::load_from_memory_with_format(&data, ImageFormat::Png)?;
        let raster = Raster::from_dynamic(decoded)
            .fit_within(self.settings.max_width, self.settings.max_height);

        fs::write(output, raster.encode_png()?)?;
        Ok(())
    }

    fn check_heif_signature(input: &Path) -> Result<(), MigrateError> {
        let data = fs::read(input)?;
        let brand = data.get(4..12);
        if HEIF_SIGNATURES.iter().any(|sig| brand == Some(&sig[..])) {
            Ok(())
        } else {
            Err(MigrateError::UnsupportedFormat(format!(
                "{} has no HEIF signature",
                input.display()
            )))
        }
    }

    fn path_str(path: &Path) -> Result<&str, MigrateError> {
        path.to_str().ok_or_else(|| {
            MigrateError::UnsupportedFormat(format!("non UTF-8 path: {}", path.display()))
        })
    }

    /// Open the container and decode its primary image as interleaved RGB
    fn decode_heif(lib: &LibHeif, input: &Path) -> Result<(ImageHandle, Image), MigrateError> {
        Self::check_heif_signature(input)?;
        let ctx = HeifContext::read_from_file(Self::path_str(input)?)?;
        let handle = ctx.primary_image_handle()?;
        let image = lib.decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)?;
        Ok((handle, image))
    }

    /// Raw `Exif` metadata block of the primary image, if any
    fn heif_exif(handle: &ImageHandle) -> Option<Vec<u8>> {
        let id = handle.metadata_block_ids(b"Exif").into_iter().next()?;
        handle.metadata(id).ok()
    }

    fn compress_heic(&self, input: &Path, output: &Path) -> Result<(), MigrateError> {
        let lib = LibHeif::new();
        let (handle, image) = Self::decode_heif(&lib, input)?;

        let mut encoder = lib
            .encoder_for_format(CompressionFormat::Hevc)
            .or_else(|_| lib.encoder_for_format(CompressionFormat::Av1))?;
        encoder.set_quality(EncoderQuality::Lossy(self.settings.heic_quality))?;

        let mut out_ctx = HeifContext::new()?;
        let out_handle = out_ctx.encode_image(&image, &mut encoder, None)?;

        if let Some(block) = Self::heif_exif(&handle) {
            if let Err(e) = out_ctx.add_exif_metadata(&out_handle, &block) {
                warn!("Dropping EXIF for {}: {}", input.display(), e.message);
            }
        }

        out_ctx.write_to_file(Self::path_str(output)?)?;
        Ok(())
    }

    fn convert_heic_to_jpeg(&self, input: &Path, output: &Path) -> Result<(), MigrateError> {
        let lib = LibHeif::new();
        let (handle, image) = Self::decode_heif(&lib, input)?;

        let planes = image.planes();
        let plane = planes
            .interleaved
            .ok_or_else(|| MigrateError::Heif("decoded image has no interleaved plane".into()))?;

        let row_bytes = plane.width as usize * 3;
        let mut pixels = Vec::with_capacity(row_bytes * plane.height as usize);
        for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
            pixels.extend_from_slice(&row[..row_bytes]);
        }

        let raster = Raster {
            pixels,
            width: plane.width,
            height: plane.height,
            color: ColorType::Rgb8,
        };
        let mut encoded = raster.encode_jpeg(self.settings.jpeg_quality)?;
        if let Some(payload) = Self::heif_exif(&handle).and_then(|b| exif::heif_block_to_app1(&b)) {
            encoded = exif::insert_exif(encoded, &payload);
        }

        fs::write(output, encoded)?;
        Ok(())
    }
}

impl Transcoder for ImageTranscoder {
    fn compress(&self, input: &Path, output: &Path) -> TranscodeResult {
        self.transcode(input, output).into()
    }
}
