//! JPEG APP1/EXIF segment handling.
//!
//! The image encoder writes a bare JFIF stream, so the EXIF block of the
//! source is lifted out of its marker segments and spliced back in.

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;

/// Header every EXIF APP1 payload starts with
pub const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Largest payload a single marker segment can carry (length field includes itself)
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

/// One marker segment inside the JPEG header area
struct Segment {
    marker: u8,
    /// Offset of the 0xFF byte
    start: usize,
    /// Offset one past the end of the payload
    end: usize,
}

/// Walk the marker segments between SOI and SOS
fn segments(jpeg: &[u8]) -> Vec<Segment> {
    let mut found = Vec::new();
    if !jpeg.starts_with(&SOI) {
        return found;
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            break;
        }
        let marker = jpeg[pos + 1];
        if marker == 0xFF {
            // fill byte
            pos += 1;
            continue;
        }
        if marker == SOS || marker == EOI {
            break;
        }
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            pos += 2;
            continue;
        }

        let seg_len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if seg_len < 2 || pos + 2 + seg_len > jpeg.len() {
            break;
        }
        found.push(Segment {
            marker,
            start: pos,
            end: pos + 2 + seg_len,
        });
        pos += 2 + seg_len;
    }

    found
}

/// Payload of the first well-formed EXIF APP1 segment, header included
pub fn extract_exif(jpeg: &[u8]) -> Option<&[u8]> {
    segments(jpeg)
        .into_iter()
        .filter(|seg| seg.marker == APP1)
        .map(|seg| &jpeg[seg.start + 4..seg.end])
        .find(|payload| payload.starts_with(EXIF_HEADER))
}

/// Insert `payload` as an APP1 segment after SOI (and after JFIF APP0 if present).
///
/// Returns the input unchanged when it is not a JPEG stream or the payload
/// does not fit in one segment.
pub fn insert_exif(jpeg: Vec<u8>, payload: &[u8]) -> Vec<u8> {
    if !payload.starts_with(EXIF_HEADER) || payload.len() > MAX_SEGMENT_PAYLOAD {
        return jpeg;
    }
    if !jpeg.starts_with(&SOI) {
        return jpeg;
    }

    let insert_at = segments(&jpeg)
        .first()
        .filter(|seg| seg.marker == APP0)
        .map(|seg| seg.end)
        .unwrap_or(SOI.len());

    let seg_len = (payload.len() + 2) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, APP1]);
    out.extend_from_slice(&seg_len.to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&jpeg[insert_at..]);
    out
}

/// Convert a HEIF `Exif` item into an APP1 payload.
///
/// HEIF prefixes the block with a big-endian offset to the TIFF header;
/// the APP1 form wants `Exif\0\0` directly in front of it.
pub fn heif_block_to_app1(block: &[u8]) -> Option<Vec<u8>> {
    let offset_bytes: [u8; 4] = block.get(..4)?.try_into().ok()?;
    let offset = u32::from_be_bytes(offset_bytes) as usize;
    let body = block.get(4..)?;

    if body.starts_with(EXIF_HEADER) {
        return Some(body.to_vec());
    }

    let tiff = body.get(offset..).filter(|tiff| !tiff.is_empty())?;
    let mut payload = Vec::with_capacity(EXIF_HEADER.len() + tiff.len());
    payload.extend_from_slice(EXIF_HEADER);
    payload.extend_from_slice(tiff);
    Some(payload)
}
