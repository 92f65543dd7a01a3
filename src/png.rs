//! Minimal 8-bit grayscale PNG encoder.
//!
//! Enough of the format to write byte-plot images: a single IDAT chunk,
//! filter type 0 on every row, no interlacing.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Write};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Encode `pixels` as a grayscale image `width` pixels wide.
///
/// The last row is zero-padded when `pixels.len()` is not a multiple of
/// `width`. An empty input produces a single black row.
pub fn encode_grayscale(pixels: &[u8], width: u32) -> io::Result<Vec<u8>> {
    if width == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "image width must be greater than 0",
        ));
    }

    let row_len = width as usize;
    let height = pixels.len().div_ceil(row_len).max(1);
    let height = u32::try_from(height)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "image too tall"))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let padding = vec![0u8; row_len];
    for row in 0..height as usize {
        let start = (row * row_len).min(pixels.len());
        let end = (start + row_len).min(pixels.len());
        encoder.write_all(&[0])?;
        encoder.write_all(&pixels[start..end])?;
        encoder.write_all(&padding[..row_len - (end - start)])?;
    }
    let idat = encoder.finish()?;

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    // bit depth 8, color type 0 (grayscale), deflate, adaptive filtering, no interlace
    ihdr.extend_from_slice(&[8, 0, 0, 0, 0]);

    let mut out = Vec::with_capacity(SIGNATURE.len() + idat.len() + 64);
    out.extend_from_slice(&SIGNATURE);
    write_chunk(&mut out, b"IHDR", &ihdr);
    write_chunk(&mut out, b"IDAT", &idat);
    write_chunk(&mut out, b"IEND", &[]);
    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}
