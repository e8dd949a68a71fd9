//! zlib compression for note bodies.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

pub fn compress(content: &str) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes())?;
    encoder.finish()
}

/// Inflate a body written by [`compress`]. Fails on invalid UTF-8.
pub fn decompress(data: &[u8]) -> std::io::Result<String> {
    let mut content = String::new();
    ZlibDecoder::new(data).read_to_string(&mut content)?;
    Ok(content)
}
