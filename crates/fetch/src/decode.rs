use std::io::Read;

use anyhow::{Context, Result};

/// Decode a response body according to its Content-Encoding. Encodings may
/// be stacked (`Content-Encoding: gzip, br`) and are undone in reverse
/// order. Unknown tokens leave the bytes untouched.
pub fn decode_body(bytes: Vec<u8>, encoding: Option<&str>) -> Result<Vec<u8>> {
    let Some(encoding) = encoding else {
        return Ok(bytes);
    };
    let mut current = bytes;
    let tokens: Vec<String> = encoding
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    for token in tokens.iter().rev() {
        current = decode_one(current, token)?;
    }
    Ok(current)
}

fn decode_one(bytes: Vec<u8>, token: &str) -> Result<Vec<u8>> {
    match token {
        "identity" => Ok(bytes),
        "gzip" | "x-gzip" => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(bytes.as_slice())
                .read_to_end(&mut out)
                .context("gzip decode")?;
            Ok(out)
        }
        "deflate" => {
            // Servers disagree on whether "deflate" means zlib-wrapped or
            // raw; try zlib first, fall back to raw.
            let mut out = Vec::new();
            if flate2::read::ZlibDecoder::new(bytes.as_slice())
                .read_to_end(&mut out)
                .is_ok()
            {
                return Ok(out);
            }
            let mut out = Vec::new();
            flate2::read::DeflateDecoder::new(bytes.as_slice())
                .read_to_end(&mut out)
                .context("deflate decode")?;
            Ok(out)
        }
        "br" => {
            let mut out = Vec::new();
            brotli_decompressor::Decompressor::new(bytes.as_slice(), 4096)
                .read_to_end(&mut out)
                .context("brotli decode")?;
            Ok(out)
        }
        _ => Ok(bytes),
    }
}
