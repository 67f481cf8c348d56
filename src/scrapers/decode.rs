use crate::scrapers::types::PageResponse;
use encoding_rs::{Encoding, UTF_8};
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::{self, Read};
use thiserror::Error;
use tracing::debug;

/// Whether this process can decompress brotli bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrotliSupport {
    Available,
    Unavailable,
}

impl BrotliSupport {
    pub fn detect() -> Self {
        if cfg!(feature = "brotli") {
            BrotliSupport::Available
        } else {
            BrotliSupport::Unavailable
        }
    }
}

impl Default for BrotliSupport {
    fn default() -> Self {
        Self::detect()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{encoding} body could not be decompressed: {source}")]
    Corrupt {
        encoding: String,
        #[source]
        source: io::Error,
    },
}

/// Undo the content encoding and turn the body into text.
///
/// Invalid byte sequences in the declared charset are replaced, never fatal.
pub fn decode_body(response: &PageResponse, brotli: BrotliSupport) -> Result<String, DecodeError> {
    let bytes = decompress(&response.headers, &response.body, brotli)?;
    Ok(decode_text(&response.headers, &bytes))
}

fn decompress(headers: &HeaderMap, body: &[u8], brotli: BrotliSupport) -> Result<Vec<u8>, DecodeError> {
    let declared = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    // codings are listed in the order they were applied
    let mut bytes = body.to_vec();
    for coding in declared.split(',').map(str::trim).rev() {
        bytes = match coding {
            "" | "identity" => bytes,
            "gzip" | "x-gzip" => read_all(MultiGzDecoder::new(bytes.as_slice()), coding)?,
            "deflate" => inflate(&bytes)?,
            "br" => match brotli {
                BrotliSupport::Available => unbrotli(&bytes).map_err(|source| DecodeError::Corrupt {
                    encoding: coding.to_string(),
                    source,
                })?,
                BrotliSupport::Unavailable => {
                    debug!("Brotli support unavailable, passing body through");
                    bytes
                }
            },
            other => {
                debug!("Unknown content encoding {:?}, passing body through", other);
                bytes
            }
        };
    }
    Ok(bytes)
}

fn read_all<R: Read>(mut reader: R, coding: &str) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Corrupt {
            encoding: coding.to_string(),
            source,
        })?;
    Ok(out)
}

/// Servers disagree on whether "deflate" means zlib-wrapped or raw.
fn inflate(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    match read_all(ZlibDecoder::new(bytes), "deflate") {
        Ok(out) => Ok(out),
        Err(_) => read_all(DeflateDecoder::new(bytes), "deflate"),
    }
}

#[cfg(feature = "brotli")]
fn unbrotli(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    brotli::Decompressor::new(bytes, 4096).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(not(feature = "brotli"))]
fn unbrotli(bytes: &[u8]) -> io::Result<Vec<u8>> {
    Ok(bytes.to_vec())
}

fn decode_text(headers: &HeaderMap, bytes: &[u8]) -> String {
    let encoding = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("Replaced invalid {} sequences while decoding body", used.name());
    }
    text.into_owned()
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}
