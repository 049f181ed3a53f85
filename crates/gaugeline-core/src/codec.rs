// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;

use crate::errors::CodecError;
use crate::metric::Metric;
use crate::pool::Reset;

/// Scratch space for turning a batch into a gzip body.
#[derive(Debug, Default)]
pub struct BatchBuffers {
    pub json: Vec<u8>,
    pub gzip: Vec<u8>,
}

impl Reset for BatchBuffers {
    fn reset(&mut self) {
        self.json.clear();
        self.gzip.clear();
    }
}

/// Serializes `metrics` to JSON and gzips it into `buffers.gzip`.
pub fn encode_batch<'a>(
    metrics: &[Metric],
    buffers: &'a mut BatchBuffers,
) -> Result<&'a [u8], CodecError> {
    buffers.reset();
    serde_json::to_writer(&mut buffers.json, metrics).map_err(CodecError::Serialize)?;

    let mut encoder = GzEncoder::new(&mut buffers.gzip, Compression::default());
    encoder.write_all(&buffers.json).map_err(CodecError::Gzip)?;
    encoder.finish().map_err(CodecError::Gzip)?;
    Ok(&buffers.gzip)
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Gzip)?;
    encoder.finish().map_err(CodecError::Gzip)
}

/// Upper bound on a decompressed payload.
pub const MAX_DECODED_BYTES: u64 = 64 * 1024 * 1024;

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    gunzip_limited(data, MAX_DECODED_BYTES)
}

/// Decompresses `data`, failing once the output grows past `limit` bytes.
pub fn gunzip_limited(data: &[u8], limit: u64) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data).take(limit.saturating_add(1));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CodecError::Gzip)?;
    if out.len() as u64 > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(out)
}

pub fn decode_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(data).map_err(CodecError::Deserialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;

    #[test]
    fn encoded_batch_gunzips_to_json_array() {
        let pool = Pool::new(2, BatchBuffers::default);
        let metrics = vec![Metric::gauge("Alloc", 1.5), Metric::counter("PollCount", 2)];

        let mut buffers = pool.get();
        let body = encode_batch(&metrics, &mut buffers).unwrap().to_vec();
        drop(buffers);

        let decoded: Vec<Metric> = decode_json(&gunzip(&body).unwrap()).unwrap();
        assert_eq!(decoded, metrics);
        assert_eq!(pool.idle(), 1);
        let reused = pool.get();
        assert!(reused.json.is_empty() && reused.gzip.is_empty());
    }

    #[test]
    fn gunzip_rejects_plain_bytes() {
        assert!(matches!(gunzip(b"{}"), Err(CodecError::Gzip(_))));
    }

    #[test]
    fn gunzip_stops_at_the_output_limit() {
        let zeros = gzip(&vec![0u8; 4096]).unwrap();
        assert!(matches!(
            gunzip_limited(&zeros, 4095),
            Err(CodecError::TooLarge { limit: 4095 })
        ));
        assert_eq!(gunzip_limited(&zeros, 4096).unwrap().len(), 4096);
    }

    #[test]
    fn decode_reports_bad_json() {
        assert!(matches!(
            decode_json::<Vec<Metric>>(b"[{"),
            Err(CodecError::Deserialize(_))
        ));
    }
}
