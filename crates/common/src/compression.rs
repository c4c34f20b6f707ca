//! Payload compression for outbound frames
//!
//! Small payloads are cheaper to send as-is; [`PayloadCompressor`] only
//! compresses once a payload reaches its size threshold.

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::error::{CommonError, CommonResult};

/// Compression algorithms supported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Gzip,
    Zlib,
}

/// Result of [`PayloadCompressor::encode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedPayload {
    /// Below the threshold, sent unchanged
    Plain(Vec<u8>),
    /// Compressed with the compressor's algorithm
    Compressed(Vec<u8>),
}

impl EncodedPayload {
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Plain(bytes) | Self::Compressed(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Threshold-gated compressor
#[derive(Debug, Clone)]
pub struct PayloadCompressor {
    algorithm: CompressionAlgorithm,
    level: u32,
    threshold: usize,
}

impl PayloadCompressor {
    /// Create a compressor; `level` is clamped to 0..=9
    pub fn new(algorithm: CompressionAlgorithm, level: u32, threshold: usize) -> Self {
        Self { algorithm, level: level.min(9), threshold }
    }

    /// Gzip at level 6 above `threshold` bytes
    pub fn gzip(threshold: usize) -> Self {
        Self::new(CompressionAlgorithm::Gzip, 6, threshold)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compress when `data` reaches the threshold, pass it through otherwise
    pub fn encode(&self, data: &[u8]) -> CommonResult<EncodedPayload> {
        if data.len() < self.threshold {
            return Ok(EncodedPayload::Plain(data.to_vec()));
        }
        self.compress(data).map(EncodedPayload::Compressed)
    }

    /// Compress unconditionally
    pub fn compress(&self, data: &[u8]) -> CommonResult<Vec<u8>> {
        let level = Compression::new(self.level);

        match self.algorithm {
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder
                    .write_all(data)
                    .map_err(|e| CommonError::internal(format!("Gzip compression failed: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| CommonError::internal(format!("Gzip finalization failed: {}", e)))
            }
            CompressionAlgorithm::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), level);
                encoder
                    .write_all(data)
                    .map_err(|e| CommonError::internal(format!("Zlib compression failed: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| CommonError::internal(format!("Zlib finalization failed: {}", e)))
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> CommonResult<Vec<u8>> {
        let mut decompressed = Vec::new();
        let read = match self.algorithm {
            CompressionAlgorithm::Gzip => GzDecoder::new(data).read_to_end(&mut decompressed),
            CompressionAlgorithm::Zlib => ZlibDecoder::new(data).read_to_end(&mut decompressed),
        };
        read.map_err(|e| CommonError::serialization_format("compressed", e.to_string()))?;
        Ok(decompressed)
    }
}

impl Default for PayloadCompressor {
    fn default() -> Self {
        Self::gzip(1024)
    }
}
