//! Payload compression (RFC 4253 Section 6.2).
//!
//! `zlib` in SSH is a single deflate stream per direction that lives for the
//! whole connection; every packet is terminated with a partial flush so the
//! peer can inflate it without waiting for more data. A fresh encoder per
//! packet would not interoperate.

use cssh_platform::{CsshError, CsshResult};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Upper bound on a single inflated payload.
const MAX_INFLATED_SIZE: usize = 256 * 1024;

/// Compression algorithm for SSH payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// zlib (deflate stream with partial flush per packet)
    Zlib,
}

impl CompressionAlgorithm {
    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Zlib => "zlib",
        }
    }

    /// Parses the algorithm from its name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CompressionAlgorithm::None),
            "zlib" => Some(CompressionAlgorithm::Zlib),
            _ => None,
        }
    }

    /// Creates the outbound (compressing) side.
    pub fn compressor(&self) -> Box<dyn PacketCompressor> {
        match self {
            CompressionAlgorithm::None => Box::new(NoneCompressor),
            CompressionAlgorithm::Zlib => Box::new(ZlibCompressor {
                stream: Compress::new(Compression::default(), true),
            }),
        }
    }

    /// Creates the inbound (decompressing) side.
    pub fn decompressor(&self) -> Box<dyn PacketCompressor> {
        match self {
            CompressionAlgorithm::None => Box::new(NoneCompressor),
            CompressionAlgorithm::Zlib => Box::new(ZlibDecompressor {
                stream: Decompress::new(true),
            }),
        }
    }
}

/// One direction of payload compression.
pub trait PacketCompressor: Send {
    /// Returns the algorithm.
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compresses or decompresses one payload.
    fn process(&mut self, data: &[u8]) -> CsshResult<Vec<u8>>;
}

impl std::fmt::Debug for dyn PacketCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCompressor")
            .field("algorithm", &self.algorithm())
            .finish()
    }
}

/// Identity compressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCompressor;

impl PacketCompressor for NoneCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn process(&mut self, data: &[u8]) -> CsshResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

struct ZlibCompressor {
    stream: Compress,
}

impl PacketCompressor for ZlibCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zlib
    }

    fn process(&mut self, data: &[u8]) -> CsshResult<Vec<u8>> {
        let start = self.stream.total_in();
        let mut out = Vec::with_capacity(data.len() + 64);

        loop {
            let consumed = (self.stream.total_in() - start) as usize;
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(64));
            }
            self.stream
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Partial)
                .map_err(|e| CsshError::Compression(format!("deflate failed: {}", e)))?;

            let consumed = (self.stream.total_in() - start) as usize;
            // A flush is complete once deflate leaves spare output room.
            if consumed == data.len() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }
}

struct ZlibDecompressor {
    stream: Decompress,
}

impl PacketCompressor for ZlibDecompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zlib
    }

    fn process(&mut self, data: &[u8]) -> CsshResult<Vec<u8>> {
        let start = self.stream.total_in();
        let mut out = Vec::with_capacity(data.len() * 4 + 64);

        loop {
            let consumed = (self.stream.total_in() - start) as usize;
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity());
            }
            let status = self
                .stream
                .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| CsshError::Compression(format!("inflate failed: {}", e)))?;

            if out.len() > MAX_INFLATED_SIZE {
                return Err(CsshError::Compression(format!(
                    "inflated payload exceeds {} bytes",
                    MAX_INFLATED_SIZE
                )));
            }

            let consumed = (self.stream.total_in() - start) as usize;
            match status {
                Status::StreamEnd => return Ok(out),
                _ if consumed == data.len() && out.len() < out.capacity() => return Ok(out),
                Status::BufError if consumed == data.len() => return Ok(out),
                _ => {}
            }
        }
    }
}
