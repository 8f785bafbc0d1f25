//! SSH binary packet transport (RFC 4253 Section 6).
//!
//! The transport is split by direction:
//!
//! - [`PacketReader`] owns the read half, the inbound [`DirectionState`] and
//!   the incoming sequence number. Only the session loop reads.
//! - [`PacketWriter`] owns the write half, the outbound state and the outgoing
//!   sequence number. It is shared as a [`PacketSender`], which serializes
//!   every packet under one lock so that sequence allocation, MAC, CBC chaining
//!   and the socket write stay in order when channel tasks send concurrently.
//!
//! Both directions start with `none` algorithms and switch independently
//! when NEWKEYS is sent (outbound) or received (inbound).
//!
//! # Sequence numbers
//!
//! Each direction counts packets from 0, increments once per packet whether
//! or not anything is negotiated, never resets and wraps at 2^32.

use crate::ssh::algorithms::AlgorithmSet;
use crate::ssh::compression::{CompressionAlgorithm, PacketCompressor};
use crate::ssh::crypto::{
    CipherAlgorithm, MacAlgorithm, NoneCipher, NoneMac, PacketCipher, PacketMac,
};
use crate::ssh::kex_dh::KeyMaterial;
use crate::ssh::message::Message;
use crate::ssh::packet::{
    check_packet_length, padding_length, Packet, MAX_PACKET_SIZE, MIN_BLOCK_SIZE,
};
use cssh_platform::{CsshError, CsshResult};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Boxed read half of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Algorithms and keyed state for one direction.
pub struct DirectionState {
    cipher: Box<dyn PacketCipher>,
    mac: Box<dyn PacketMac>,
    compressor: Box<dyn PacketCompressor>,
}

impl DirectionState {
    /// The initial state: no cipher, no MAC, no compression.
    pub fn plain() -> Self {
        Self {
            cipher: Box::new(NoneCipher),
            mac: Box::new(NoneMac),
            compressor: CompressionAlgorithm::None.compressor(),
        }
    }

    /// Server-to-client state (encrypt, MAC with key 'F', compress).
    pub fn outbound(algorithms: &AlgorithmSet, keys: &KeyMaterial) -> CsshResult<Self> {
        Ok(Self {
            cipher: algorithms
                .encryption_server_to_client
                .encryptor(&keys.enc_server_to_client, &keys.iv_server_to_client)?,
            mac: algorithms
                .mac_server_to_client
                .instantiate(&keys.mac_server_to_client)?,
            compressor: algorithms.compression_server_to_client.compressor(),
        })
    }

    /// Client-to-server state (decrypt, verify with key 'E', decompress).
    pub fn inbound(algorithms: &AlgorithmSet, keys: &KeyMaterial) -> CsshResult<Self> {
        Ok(Self {
            cipher: algorithms
                .encryption_client_to_server
                .decryptor(&keys.enc_client_to_server, &keys.iv_client_to_server)?,
            mac: algorithms
                .mac_client_to_server
                .instantiate(&keys.mac_client_to_server)?,
            compressor: algorithms.compression_client_to_server.decompressor(),
        })
    }

    /// Alignment unit for framing: `max(cipher block, 8)`.
    pub fn block_size(&self) -> usize {
        self.cipher.block_size().max(MIN_BLOCK_SIZE)
    }

    /// Active cipher.
    pub fn cipher_algorithm(&self) -> CipherAlgorithm {
        self.cipher.algorithm()
    }

    /// Active MAC.
    pub fn mac_algorithm(&self) -> MacAlgorithm {
        self.mac.algorithm()
    }

    /// Active compression.
    pub fn compression_algorithm(&self) -> CompressionAlgorithm {
        self.compressor.algorithm()
    }
}

impl Default for DirectionState {
    fn default() -> Self {
        Self::plain()
    }
}

impl std::fmt::Debug for DirectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionState")
            .field("cipher", &self.cipher_algorithm())
            .field("mac", &self.mac_algorithm())
            .field("compression", &self.compression_algorithm())
            .finish()
    }
}

/// Outbound half: frames, protects and writes packets.
pub struct PacketWriter {
    writer: BoxedWriter,
    state: DirectionState,
    sequence: u32,
    desynced: bool,
}

impl PacketWriter {
    /// Wraps a write half with `none` algorithms.
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            writer,
            state: DirectionState::plain(),
            sequence: 0,
            desynced: false,
        }
    }

    /// Next outgoing sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Current outbound state.
    pub fn state(&self) -> &DirectionState {
        &self.state
    }

    /// Installs new outbound algorithms; the sequence number carries on.
    pub fn activate(&mut self, state: DirectionState) {
        debug!(
            cipher = state.cipher_algorithm().name(),
            mac = state.mac_algorithm().name(),
            compression = state.compression_algorithm().name(),
            "outbound keys active"
        );
        self.state = state;
        self.desynced = false;
    }

    /// Compiles one payload into wire bytes and consumes a sequence number.
    ///
    /// compress, pad, MAC over `seq || plaintext`, encrypt, append MAC.
    ///
    /// # Errors
    ///
    /// - [`CsshError::Protocol`] when the uncompressed payload cannot fit a
    ///   packet; nothing is consumed and the writer stays usable
    /// - [`CsshError::Compression`] when the compressed payload overflows the
    ///   packet limit; the compression stream has advanced, so every later
    ///   call fails too
    pub fn compile(&mut self, payload: &[u8]) -> CsshResult<Vec<u8>> {
        if self.desynced {
            return Err(CsshError::Compression(
                "Outbound compression stream is out of sync".to_string(),
            ));
        }
        let block = self.state.block_size();
        let packet_length = 1 + payload.len() + padding_length(payload.len(), block);
        if packet_length > MAX_PACKET_SIZE {
            return Err(CsshError::Protocol(format!(
                "Packet size {} exceeds maximum {}",
                packet_length, MAX_PACKET_SIZE
            )));
        }

        let compressed = self.state.compressor.process(payload)?;
        let packet = match Packet::new(compressed, block) {
            Ok(packet) => packet,
            Err(e) => {
                self.desynced = true;
                return Err(CsshError::Compression(format!(
                    "Compressed payload rejected: {}",
                    e
                )));
            }
        };
        let mut wire = packet.to_bytes();

        let tag = self.state.mac.compute(self.sequence, &wire);
        self.state.cipher.process(&mut wire)?;
        wire.extend_from_slice(&tag);

        trace!(seq = self.sequence, len = wire.len(), "packet compiled");
        self.sequence = self.sequence.wrapping_add(1);
        Ok(wire)
    }

    /// Compiles and writes one packet.
    pub async fn send(&mut self, payload: &[u8]) -> CsshResult<()> {
        let wire = self.compile(payload)?;
        self.writer.write_all(&wire).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Writes bytes outside packet framing (identification lines).
    pub async fn write_raw(&mut self, bytes: &[u8]) -> CsshResult<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Closes the write half.
    pub async fn shutdown(&mut self) -> CsshResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }
}

impl std::fmt::Debug for PacketWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketWriter")
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Cloneable, lock-protected handle on the outbound half.
#[derive(Clone)]
pub struct PacketSender {
    inner: Arc<Mutex<PacketWriter>>,
}

impl PacketSender {
    /// Wraps a write half.
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PacketWriter::new(writer))),
        }
    }

    /// Sends one raw payload.
    pub async fn send(&self, payload: &[u8]) -> CsshResult<()> {
        self.inner.lock().await.send(payload).await
    }

    /// Encodes and sends one message.
    pub async fn send_message(&self, message: &Message) -> CsshResult<()> {
        debug!(msg = %message.message_type(), "sending");
        self.send(&message.encode()).await
    }

    /// Sends `message`, then switches outbound algorithms before any other packet.
    ///
    /// Used for NEWKEYS: the packet itself still goes out under the old state.
    pub async fn send_then_activate(
        &self,
        message: &Message,
        state: DirectionState,
    ) -> CsshResult<()> {
        let mut writer = self.inner.lock().await;
        writer.send(&message.encode()).await?;
        writer.activate(state);
        Ok(())
    }

    /// Writes bytes outside packet framing.
    pub async fn write_raw(&self, bytes: &[u8]) -> CsshResult<()> {
        self.inner.lock().await.write_raw(bytes).await
    }

    /// Next outgoing sequence number.
    pub async fn sequence(&self) -> u32 {
        self.inner.lock().await.sequence()
    }

    /// Closes the write half.
    pub async fn shutdown(&self) -> CsshResult<()> {
        self.inner.lock().await.shutdown().await
    }
}

impl std::fmt::Debug for PacketSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSender").finish_non_exhaustive()
    }
}

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Decompressed payload
    pub payload: Vec<u8>,
    /// Incoming sequence number the packet consumed
    pub sequence: u32,
}

/// Inbound half: reads, decrypts, verifies and unframes packets.
pub struct PacketReader {
    reader: BoxedReader,
    state: DirectionState,
    sequence: u32,
}

impl PacketReader {
    /// Wraps a read half with `none` algorithms.
    pub fn new(reader: BoxedReader) -> Self {
        Self {
            reader,
            state: DirectionState::plain(),
            sequence: 0,
        }
    }

    /// Next incoming sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Current inbound state.
    pub fn state(&self) -> &DirectionState {
        &self.state
    }

    /// Installs new inbound algorithms; the sequence number carries on.
    pub fn activate(&mut self, state: DirectionState) {
        debug!(
            cipher = state.cipher_algorithm().name(),
            mac = state.mac_algorithm().name(),
            compression = state.compression_algorithm().name(),
            "inbound keys active"
        );
        self.state = state;
    }

    /// Reads one line ending in LF, at most `max_len` bytes, outside packet framing.
    pub async fn read_line(&mut self, max_len: usize) -> CsshResult<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let byte = self.reader.read_u8().await?;
            line.push(byte);
            if byte == b'\n' {
                return Ok(line);
            }
            if line.len() >= max_len {
                return Err(CsshError::Protocol(format!(
                    "Identification line longer than {} bytes",
                    max_len
                )));
            }
        }
    }

    /// Reads one packet.
    ///
    /// # Errors
    ///
    /// - [`CsshError::Decode`] for bad lengths or padding
    /// - [`CsshError::MacVerification`] when the tag does not match; the
    ///   sequence number is consumed anyway
    /// - [`CsshError::Io`] on end of stream
    pub async fn read_packet(&mut self) -> CsshResult<ReceivedPacket> {
        let block = self.state.block_size();

        let mut plaintext = vec![0u8; block];
        self.reader.read_exact(&mut plaintext).await?;
        self.state.cipher.process(&mut plaintext)?;

        let packet_length =
            u32::from_be_bytes([plaintext[0], plaintext[1], plaintext[2], plaintext[3]]) as usize;
        check_packet_length(packet_length)?;
        let total = packet_length + 4;
        if total < block || total % block != 0 {
            return Err(CsshError::Decode(format!(
                "Packet length {} not aligned to block size {}",
                packet_length, block
            )));
        }

        let mut rest = vec![0u8; total - block];
        self.reader.read_exact(&mut rest).await?;
        self.state.cipher.process(&mut rest)?;
        plaintext.extend_from_slice(&rest);

        let mut tag = vec![0u8; self.state.mac.mac_size()];
        self.reader.read_exact(&mut tag).await?;

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        if !self.state.mac.verify(sequence, &plaintext, &tag) {
            return Err(CsshError::MacVerification { sequence });
        }

        let packet = Packet::from_bytes(&plaintext)?;
        let payload = self.state.compressor.process(packet.payload())?;
        trace!(seq = sequence, len = payload.len(), "packet received");

        Ok(ReceivedPacket { payload, sequence })
    }
}

impl std::fmt::Debug for PacketReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Splits a stream into a reader and a shared sender.
pub fn split<S>(stream: S) -> (PacketReader, PacketSender)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (
        PacketReader::new(Box::new(read_half)),
        PacketSender::new(Box::new(write_half)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::compression::CompressionAlgorithm;
    use crate::ssh::hostkey::HostKeyAlgorithm;
    use crate::ssh::kex_dh::KexAlgorithm;

    fn symmetric_set(
        cipher: CipherAlgorithm,
        mac: MacAlgorithm,
        compression: CompressionAlgorithm,
    ) -> AlgorithmSet {
        AlgorithmSet {
            kex: KexAlgorithm::DhGroup14Sha1,
            host_key: HostKeyAlgorithm::SshRsa,
            encryption_client_to_server: cipher,
            encryption_server_to_client: cipher,
            mac_client_to_server: mac,
            mac_server_to_client: mac,
            compression_client_to_server: compression,
            compression_server_to_client: compression,
        }
    }

    // Same keys both ways so our outbound side can be read by our inbound side.
    fn mirrored_keys() -> KeyMaterial {
        KeyMaterial {
            iv_client_to_server: vec![0x0a; 16],
            iv_server_to_client: vec![0x0a; 16],
            enc_client_to_server: vec![0x0c; 32],
            enc_server_to_client: vec![0x0c; 32],
            mac_client_to_server: vec![0x0e; 32],
            mac_server_to_client: vec![0x0e; 32],
        }
    }

    fn reader_over(bytes: Vec<u8>) -> PacketReader {
        PacketReader::new(Box::new(std::io::Cursor::new(bytes)))
    }

    fn writer() -> PacketWriter {
        PacketWriter::new(Box::new(tokio::io::sink()))
    }

    #[tokio::test]
    async fn test_plain_packets_in_order() {
        let mut out = writer();
        let mut wire = out.compile(b"\x05first").unwrap();
        wire.extend(out.compile(b"\x05second").unwrap());
        assert_eq!(out.sequence(), 2);

        let mut reader = reader_over(wire);
        let first = reader.read_packet().await.unwrap();
        assert_eq!(first.payload, b"\x05first");
        assert_eq!(first.sequence, 0);
        let second = reader.read_packet().await.unwrap();
        assert_eq!(second.payload, b"\x05second");
        assert_eq!(second.sequence, 1);
    }

    #[tokio::test]
    async fn test_encrypted_alignment_and_roundtrip() {
        let set = symmetric_set(
            CipherAlgorithm::Aes256Cbc,
            MacAlgorithm::HmacSha256,
            CompressionAlgorithm::None,
        );
        let keys = mirrored_keys();
        let mut out = writer();
        out.activate(DirectionState::outbound(&set, &keys).unwrap());

        let mut wire = Vec::new();
        for len in [0usize, 1, 11, 16, 1000] {
            let compiled = out.compile(&vec![0x5e; len]).unwrap();
            assert_eq!((compiled.len() - 32) % 16, 0);
            assert!(compiled.len() - 32 >= 16);
            wire.extend(compiled);
        }

        let mut reader = reader_over(wire);
        reader.activate(DirectionState::inbound(&set, &keys).unwrap());
        for (seq, len) in [0usize, 1, 11, 16, 1000].into_iter().enumerate() {
            let packet = reader.read_packet().await.unwrap();
            assert_eq!(packet.payload, vec![0x5e; len]);
            assert_eq!(packet.sequence, seq as u32);
        }
    }

    #[tokio::test]
    async fn test_oversized_payload_keeps_zlib_stream_in_sync() {
        let set = symmetric_set(
            CipherAlgorithm::Aes128Cbc,
            MacAlgorithm::HmacSha1,
            CompressionAlgorithm::Zlib,
        );
        let keys = mirrored_keys();
        let mut out = writer();
        out.activate(DirectionState::outbound(&set, &keys).unwrap());

        let mut wire = out.compile(b"\x5ebefore").unwrap();
        assert!(matches!(
            out.compile(&vec![0x5e; MAX_PACKET_SIZE]),
            Err(CsshError::Protocol(_))
        ));
        assert_eq!(out.sequence(), 1);
        wire.extend(out.compile(b"\x5eafter").unwrap());

        let mut reader = reader_over(wire);
        reader.activate(DirectionState::inbound(&set, &keys).unwrap());
        assert_eq!(reader.read_packet().await.unwrap().payload, b"\x5ebefore");
        let after = reader.read_packet().await.unwrap();
        assert_eq!(after.payload, b"\x5eafter");
        assert_eq!(after.sequence, 1);
    }

    #[tokio::test]
    async fn test_compressed_roundtrip() {
        let set = symmetric_set(
            CipherAlgorithm::Aes128Cbc,
            MacAlgorithm::HmacSha1,
            CompressionAlgorithm::Zlib,
        );
        let keys = mirrored_keys();
        let mut out = writer();
        out.activate(DirectionState::outbound(&set, &keys).unwrap());
        let payload = b"\x5eabcabcabcabcabcabcabcabcabcabcabc".to_vec();
        let mut wire = out.compile(&payload).unwrap();
        wire.extend(out.compile(&payload).unwrap());

        let mut reader = reader_over(wire);
        reader.activate(DirectionState::inbound(&set, &keys).unwrap());
        assert_eq!(reader.read_packet().await.unwrap().payload, payload);
        assert_eq!(reader.read_packet().await.unwrap().payload, payload);
    }

    #[tokio::test]
    async fn test_mac_failure_is_reported_and_consumes_sequence() {
        let set = symmetric_set(
            CipherAlgorithm::Aes128Cbc,
            MacAlgorithm::HmacSha256,
            CompressionAlgorithm::None,
        );
        let keys = mirrored_keys();
        let mut out = writer();
        out.activate(DirectionState::outbound(&set, &keys).unwrap());
        let mut wire = out.compile(b"\x02ignored").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let mut reader = reader_over(wire);
        reader.activate(DirectionState::inbound(&set, &keys).unwrap());
        match reader.read_packet().await {
            Err(CsshError::MacVerification { sequence }) => assert_eq!(sequence, 0),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(reader.sequence(), 1);
    }

    #[tokio::test]
    async fn test_sequence_wraps() {
        let set = symmetric_set(
            CipherAlgorithm::Aes128Cbc,
            MacAlgorithm::HmacSha1,
            CompressionAlgorithm::None,
        );
        let keys = mirrored_keys();
        let mut out = writer();
        out.activate(DirectionState::outbound(&set, &keys).unwrap());
        out.set_sequence(u32::MAX);
        let wire = out.compile(b"\x02x").unwrap();
        assert_eq!(out.sequence(), 0);

        // A reader expecting sequence 0 must reject a tag made with u32::MAX.
        let mut reader = reader_over(wire);
        reader.activate(DirectionState::inbound(&set, &keys).unwrap());
        assert!(matches!(
            reader.read_packet().await,
            Err(CsshError::MacVerification { sequence: 0 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let mut wire = vec![0u8; 16];
        wire[..4].copy_from_slice(&100_000u32.to_be_bytes());
        let mut reader = reader_over(wire);
        assert!(matches!(
            reader.read_packet().await,
            Err(CsshError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_io_error() {
        let mut reader = reader_over(vec![0, 0, 0]);
        assert!(matches!(reader.read_packet().await, Err(CsshError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_line_limits() {
        let mut reader = reader_over(b"hello\r\nSSH-2.0-x\r\n".to_vec());
        assert_eq!(reader.read_line(255).await.unwrap(), b"hello\r\n");
        assert_eq!(reader.read_line(255).await.unwrap(), b"SSH-2.0-x\r\n");

        let mut reader = reader_over(vec![b'a'; 300]);
        assert!(reader.read_line(255).await.is_err());
    }

    #[tokio::test]
    async fn test_sender_serializes_concurrent_sends() {
        let (client, server) = tokio::io::duplex(1 << 20);
        let (_unused_reader, sender) = split(server);
        let mut reader = PacketReader::new(Box::new(client));

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    sender.send(&[0x5e, i]).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut counts = [0usize; 8];
        for expected in 0..80u32 {
            let packet = reader.read_packet().await.unwrap();
            assert_eq!(packet.sequence, expected);
            counts[packet.payload[1] as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c == 10));
        assert_eq!(sender.sequence().await, 80);
    }
}
