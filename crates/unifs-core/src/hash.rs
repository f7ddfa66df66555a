//! Backend-independent content fingerprint.
//!
//! The stream is cut into consecutive [`BLOCK_SIZE`] blocks (the last one may
//! be shorter). Each block is hashed with SHA-256, and the block digests are
//! fed in order into one cumulative SHA-256 whose hex digest is the result.
//! This is the block-wise scheme used by a well-known cloud storage API, so
//! hashes computed here can be compared against hashes it reports.
//!
//! An empty stream contributes no block digests; its hash is the SHA-256 of
//! nothing. A stream whose length is an exact multiple of the block size does
//! not get an extra empty trailing block.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

use crate::cancel::OpContext;
use crate::error::FsResult;

/// Block size of the hashing scheme. Persisted hashes depend on it.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Hash a whole stream.
pub fn content_hash(reader: impl Read) -> FsResult<String> {
    content_hash_with(&OpContext::new(), reader)
}

/// Hash a whole stream, checking `ctx` before every block read.
#[tracing::instrument(skip_all, name = "hash.content")]
pub fn content_hash_with(ctx: &OpContext, mut reader: impl Read) -> FsResult<String> {
    let mut total = Sha256::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut blocks = 0usize;
    loop {
        ctx.check()?;
        let n = read_block(&mut reader, &mut block)?;
        if n == 0 {
            break;
        }
        total.update(Sha256::digest(&block[..n]));
        blocks += 1;
        if n < BLOCK_SIZE {
            break;
        }
    }
    tracing::trace!(blocks, "content hash complete");
    Ok(hex::encode(total.finalize()))
}

/// Hash an in-memory buffer.
pub fn content_hash_bytes(data: &[u8]) -> String {
    let mut total = Sha256::new();
    for chunk in data.chunks(BLOCK_SIZE) {
        total.update(Sha256::digest(chunk));
    }
    hex::encode(total.finalize())
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Incremental form of the content hash, fed through [`Write`].
#[derive(Clone, Default)]
pub struct ContentHasher {
    total: Sha256,
    block: Sha256,
    block_len: usize,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (BLOCK_SIZE - self.block_len).min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];
            if self.block_len == BLOCK_SIZE {
                let digest = std::mem::take(&mut self.block).finalize();
                self.total.update(digest);
                self.block_len = 0;
            }
        }
    }

    /// Hex digest of everything written so far.
    pub fn finalize(mut self) -> String {
        if self.block_len > 0 {
            self.total.update(self.block.finalize());
        }
        hex::encode(self.total.finalize())
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
