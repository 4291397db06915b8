//! Streaming AES-256-CBC engine for backup content.
//!
//! Every encrypted blob in a container is AES-256 in CBC mode with an all-zero IV.
//! The true plaintext length is not recoverable from the ciphertext: it is kept
//! out-of-band in the entry's `Size` property. Decryption therefore never strips
//! padding. It produces the raw CBC output and then truncates or zero-extends it
//! to the caller's size. With no size the raw output is returned as-is, which may
//! still end in PKCS#7 padding (see [`crate::padding`]).
//!
//! Encryption appends PKCS#7 padding, the layout the legacy decrypt path expects.

use crate::error::{Error, IoResultExt, Result};
use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    KeyIvInit,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::warn;
use zeroize::Zeroizing;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub const BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

const BUFFER_SIZE: usize = 16384;
const ZERO_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];
/// Largest zero run appended to reach a recorded size.
const MAX_ZERO_FILL: u64 = i32::MAX as u64;

/// A content key bound to the container's cipher mode.
pub struct StreamCipher {
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher").finish_non_exhaustive()
    }
}

impl StreamCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::UnsupportedCrypto(format!(
                "AES-256-CBC is not available for a {} byte key",
                key.len()
            )));
        }
        Ok(StreamCipher {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    fn decryptor(&self) -> Result<Aes256CbcDec> {
        Aes256CbcDec::new_from_slices(&self.key, &ZERO_IV)
            .map_err(|_| Error::UnsupportedCrypto("AES-256-CBC decryptor".to_string()))
    }

    fn encryptor(&self) -> Result<Aes256CbcEnc> {
        Aes256CbcEnc::new_from_slices(&self.key, &ZERO_IV)
            .map_err(|_| Error::UnsupportedCrypto("AES-256-CBC encryptor".to_string()))
    }

    /// Decrypt `reader` into `writer`.
    ///
    /// With `size` set, exactly `size` bytes are written: the raw output is
    /// truncated, or zero-extended if it is shorter. Returns the number of bytes
    /// written.
    pub fn decrypt<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        size: Option<u64>,
    ) -> Result<u64> {
        let mut cipher = self.decryptor()?;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut raw_length: u64 = 0;
        let mut written: u64 = 0;

        loop {
            let filled = read_full(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }
            if filled % BLOCK_SIZE != 0 {
                return Err(Error::InvalidFormat(format!(
                    "ciphertext length {} is not a multiple of the block size",
                    raw_length + filled as u64
                )));
            }
            for block in buffer[..filled].chunks_exact_mut(BLOCK_SIZE) {
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            raw_length += filled as u64;

            let take = match size {
                Some(size) => size.saturating_sub(written).min(filled as u64) as usize,
                None => filled,
            };
            writer.write_all(&buffer[..take])?;
            written += take as u64;

            if filled < buffer.len() {
                break;
            }
        }

        if let Some(size) = size {
            if raw_length < size || raw_length > size + BLOCK_SIZE as u64 {
                warn!(
                    expected = size,
                    decrypted = raw_length,
                    "decrypted size does not match the recorded size"
                );
            }
            if size - written > MAX_ZERO_FILL {
                return Err(Error::InvalidFormat(format!(
                    "recorded size {} is far beyond the {} decrypted bytes",
                    size, raw_length
                )));
            }
            let zeros = [0u8; BLOCK_SIZE];
            while written < size {
                let n = (size - written).min(BLOCK_SIZE as u64) as usize;
                writer.write_all(&zeros[..n])?;
                written += n as u64;
            }
        }

        writer.flush()?;
        Ok(written)
    }

    /// Encrypt `reader` into `writer` with PKCS#7 padding. Returns the number of
    /// plaintext bytes consumed.
    pub fn encrypt<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let mut cipher = self.encryptor()?;
        let mut buffer = vec![0u8; BUFFER_SIZE + BLOCK_SIZE];
        let mut total: u64 = 0;

        loop {
            let filled = read_full(&mut reader, &mut buffer[..BUFFER_SIZE])?;
            total += filled as u64;
            if filled < BUFFER_SIZE {
                let ciphertext = cipher
                    .encrypt_padded_mut::<Pkcs7>(&mut buffer, filled)
                    .map_err(|_| Error::InvalidFormat("padding buffer too small".to_string()))?;
                writer.write_all(ciphertext)?;
                break;
            }
            for block in buffer[..BUFFER_SIZE].chunks_exact_mut(BLOCK_SIZE) {
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            writer.write_all(&buffer[..BUFFER_SIZE])?;
        }

        writer.flush()?;
        Ok(total)
    }

    pub fn decrypt_bytes(&self, data: &[u8], size: Option<u64>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        self.decrypt(data, &mut out, size)?;
        Ok(out)
    }

    pub fn encrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() + BLOCK_SIZE);
        self.encrypt(data, &mut out)?;
        Ok(out)
    }

    pub fn decrypt_file(&self, source: &Path, destination: &Path, size: Option<u64>) -> Result<u64> {
        let input = File::open(source).at_path(source)?;
        let output = File::create(destination).at_path(destination)?;
        self.decrypt(
            BufReader::with_capacity(BUFFER_SIZE, input),
            BufWriter::with_capacity(BUFFER_SIZE, output),
            size,
        )
        .map_err(|e| attach_path(e, destination))
    }

    pub fn encrypt_file(&self, source: &Path, destination: &Path) -> Result<u64> {
        let input = File::open(source).at_path(source)?;
        let output = File::create(destination).at_path(destination)?;
        self.encrypt(
            BufReader::with_capacity(BUFFER_SIZE, input),
            BufWriter::with_capacity(BUFFER_SIZE, output),
        )
        .map_err(|e| attach_path(e, destination))
    }
}

/// Length of the ciphertext [`StreamCipher::encrypt`] produces for `plaintext_len` bytes.
pub fn encrypted_length(plaintext_len: u64) -> u64 {
    (plaintext_len / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64
}

fn attach_path(error: Error, path: &Path) -> Error {
    match error {
        Error::IoError(source) => Error::io(path, source),
        other => other,
    }
}

/// Fill `buffer` unless the reader hits end of stream first.
fn read_full<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
