//! Length-framed, PKCS#7-padded, AES-128-CFB encrypted records.
//!
//! Wire layout: `u16_be length ‖ ciphertext`, where `ciphertext` is the
//! padded plaintext encrypted in place followed by the cleartext 16-byte
//! IV used for that encryption. See `encode`/`decode` for the exact
//! byte-for-byte contract.

use aes::Aes128;
use bytes::BytesMut;
use cfb_mode::{Decryptor, Encryptor};
use cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Fixed-size buffer used by each relay pipe, shared by consecutive
/// frames rather than allocated per frame.
pub const BUFFER_SIZE: usize = 4096;

/// Per-read upper bound on the plaintext side: leaves 64 bytes of slack
/// for PKCS#7 padding (at most 16 bytes) and the IV (16 bytes) within a
/// `BUFFER_SIZE` buffer, with headroom to spare.
pub const MAX_PLAINTEXT_LEN: usize = BUFFER_SIZE - 64;

const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// A 16-byte AES-128 pre-shared key, validated once at configuration
/// load time and then threaded through every session.
#[derive(Clone)]
pub struct FrameKey([u8; 16]);

impl FrameKey {
    pub fn new(key: [u8; 16]) -> Self {
        Self(key)
    }

    /// Decode a hex-encoded key, as carried in the JSON configuration.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Config(format!("invalid key hex: {e}")))?;
        let len = bytes.len();
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKeyLength(len))?;
        Ok(Self(arr))
    }
}

/// Encode `plaintext` as one frame and write it to `writer`, flushing
/// afterward. `scratch` is reused across calls so the pipe allocates
/// once per connection rather than once per frame.
pub async fn write_frame<W>(
    writer: &mut W,
    key: &FrameKey,
    plaintext: &[u8],
    scratch: &mut BytesMut,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let n = plaintext.len();
    if n > MAX_PLAINTEXT_LEN {
        return Err(Error::PlaintextTooLarge(n, MAX_PLAINTEXT_LEN));
    }
    let pad = BLOCK_LEN - (n % BLOCK_LEN);
    debug_assert!((1..=16).contains(&pad));

    scratch.clear();
    scratch.reserve(n + pad + IV_LEN);
    scratch.extend_from_slice(plaintext);
    scratch.extend(std::iter::repeat(pad as u8).take(pad));

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    scratch.extend_from_slice(&iv);

    let ciphertext_len = n + pad;
    let (ciphertext, _iv) = scratch.split_at_mut(ciphertext_len);
    Encryptor::<Aes128>::new_from_slices(&key.0, &iv)
        .expect("16-byte key and iv")
        .encrypt(ciphertext);

    let total = scratch.len();
    writer.write_u16(total as u16).await?;
    writer.write_all(scratch).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from `reader` and leave its decrypted, unpadded
/// plaintext in `scratch`. `scratch` is cleared and resized as needed;
/// reusing it across calls avoids a fresh allocation per frame.
pub async fn read_frame<R>(reader: &mut R, key: &FrameKey, scratch: &mut BytesMut) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    if len > BUFFER_SIZE {
        return Err(Error::FrameTooLarge(len, BUFFER_SIZE));
    }
    // A legitimately encoded frame's ciphertext is always at least one
    // full padding block (16 bytes) plus the IV (16 bytes); anything
    // shorter can't have a pad-length byte to read below.
    if len < IV_LEN + BLOCK_LEN {
        return Err(Error::FrameTooShort(len));
    }

    scratch.clear();
    scratch.resize(len, 0);
    reader.read_exact(&mut scratch[..]).await?;

    let ciphertext_len = len - IV_LEN;
    let (ciphertext, iv) = scratch.split_at_mut(ciphertext_len);
    Decryptor::<Aes128>::new_from_slices(&key.0, iv)
        .expect("16-byte key and iv")
        .decrypt(ciphertext);

    if ciphertext_len % BLOCK_LEN != 0 {
        return Err(Error::FrameMisaligned(ciphertext_len));
    }
    let pad = scratch[ciphertext_len - 1];
    if pad == 0 || pad as usize > BLOCK_LEN {
        return Err(Error::PaddingInvalid(pad));
    }

    scratch.truncate(ciphertext_len - pad as usize);
    Ok(())
}
