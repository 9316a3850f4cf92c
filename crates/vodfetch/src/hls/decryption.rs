// HLS Decryption Service: fetches AES-128 keys and decrypts segment payloads.

use std::collections::HashMap;
use std::time::Duration;

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use parking_lot::Mutex;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::hls::segment::{IvSource, KeyRef, SegmentDescriptor};
use crate::{DownloadError, SegmentError};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// Resolved AES-128 key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptionKey {
    pub bytes: [u8; 16],
}

/// Fetches each distinct key URI once per job and caches the result.
pub struct KeyProvider {
    client: Client,
    timeout: Duration,
    cache: Mutex<HashMap<Url, DecryptionKey>>,
}

impl KeyProvider {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self, uri: &Url) -> Option<DecryptionKey> {
        self.cache.lock().get(uri).copied()
    }

    /// Fetch (or return the cached) key for `key`. Key requests are not retried.
    pub async fn resolve(&self, key: &KeyRef) -> Result<DecryptionKey, DownloadError> {
        if let Some(cached) = self.cached(&key.uri) {
            return Ok(cached);
        }

        let response = self
            .client
            .get(key.uri.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownloadError::key(key.uri.as_str(), e))?;
        if !response.status().is_success() {
            return Err(DownloadError::key(
                key.uri.as_str(),
                format!("HTTP {}", response.status()),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::key(key.uri.as_str(), e))?;

        let bytes: [u8; 16] = body.as_ref().try_into().map_err(|_| {
            DownloadError::key(
                key.uri.as_str(),
                format!("expected 16 key bytes, got {}", body.len()),
            )
        })?;
        let resolved = DecryptionKey { bytes };
        self.cache.lock().insert(key.uri.clone(), resolved);
        debug!(uri = %key.uri, "Fetched decryption key");
        Ok(resolved)
    }

    /// Resolve every distinct key referenced by `segments`, in playlist order.
    pub async fn resolve_all(&self, segments: &[SegmentDescriptor]) -> Result<(), DownloadError> {
        for key in segments.iter().filter_map(|s| s.key.as_ref()) {
            self.resolve(key).await?;
        }
        Ok(())
    }

    /// Key for an encrypted segment. Keys must have been resolved up front.
    pub fn key_for(&self, segment: &SegmentDescriptor) -> Result<Option<DecryptionKey>, SegmentError> {
        match &segment.key {
            None => Ok(None),
            Some(key) => self
                .cached(&key.uri)
                .map(Some)
                .ok_or_else(|| SegmentError::corrupt(format!("no key resolved for {}", key.uri))),
        }
    }
}

pub fn iv_for(segment: &SegmentDescriptor) -> [u8; 16] {
    match segment.iv {
        IvSource::Explicit(iv) => iv,
        IvSource::Sequence(sequence) => IvSource::sequence_iv(sequence),
    }
}

/// AES-128-CBC decrypt `data`.
///
/// Trailing PKCS7 padding is removed when it is well formed and kept otherwise.
/// Results shorter than `min_bytes` are reported as corrupt.
pub fn decrypt_segment(
    data: &[u8],
    key: &[u8; 16],
    iv: &[u8; 16],
    min_bytes: usize,
) -> Result<Bytes, SegmentError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(SegmentError::corrupt(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            data.len()
        )));
    }

    let mut buffer = data.to_vec();
    let cipher = Aes128CbcDec::new(key.into(), iv.into());
    let len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|e| SegmentError::corrupt(format!("decryption failed: {e}")))?
        .len();
    buffer.truncate(len);

    let unpadded = pkcs7_len(&buffer).unwrap_or(buffer.len());
    buffer.truncate(unpadded);

    if buffer.len() < min_bytes {
        return Err(SegmentError::corrupt(format!(
            "decrypted payload is {} bytes, expected at least {min_bytes}",
            buffer.len()
        )));
    }
    Ok(Bytes::from(buffer))
}

/// Decrypt on the blocking pool when `offload` is set.
pub async fn decrypt_offloaded(
    data: Bytes,
    key: DecryptionKey,
    iv: [u8; 16],
    min_bytes: usize,
    offload: bool,
) -> Result<Bytes, SegmentError> {
    if !offload {
        return decrypt_segment(&data, &key.bytes, &iv, min_bytes);
    }
    tokio::task::spawn_blocking(move || decrypt_segment(&data, &key.bytes, &iv, min_bytes))
        .await
        .map_err(|e| SegmentError::corrupt(format!("decryption task failed: {e}")))?
}

fn pkcs7_len(buffer: &[u8]) -> Option<usize> {
    let pad = usize::from(*buffer.last()?);
    if pad == 0 || pad > BLOCK_SIZE || pad > buffer.len() {
        return None;
    }
    let (body, padding) = buffer.split_at(buffer.len() - pad);
    padding
        .iter()
        .all(|b| usize::from(*b) == pad)
        .then_some(body.len())
}
