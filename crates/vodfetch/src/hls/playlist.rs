// HLS Playlist Resolver: fetches a playlist, picks one rendition and turns it into segment descriptors.

use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::{Key, KeyMethod, MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::ManifestError;
use crate::hls::segment::{ByteRange, IvSource, KeyRef, SegmentDescriptor};

/// Segment list of the rendition a job will download.
#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    /// URL of the media playlist the segments came from (after variant selection and redirects).
    pub media_url: Url,
    pub segments: Vec<SegmentDescriptor>,
    /// Whether the input was a master playlist and a variant had to be picked.
    pub variant_selected: bool,
}

#[async_trait]
pub trait PlaylistResolver: Send + Sync {
    async fn resolve(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<ResolvedPlaylist, ManifestError>;
}

/// Resolver backed by HTTP and `m3u8-rs`.
pub struct PlaylistEngine {
    client: Client,
}

impl PlaylistEngine {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_playlist(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> Result<(Playlist, Url), ManifestError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ManifestError::unreachable(url.as_str(), e))?;
        if !response.status().is_success() {
            return Err(ManifestError::unreachable(
                url.as_str(),
                format!("HTTP {}", response.status()),
            ));
        }
        // Relative URIs resolve against the final location, not the requested one.
        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ManifestError::unreachable(url.as_str(), e))?;

        let playlist = parse_playlist_bytes(&body, url.as_str())?;
        Ok((playlist, final_url))
    }
}

#[async_trait]
impl PlaylistResolver for PlaylistEngine {
    async fn resolve(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<ResolvedPlaylist, ManifestError> {
        let playlist_url =
            Url::parse(url).map_err(|e| ManifestError::malformed(url, format!("invalid URL: {e}")))?;

        let (playlist, base) = self.fetch_playlist(&playlist_url, timeout).await?;
        let (media, media_url, variant_selected) = match playlist {
            Playlist::MediaPlaylist(media) => (media, base, false),
            Playlist::MasterPlaylist(master) => {
                let variant_url = select_variant(&master, &base)?;
                info!(variant = %variant_url, "Selected highest-bandwidth variant");
                match self.fetch_playlist(&variant_url, timeout).await? {
                    (Playlist::MediaPlaylist(media), media_url) => (media, media_url, true),
                    (Playlist::MasterPlaylist(_), _) => {
                        return Err(ManifestError::malformed(
                            variant_url.as_str(),
                            "variant points at another master playlist",
                        ));
                    }
                }
            }
        };

        let segments = descriptors_from_media(&media, &media_url)?;
        debug!(
            url = %media_url,
            segments = segments.len(),
            encrypted = segments.iter().any(SegmentDescriptor::is_encrypted),
            "Resolved media playlist"
        );
        Ok(ResolvedPlaylist {
            media_url,
            segments,
            variant_selected,
        })
    }
}

pub fn parse_playlist_bytes(body: &[u8], url: &str) -> Result<Playlist, ManifestError> {
    if std::str::from_utf8(body).is_err() {
        return Err(ManifestError::malformed(url, "content is not valid UTF-8"));
    }
    parse_playlist_res(body).map_err(|_| ManifestError::malformed(url, "not a valid HLS playlist"))
}

/// Pick the variant with the highest declared bandwidth; ties go to the first listed.
pub fn select_variant(master: &MasterPlaylist, base: &Url) -> Result<Url, ManifestError> {
    let mut best: Option<&m3u8_rs::VariantStream> = None;
    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        if best.is_none_or(|b| variant.bandwidth > b.bandwidth) {
            best = Some(variant);
        }
    }
    let variant = best.ok_or_else(|| ManifestError::NoVariants {
        url: base.to_string(),
    })?;
    base.join(&variant.uri).map_err(|e| {
        ManifestError::malformed(
            base.as_str(),
            format!("cannot join variant URI {}: {e}", variant.uri),
        )
    })
}

/// Turn a media playlist into descriptors with absolute URIs, absolute byte
/// ranges and the key in force for every segment.
pub fn descriptors_from_media(
    playlist: &MediaPlaylist,
    base: &Url,
) -> Result<Vec<SegmentDescriptor>, ManifestError> {
    let mut descriptors = Vec::with_capacity(playlist.segments.len());
    let mut current_key: Option<KeyRef> = None;
    // End of the previous byte range, keyed by resource, for ranges without an offset.
    let mut previous_range_end: Option<(Url, u64)> = None;

    for (index, segment) in playlist.segments.iter().enumerate() {
        if segment.map.is_some() {
            return Err(ManifestError::Unsupported {
                feature: "EXT-X-MAP initialization sections".to_string(),
            });
        }
        if let Some(key) = &segment.key {
            current_key = key_ref(key, base)?;
        }
        if segment.uri.trim().is_empty() {
            return Err(ManifestError::malformed(
                base.as_str(),
                format!("segment {index} has an empty URI"),
            ));
        }
        let uri = base.join(segment.uri.trim()).map_err(|e| {
            ManifestError::malformed(
                base.as_str(),
                format!("cannot join segment URI {}: {e}", segment.uri),
            )
        })?;

        let byte_range = segment
            .byte_range
            .as_ref()
            .map(|range| {
                let offset = range.offset.unwrap_or_else(|| match &previous_range_end {
                    Some((prev_uri, end)) if *prev_uri == uri => *end,
                    _ => 0,
                });
                let end = offset.checked_add(range.length).ok_or_else(|| {
                    ManifestError::malformed(
                        base.as_str(),
                        format!("byte range of segment {index} overflows"),
                    )
                })?;
                Ok::<_, ManifestError>((
                    ByteRange {
                        offset,
                        length: range.length,
                    },
                    end,
                ))
            })
            .transpose()?;
        previous_range_end = byte_range.map(|(_, end)| (uri.clone(), end));
        let byte_range = byte_range.map(|(range, _)| range);

        let sequence = playlist
            .media_sequence
            .checked_add(index as u64)
            .ok_or_else(|| {
                ManifestError::malformed(
                    base.as_str(),
                    format!("media sequence number of segment {index} overflows"),
                )
            })?;
        let iv = match current_key.as_ref().and_then(|k| k.iv) {
            Some(iv) => IvSource::Explicit(iv),
            None => IvSource::Sequence(sequence),
        };

        descriptors.push(SegmentDescriptor {
            index,
            uri,
            byte_range,
            key: current_key.clone(),
            iv,
        });
    }

    if descriptors.is_empty() {
        return Err(ManifestError::EmptyPlaylist {
            url: base.to_string(),
        });
    }
    Ok(descriptors)
}

fn key_ref(key: &Key, base: &Url) -> Result<Option<KeyRef>, ManifestError> {
    match &key.method {
        KeyMethod::None => Ok(None),
        KeyMethod::AES128 => {
            let uri = key.uri.as_deref().ok_or_else(|| {
                ManifestError::malformed(base.as_str(), "AES-128 key tag without URI")
            })?;
            let uri = base.join(uri).map_err(|e| {
                ManifestError::malformed(base.as_str(), format!("cannot join key URI {uri}: {e}"))
            })?;
            let iv = key
                .iv
                .as_deref()
                .map(|iv| parse_iv(iv).map_err(|reason| ManifestError::malformed(base.as_str(), reason)))
                .transpose()?;
            Ok(Some(KeyRef { uri, iv }))
        }
        KeyMethod::SampleAES => Err(ManifestError::UnsupportedEncryption {
            method: "SAMPLE-AES".to_string(),
        }),
        KeyMethod::Other(method) => Err(ManifestError::UnsupportedEncryption {
            method: method.clone(),
        }),
    }
}

/// Parse a `0x`-prefixed hexadecimal IV; shorter values are left-padded with zeros.
pub fn parse_iv(value: &str) -> Result<[u8; 16], String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.is_empty() || digits.len() > 32 {
        return Err(format!("invalid IV length in '{value}'"));
    }
    let padded = format!("{digits:0>32}");
    let mut iv = [0u8; 16];
    hex::decode_to_slice(&padded, &mut iv).map_err(|e| format!("failed to parse IV '{value}': {e}"))?;
    Ok(iv)
}
