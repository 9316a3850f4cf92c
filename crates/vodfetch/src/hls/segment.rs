use url::Url;

/// Absolute byte range within a segment resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for the HTTP `Range` header (inclusive end).
    pub fn header_value(&self) -> String {
        let end = self.offset.saturating_add(self.length.saturating_sub(1));
        format!("bytes={}-{}", self.offset, end)
    }
}

/// Reference to the key a segment is encrypted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub uri: Url,
    /// IV declared on the key tag, if any.
    pub iv: Option<[u8; 16]>,
}

/// How the CBC initialization vector for a segment is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSource {
    Explicit([u8; 16]),
    /// Derived from the media sequence number (`EXT-X-MEDIA-SEQUENCE` plus the
    /// segment's position), encoded as a 128-bit big-endian integer. This equals
    /// the zero-based segment index only when the playlist starts at sequence 0.
    Sequence(u64),
}

impl IvSource {
    pub fn sequence_iv(sequence: u64) -> [u8; 16] {
        u128::from(sequence).to_be_bytes()
    }
}

/// One segment of the selected rendition. `index` is authoritative for output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub index: usize,
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
    pub key: Option<KeyRef>,
    pub iv: IvSource,
}

impl SegmentDescriptor {
    /// An unencrypted, whole-resource segment.
    pub fn plain(index: usize, uri: Url) -> Self {
        Self {
            index,
            uri,
            byte_range: None,
            key: None,
            iv: IvSource::Sequence(index as u64),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }
}

const KNOWN_EXTENSIONS: [&str; 5] = ["ts", "aac", "mp4", "m4s", "m4a"];

/// File extension used for stored segments, taken from the first segment's URI.
pub fn segment_extension(segments: &[SegmentDescriptor]) -> &'static str {
    segments
        .first()
        .and_then(|s| {
            let path = s.uri.path();
            let (_, ext) = path.rsplit_once('.')?;
            let ext = ext.to_ascii_lowercase();
            KNOWN_EXTENSIONS.into_iter().find(|known| *known == ext)
        })
        .unwrap_or("ts")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn byte_range_header_is_inclusive() {
        let range = ByteRange {
            offset: 100,
            length: 50,
        };
        assert_eq!(range.header_value(), "bytes=100-149");
    }

    #[test]
    fn sequence_iv_is_big_endian() {
        let iv = IvSource::sequence_iv(0x0102);
        assert_eq!(&iv[..14], &[0u8; 14]);
        assert_eq!(iv[14], 0x01);
        assert_eq!(iv[15], 0x02);
    }

    #[test]
    fn extension_comes_from_first_segment() {
        let segments = vec![SegmentDescriptor::plain(
            0,
            url("https://cdn.example.com/v/seg-0.AAC?token=abc"),
        )];
        assert_eq!(segment_extension(&segments), "aac");

        let segments = vec![SegmentDescriptor::plain(
            0,
            url("https://cdn.example.com/v/seg-0.php"),
        )];
        assert_eq!(segment_extension(&segments), "ts");
        assert_eq!(segment_extension(&[]), "ts");
    }
}
