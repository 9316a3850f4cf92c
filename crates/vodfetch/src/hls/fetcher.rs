// HLS Segment Fetcher: performs a single HTTP attempt for one segment.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::RANGE;
use tracing::trace;

use crate::SegmentError;
use crate::hls::segment::SegmentDescriptor;

/// One download attempt of a segment's raw (possibly encrypted) bytes.
///
/// Retrying is the caller's concern.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch(
        &self,
        segment: &SegmentDescriptor,
        timeout: Duration,
    ) -> Result<Bytes, SegmentError>;
}

pub struct HttpSegmentFetcher {
    client: Client,
}

impl HttpSegmentFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SegmentSource for HttpSegmentFetcher {
    async fn fetch(
        &self,
        segment: &SegmentDescriptor,
        timeout: Duration,
    ) -> Result<Bytes, SegmentError> {
        let mut request = self.client.get(segment.uri.clone()).timeout(timeout);
        if let Some(range) = &segment.byte_range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SegmentError::from_reqwest(e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SegmentError::HttpStatus {
                status,
                url: segment.uri.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SegmentError::from_reqwest(e, timeout))?;
        trace!(index = segment.index, len = body.len(), "Fetched segment body");
        Ok(body)
    }
}
