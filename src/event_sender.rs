//! Delivery of analytics event payloads to the events service.
//!
//! [`EventSender`] picks the best transport the [`Platform`] offers. With POST available, the
//! whole batch goes out as one JSON request that is retried once on a recoverable failure.
//! Otherwise, the batch is split into chunks small enough to fit in an image-pixel URL and each
//! chunk is sent fire-and-forget.
//!
//! Delivery is best-effort: failures are logged and never reported to the caller as errors.
use std::{collections::HashMap, ops::Range, sync::Arc};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Method;
use serde::Serialize;

use crate::{
    config::{EventSenderConfig, MAX_URL_LENGTH},
    headers::event_headers,
    http_errors::is_http_error_recoverable,
    platform::{HttpResponse, HttpTransport, Platform},
};

/// Total number of POST attempts for one chunk: the first try plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// Outcome of a delivered payload, derived from the server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryResult {
    /// HTTP status of the response.
    pub status: u16,
    /// Server time from the `Date` response header, if present and valid.
    pub server_time: Option<DateTime<Utc>>,
}

impl DeliveryResult {
    fn from_response(response: &HttpResponse) -> DeliveryResult {
        let server_time = response
            .header("date")
            .and_then(|date| DateTime::parse_from_rfc2822(date).ok())
            .map(|time| time.with_timezone(&Utc));

        DeliveryResult {
            status: response.status,
            server_time,
        }
    }
}

/// Sends event payloads through a [`Platform`].
pub struct EventSender {
    platform: Arc<dyn Platform>,
    image_url_path: String,
    headers: HashMap<String, String>,
}

impl EventSender {
    /// Create a new event sender.
    pub fn new(platform: Arc<dyn Platform>, config: &EventSenderConfig) -> EventSender {
        EventSender {
            platform,
            image_url_path: format!("/a/{}.gif", config.environment_id),
            headers: event_headers(config),
        }
    }

    /// Deliver `events` to `url`, splitting them into several requests if the platform cannot
    /// POST.
    ///
    /// Returns one entry per request sent. An entry is `None` when there's nothing to report:
    /// fire-and-forget sends and failed deliveries. Chunks are sent concurrently.
    pub async fn send_events<E: Serialize>(
        &self,
        events: &[E],
        url: &str,
    ) -> Vec<Option<DeliveryResult>> {
        if self.platform.http().is_none() {
            return Vec::new();
        }

        let serialized = match serialize_events(events) {
            Ok(serialized) => serialized,
            Err(err) => {
                log::warn!(target: "ld_common", count = events.len(); "dropping events that failed to serialize: {:?}", err);
                return Vec::new();
            }
        };

        let can_post = self.platform.http_allows_post();
        let chunks = if can_post {
            // A POST body has no practical size limit.
            vec![0..serialized.len()]
        } else {
            chunk_events_for_url(MAX_URL_LENGTH.saturating_sub(url.len()), &serialized)
        };

        log::debug!(target: "ld_common", count = events.len(), chunks = chunks.len(), can_post; "sending events");

        join_all(
            chunks
                .into_iter()
                .map(|range| self.send_json_chunk(json_array(&serialized[range]), url, can_post)),
        )
        .await
    }

    /// Deliver a single chunk of events.
    ///
    /// With `use_post`, the chunk is POSTed as JSON and the request retried once if it fails
    /// with a transport error or a recoverable HTTP status. Without it, the chunk is encoded
    /// into an image-pixel URL and pinged without waiting for a response.
    pub async fn send_chunk<E: Serialize>(
        &self,
        events: &[E],
        url: &str,
        use_post: bool,
    ) -> Option<DeliveryResult> {
        match serde_json::to_string(events) {
            Ok(body) => self.send_json_chunk(body, url, use_post).await,
            Err(err) => {
                log::warn!(target: "ld_common", count = events.len(); "dropping events that failed to serialize: {:?}", err);
                None
            }
        }
    }

    async fn send_json_chunk(
        &self,
        body: String,
        url: &str,
        use_post: bool,
    ) -> Option<DeliveryResult> {
        if use_post {
            let http = self.platform.http()?;
            self.post_with_retry(http, url, &body).await
        } else {
            if let Some(ping) = self.platform.fallback_ping() {
                ping.ping(&self.image_url(url, &body));
            }
            // One-way ping, nothing to wait for.
            None
        }
    }

    async fn post_with_retry(
        &self,
        http: &dyn HttpTransport,
        url: &str,
        body: &str,
    ) -> Option<DeliveryResult> {
        for attempt in 1..=MAX_ATTEMPTS {
            let can_retry = attempt < MAX_ATTEMPTS;

            log::debug!(target: "ld_common", attempt; "posting events");
            match http
                .request(Method::POST, url, &self.headers, Some(body))
                .await
            {
                // Fire-and-forget request, there is no status to report.
                Ok(None) => return None,
                Ok(Some(response)) => {
                    let status = response.status;
                    if status >= 400 && is_http_error_recoverable(status) && can_retry {
                        log::warn!(target: "ld_common", status, attempt; "recoverable error while sending events, retrying");
                        continue;
                    }
                    if status >= 400 {
                        log::warn!(target: "ld_common", status, attempt; "events service rejected events");
                    }
                    return Some(DeliveryResult::from_response(&response));
                }
                Err(err) => {
                    if can_retry {
                        log::warn!(target: "ld_common", attempt; "error while sending events, retrying: {:?}", err);
                        continue;
                    }
                    log::warn!(target: "ld_common", attempt; "error while sending events, dropping them: {:?}", err);
                    return None;
                }
            }
        }
        None
    }

    fn image_url(&self, url: &str, body: &str) -> String {
        format!(
            "{url}{}?d={}",
            self.image_url_path,
            URL_SAFE_NO_PAD.encode(body)
        )
    }
}

fn serialize_events<E: Serialize>(events: &[E]) -> serde_json::Result<Vec<String>> {
    events.iter().map(serde_json::to_string).collect()
}

/// Compact JSON array of already-serialized elements. Same output as `serde_json::to_string`
/// on the original slice.
fn json_array(serialized: &[String]) -> String {
    format!("[{}]", serialized.join(","))
}

/// Split serialized events into contiguous chunks whose JSON array, once URL-safe base64
/// encoded, is at most `max_length` characters.
///
/// Chunks are filled greedily in order. An event that exceeds `max_length` on its own still gets
/// a chunk of its own, it is never dropped.
pub fn chunk_events_for_url(max_length: usize, serialized: &[String]) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    // Length of "[" + events joined by "," + "]" for the current chunk.
    let mut json_length = 2;

    for (index, event) in serialized.iter().enumerate() {
        if index == start {
            json_length = 2 + event.len();
            continue;
        }

        let candidate = json_length + 1 + event.len();
        if encoded_length(candidate) > max_length {
            chunks.push(start..index);
            start = index;
            json_length = 2 + event.len();
        } else {
            json_length = candidate;
        }
    }

    if start < serialized.len() {
        chunks.push(start..serialized.len());
    }
    chunks
}

fn encoded_length(length: usize) -> usize {
    base64::encoded_len(length, false).unwrap_or(usize::MAX)
}
