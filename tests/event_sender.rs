use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{TimeZone, Utc};
use ld_common::{
    DeliveryResult, Error, EventSender, EventSenderConfig, FallbackPing, HttpResponse,
    HttpTransport, Platform, Result, SdkMetadata, MAX_URL_LENGTH,
};
use reqwest::Method;
use serde_json::{json, Value};

const EVENTS_URL: &str = "https://events.example.com/events/bulk/env-id";

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    body: Option<String>,
}

/// Transport that replays scripted responses and records requests. Responds 202 once the script
/// runs out.
#[derive(Default)]
struct MockTransport {
    responses: Mutex<VecDeque<Result<Option<HttpResponse>>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    fn scripted(responses: impl IntoIterator<Item = Result<Option<HttpResponse>>>) -> Arc<Self> {
        Arc::new(MockTransport {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
    ) -> Result<Option<HttpResponse>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_owned(),
            headers: headers.clone(),
            body: body.map(str::to_owned),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Some(HttpResponse::new(202))))
    }
}

struct MockPlatform {
    transport: Option<Arc<MockTransport>>,
    allows_post: bool,
    ping: Option<Box<dyn FallbackPing>>,
}

impl Platform for MockPlatform {
    fn http(&self) -> Option<&dyn HttpTransport> {
        self.transport
            .as_ref()
            .map(|transport| transport.as_ref() as &dyn HttpTransport)
    }

    fn http_allows_post(&self) -> bool {
        self.allows_post
    }

    fn fallback_ping(&self) -> Option<&dyn FallbackPing> {
        self.ping.as_deref()
    }
}

fn config() -> EventSenderConfig {
    EventSenderConfig::from_environment_id("env-id").sdk(SdkMetadata {
        user_agent: "TestClient",
        version: "9.9.9",
    })
}

fn post_sender(transport: &Arc<MockTransport>) -> EventSender {
    let platform = MockPlatform {
        transport: Some(transport.clone()),
        allows_post: true,
        ping: None,
    };
    EventSender::new(Arc::new(platform), &config())
}

/// Sender that cannot POST. Returns pinged URLs.
fn pixel_sender(transport: &Arc<MockTransport>) -> (EventSender, Arc<Mutex<Vec<String>>>) {
    let pings = Arc::new(Mutex::new(Vec::new()));
    let recorder = pings.clone();
    let platform = MockPlatform {
        transport: Some(transport.clone()),
        allows_post: false,
        ping: Some(Box::new(move |url: &str| {
            recorder.lock().unwrap().push(url.to_owned())
        })),
    };
    (EventSender::new(Arc::new(platform), &config()), pings)
}

fn events(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "kind": "feature",
                "key": format!("flag-{i}"),
                "creationDate": 1_700_000_000_000u64 + i as u64,
                "contextKeys": {"user": "user-key"},
                "value": i % 2 == 0,
            })
        })
        .collect()
}

fn status(status: u16) -> Result<Option<HttpResponse>> {
    Ok(Some(HttpResponse::new(status)))
}

fn network_error() -> Result<Option<HttpResponse>> {
    // Any transport-level failure will do, an unparsable URL is the easiest to build.
    Err(Error::from(
        reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err(),
    ))
}

#[tokio::test]
async fn post_sends_whole_batch_in_one_request() {
    for count in [0, 1, 1000] {
        let transport = MockTransport::scripted([]);
        let sender = post_sender(&transport);
        let events = events(count);

        let results = sender.send_events(&events, EVENTS_URL).await;

        assert_eq!(results.len(), 1);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].url, EVENTS_URL);
        let body: Value = serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, Value::Array(events));
    }
}

#[tokio::test]
async fn post_carries_fixed_and_sdk_headers() {
    let transport = MockTransport::scripted([]);
    let sender = post_sender(&transport);

    sender.send_events(&events(1), EVENTS_URL).await;

    let headers = &transport.requests()[0].headers;
    assert_eq!(headers["Content-Type"], "application/json");
    assert_eq!(headers["X-LaunchDarkly-Event-Schema"], "3");
    assert_eq!(headers["User-Agent"], "TestClient/9.9.9");
}

#[tokio::test]
async fn success_reports_status_and_server_time() {
    let transport = MockTransport::scripted([Ok(Some(
        HttpResponse::new(202).with_header("Date", "Wed, 21 Oct 2015 07:28:00 GMT"),
    ))]);
    let sender = post_sender(&transport);

    let results = sender.send_events(&events(3), EVENTS_URL).await;

    assert_eq!(
        results,
        vec![Some(DeliveryResult {
            status: 202,
            server_time: Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap()),
        })]
    );
}

#[tokio::test]
async fn recoverable_failure_is_retried_once() {
    let transport = MockTransport::scripted([status(500), status(503), status(202)]);
    let sender = post_sender(&transport);

    let results = sender.send_events(&events(2), EVENTS_URL).await;

    // The second failure is final, the third scripted response is never requested.
    assert_eq!(transport.requests().len(), 2);
    assert_eq!(results, vec![Some(DeliveryResult { status: 503, server_time: None })]);
}

#[tokio::test]
async fn retry_can_succeed() {
    let transport = MockTransport::scripted([status(429), status(202)]);
    let sender = post_sender(&transport);

    let results = sender.send_events(&events(2), EVENTS_URL).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(requests[0].headers, requests[1].headers);
    assert_eq!(results, vec![Some(DeliveryResult { status: 202, server_time: None })]);
}

#[tokio::test]
async fn non_recoverable_failure_is_not_retried() {
    for code in [400, 401, 403, 404] {
        let transport = MockTransport::scripted([status(code)]);
        let sender = post_sender(&transport);

        let results = sender.send_events(&events(2), EVENTS_URL).await;

        assert_eq!(transport.requests().len(), 1, "status {code}");
        assert_eq!(results, vec![Some(DeliveryResult { status: code, server_time: None })]);
    }
}

#[tokio::test]
async fn network_error_is_retried_once_then_swallowed() {
    let transport = MockTransport::scripted([network_error(), network_error(), status(202)]);
    let sender = post_sender(&transport);

    let results = sender.send_events(&events(2), EVENTS_URL).await;

    assert_eq!(transport.requests().len(), 2);
    assert_eq!(results, vec![None]);
}

#[tokio::test]
async fn network_error_then_success() {
    let transport = MockTransport::scripted([network_error(), status(200)]);
    let sender = post_sender(&transport);

    let result = sender.send_chunk(&events(2), EVENTS_URL, true).await;

    assert_eq!(transport.requests().len(), 2);
    assert_eq!(result, Some(DeliveryResult { status: 200, server_time: None }));
}

#[tokio::test]
async fn fire_and_forget_response_has_no_result() {
    let transport = MockTransport::scripted([Ok(None)]);
    let sender = post_sender(&transport);

    let results = sender.send_events(&events(2), EVENTS_URL).await;

    assert_eq!(transport.requests().len(), 1);
    assert_eq!(results, vec![None]);
}

#[tokio::test]
async fn no_http_capability_is_a_noop() {
    let pings = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorder = pings.clone();
    let platform = MockPlatform {
        transport: None,
        allows_post: false,
        ping: Some(Box::new(move |url: &str| {
            recorder.lock().unwrap().push(url.to_owned())
        })),
    };
    let sender = EventSender::new(Arc::new(platform), &config());

    let results = sender.send_events(&events(10), EVENTS_URL).await;

    assert!(results.is_empty());
    assert!(pings.lock().unwrap().is_empty());
}

fn decode_ping(url: &str, base_url: &str) -> Vec<Value> {
    let prefix = format!("{base_url}/a/env-id.gif?d=");
    let data = url.strip_prefix(&prefix).expect("ping URL should use the image path");
    let json = URL_SAFE_NO_PAD.decode(data).unwrap();
    serde_json::from_slice(&json).unwrap()
}

#[tokio::test]
async fn pixel_fallback_splits_events_into_url_sized_chunks() {
    let transport = MockTransport::scripted([]);
    let (sender, pings) = pixel_sender(&transport);
    let events = events(200);

    let results = sender.send_events(&events, EVENTS_URL).await;

    assert!(transport.requests().is_empty());
    let pings = pings.lock().unwrap().clone();
    assert!(pings.len() > 1);
    assert_eq!(results, vec![None; pings.len()]);

    let mut delivered = Vec::new();
    for ping in &pings {
        let data = ping.split("?d=").nth(1).unwrap();
        assert!(data.len() <= MAX_URL_LENGTH - EVENTS_URL.len());
        delivered.extend(decode_ping(ping, EVENTS_URL));
    }
    assert_eq!(delivered, events);
}

#[tokio::test]
async fn pixel_fallback_keeps_oversized_event() {
    let transport = MockTransport::scripted([]);
    let (sender, pings) = pixel_sender(&transport);
    let huge = json!({"kind": "custom", "key": "huge", "data": "x".repeat(3 * MAX_URL_LENGTH)});
    let events = vec![json!({"kind": "custom", "key": "a"}), huge, json!({"kind": "custom", "key": "b"})];

    sender.send_events(&events, EVENTS_URL).await;

    let pings = pings.lock().unwrap().clone();
    let chunks: Vec<Vec<Value>> = pings.iter().map(|ping| decode_ping(ping, EVENTS_URL)).collect();
    assert_eq!(
        chunks,
        vec![vec![events[0].clone()], vec![events[1].clone()], vec![events[2].clone()]]
    );
}

#[tokio::test]
async fn pixel_fallback_without_ping_sends_nothing() {
    let transport = MockTransport::scripted([]);
    let platform = MockPlatform {
        transport: Some(transport.clone()),
        allows_post: false,
        ping: None,
    };
    let sender = EventSender::new(Arc::new(platform), &config());

    let results = sender.send_events(&events(5), EVENTS_URL).await;

    assert!(transport.requests().is_empty());
    assert!(results.iter().all(Option::is_none));
}

#[tokio::test]
async fn send_chunk_without_post_pings_once() {
    let transport = MockTransport::scripted([]);
    let (sender, pings) = pixel_sender(&transport);
    let events = events(3);

    let result = sender.send_chunk(&events, EVENTS_URL, false).await;

    assert_eq!(result, None);
    let pings = pings.lock().unwrap().clone();
    assert_eq!(pings.len(), 1);
    assert_eq!(decode_ping(&pings[0], EVENTS_URL), events);
}
