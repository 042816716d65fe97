//! Registry behavior under concurrent and out-of-order completion.
//!
//! # Design
//! A recording transport detaches every completer and keeps the adapted
//! requests, so each test decides when and in which order requests finish by
//! calling back into the registry by sequence id. No network is involved.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use courier_core::{
    Completer, DispatchConfig, DispatchRegistry, ErrorCode, HttpMethod, ModelError,
    RequestDescriptor, RequestKind, RequestListener, RetryPolicy, SeqId, TextAdapter, Transport,
    TransportError, TransportRequest, TransportResponse,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde::Deserialize;

#[derive(Default)]
struct Recording {
    requests: Mutex<Vec<TransportRequest>>,
    cancelled: Mutex<Vec<SeqId>>,
}

impl Recording {
    fn request(&self, seq_id: SeqId) -> TransportRequest {
        self.requests
            .lock()
            .iter()
            .find(|r| r.seq_id == seq_id)
            .cloned()
            .unwrap()
    }
}

impl Transport for Recording {
    fn enqueue(&self, request: TransportRequest, completer: Completer) {
        completer.into_seq_id();
        self.requests.lock().push(request);
    }

    fn cancel(&self, seq_id: SeqId) {
        self.cancelled.lock().push(seq_id);
    }
}

fn setup() -> (DispatchRegistry, Arc<Recording>) {
    let transport = Arc::new(Recording::default());
    (DispatchRegistry::new(Arc::clone(&transport)), transport)
}

fn descriptor(url: &str) -> RequestDescriptor {
    let mut d = RequestDescriptor::new();
    d.url = url.to_string();
    d
}

/// Every delivery as `(seq_id, outcome)`, in arrival order.
type Deliveries = Arc<Mutex<Vec<(SeqId, Result<Option<String>, ErrorCode>)>>>;

fn recording_listener(log: &Deliveries) -> RequestListener<String> {
    let log = Arc::clone(log);
    RequestListener::new().on_both(move |seq, result| {
        log.lock()
            .push((seq, result.map(|(_, data)| data).map_err(|e| e.code)));
    })
}

#[test]
fn sequence_ids_are_strictly_increasing() {
    let (registry, _transport) = setup();
    let ids: Vec<SeqId> = (0..50)
        .map(|i| {
            registry
                .submit(descriptor(&format!("/r/{i}")), TextAdapter, RequestListener::new())
                .unwrap()
        })
        .collect();
    assert_eq!(ids[0], SeqId::new(1));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn concurrent_submit_and_shuffled_completion_delivers_each_once() {
    let (registry, transport) = setup();
    let log: Deliveries = Arc::default();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = registry.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        let url = format!("/t{t}/r{i}");
                        let seq = registry
                            .submit(descriptor(&url), TextAdapter, recording_listener(&log))
                            .unwrap();
                        (seq, url)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let submitted: Vec<(SeqId, String)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let unique: HashSet<SeqId> = submitted.iter().map(|(s, _)| *s).collect();
    assert_eq!(unique.len(), 200);
    assert_eq!(registry.in_flight(), 200);

    // Complete from several threads in reverse order, each with a body naming
    // its own URL, so a cross-delivery would show up as a mismatch.
    let urls: HashMap<SeqId, String> = submitted.iter().cloned().collect();
    let mut order: Vec<SeqId> = submitted.iter().map(|(s, _)| *s).collect();
    order.reverse();
    let completers: Vec<_> = order
        .chunks(50)
        .map(|chunk| {
            let registry = registry.clone();
            let transport = Arc::clone(&transport);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for seq in chunk {
                    let url = transport.request(seq).url;
                    assert!(registry.on_transport_success(seq, TransportResponse::new(200).with_body(url.clone())));
                    assert!(!registry.on_transport_success(seq, TransportResponse::new(200).with_body(url)));
                }
            })
        })
        .collect();
    for handle in completers {
        handle.join().unwrap();
    }

    let log = log.lock();
    assert_eq!(log.len(), 200);
    let delivered: HashSet<SeqId> = log.iter().map(|(s, _)| *s).collect();
    assert_eq!(delivered, unique);
    for (seq, outcome) in log.iter() {
        assert_eq!(outcome.as_ref().unwrap().as_deref(), Some(urls[seq].as_str()));
    }
    assert_eq!(registry.in_flight(), 0);
}

#[test]
fn cancel_before_completion_suppresses_listener() {
    let (registry, transport) = setup();
    let log: Deliveries = Arc::default();
    let seq = registry
        .submit(descriptor("/a"), TextAdapter, recording_listener(&log))
        .unwrap();

    assert!(registry.cancel(seq));
    assert!(!registry.on_transport_success(seq, TransportResponse::new(200)));
    assert!(!registry.on_transport_error(seq, TransportError::Timeout { attempts: 2 }));
    assert!(log.lock().is_empty());
    assert_eq!(*transport.cancelled.lock(), vec![seq]);
}

#[test]
fn cancel_after_completion_is_a_no_op() {
    let (registry, transport) = setup();
    let log: Deliveries = Arc::default();
    let seq = registry
        .submit(descriptor("/a"), TextAdapter, recording_listener(&log))
        .unwrap();

    registry.on_transport_error(seq, TransportError::NoConnection("refused".into()));
    assert!(!registry.cancel(seq));
    assert_eq!(*log.lock(), vec![(seq, Err(ErrorCode::NoConnection))]);
    assert!(transport.cancelled.lock().is_empty());
}

#[test]
fn unknown_seq_id_is_ignored() {
    let (registry, _transport) = setup();
    assert!(!registry.on_transport_success(SeqId::new(99), TransportResponse::new(200)));
    assert!(!registry.cancel(SeqId::new(99)));
}

#[test]
fn transport_errors_map_to_error_codes() {
    let (registry, _transport) = setup();
    let log: Deliveries = Arc::default();
    let cases = [
        (TransportError::Timeout { attempts: 2 }, ErrorCode::Timeout),
        (TransportError::NoConnection("down".into()), ErrorCode::NoConnection),
        (TransportError::Network("reset".into()), ErrorCode::Network),
    ];
    for (error, _) in &cases {
        let seq = registry
            .submit(descriptor("/e"), TextAdapter, recording_listener(&log))
            .unwrap();
        registry.on_transport_error(seq, error.clone());
    }
    let codes: Vec<ErrorCode> = log.lock().iter().map(|(_, r)| r.clone().unwrap_err()).collect();
    let expected: Vec<ErrorCode> = cases.iter().map(|(_, code)| *code).collect();
    assert_eq!(codes, expected);
}

#[test]
fn upload_gets_longer_timeout_than_other_kinds() {
    let (registry, transport) = setup();
    let upload = registry.upload().url("/files").load().unwrap();
    let text = registry.text().url("/t").load().unwrap();
    let download = registry.download().url("/d").load().unwrap();

    assert_eq!(
        transport.request(upload.seq_id()).retry.timeout,
        Duration::from_millis(DispatchConfig::UPLOAD_TIMEOUT_MS)
    );
    for ticket in [text, download] {
        let retry = transport.request(ticket.seq_id()).retry;
        assert_eq!(retry, RetryPolicy::default());
        assert_eq!(retry.timeout, Duration::from_secs(20));
        assert_eq!(retry.max_retries, 1);
    }
}

#[test]
fn builder_policy_overrides_apply_per_kind() {
    let transport = Arc::new(Recording::default());
    let fast = RetryPolicy::new(Duration::from_millis(500), 0, 1.0);
    let registry = DispatchRegistry::builder(Arc::clone(&transport))
        .config(&DispatchConfig::default())
        .policy(RequestKind::Binary, fast)
        .build();

    let ticket = registry.binary().url("/b").load().unwrap();
    assert_eq!(transport.request(ticket.seq_id()).retry, fast);
    assert_eq!(registry.policy(RequestKind::Binary), fast);
    assert_eq!(registry.policy(RequestKind::Text), RetryPolicy::default());
}

#[test]
fn header_injection_follows_descriptor_flag() {
    let transport = Arc::new(Recording::default());
    let registry = DispatchRegistry::builder(Arc::clone(&transport))
        .header_injector(|d: &RequestDescriptor| {
            vec![
                ("Authorization".to_string(), format!("Bearer for {}", d.url)),
                ("x-app".to_string(), "injected".to_string()),
            ]
        })
        .build();

    let plain = registry.text().url("/plain").load().unwrap();
    let filled = registry
        .text()
        .url("/filled")
        .header("X-App", "caller")
        .fill_extra_headers(true)
        .load()
        .unwrap();

    let plain = transport.request(plain.seq_id());
    assert_eq!(plain.header("authorization"), None);

    let filled = transport.request(filled.seq_id());
    assert_eq!(filled.header("authorization"), Some("Bearer for /filled"));
    assert_eq!(filled.header("X-App"), Some("injected"));
    assert_eq!(
        filled
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("x-app"))
            .count(),
        1
    );
}

#[test]
fn json_model_receives_typed_payload() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Doc {
        x: i64,
    }

    let (registry, transport) = setup();
    let got = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&got);
    let ticket = registry
        .json::<Doc>()
        .url("/doc")
        .param("id", 7)
        .on_success(move |meta, data| sink.lock().push((meta.status, data)))
        .load()
        .unwrap();

    assert_eq!(transport.request(ticket.seq_id()).url, "/doc?id=7");
    assert_eq!(transport.request(ticket.seq_id()).method, HttpMethod::Get);
    registry.on_transport_success(
        ticket.seq_id(),
        TransportResponse::new(200)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"x":1}"#),
    );
    assert_eq!(*got.lock(), vec![(200, Some(Doc { x: 1 }))]);
}

#[test]
fn decode_failure_is_reported_once_and_clears_entry() {
    let (registry, _transport) = setup();
    let errors = Arc::new(Mutex::new(Vec::<ModelError>::new()));
    let sink = Arc::clone(&errors);
    let ticket = registry
        .json::<serde_json::Value>()
        .url("/bad")
        .on_success(|_, _| panic!("decode should have failed"))
        .on_error(move |e| sink.lock().push(e))
        .load()
        .unwrap();

    assert!(registry.on_transport_success(ticket.seq_id(), TransportResponse::new(200).with_body("{")));
    assert!(!registry.on_transport_success(ticket.seq_id(), TransportResponse::new(200).with_body("{}")));
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::Decode);
    assert!(!ticket.is_pending());
}

#[test]
fn http_status_error_carries_status_and_body() {
    let (registry, _transport) = setup();
    let errors = Arc::new(Mutex::new(Vec::<ModelError>::new()));
    let sink = Arc::clone(&errors);
    let ticket = registry
        .text()
        .url("/missing")
        .on_error(move |e| sink.lock().push(e))
        .load()
        .unwrap();
    registry.on_transport_success(ticket.seq_id(), TransportResponse::new(404).with_body("nope"));
    let errors = errors.lock();
    assert_eq!(errors[0].code, ErrorCode::HttpStatus);
    assert!(errors[0].message.contains("404"));
    assert!(errors[0].message.contains("nope"));
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Success,
    Failure,
    Cancel,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![Just(Event::Success), Just(Event::Failure), Just(Event::Cancel)]
}

proptest! {
    /// Whatever the interleaving of completions and cancellations, each
    /// request is delivered at most once, and exactly once when the first
    /// event to reach it was a completion.
    #[test]
    fn any_interleaving_delivers_at_most_once(
        requests in 1usize..12,
        events in prop::collection::vec((0usize..12, event()), 0..60),
    ) {
        let (registry, _transport) = setup();
        let log: Deliveries = Arc::default();
        let ids: Vec<SeqId> = (0..requests)
            .map(|i| {
                registry
                    .submit(descriptor(&format!("/p/{i}")), TextAdapter, recording_listener(&log))
                    .unwrap()
            })
            .collect();

        let mut first: HashMap<SeqId, Event> = HashMap::new();
        for (index, event) in events {
            let seq = ids[index % requests];
            first.entry(seq).or_insert(event);
            match event {
                Event::Success => {
                    registry.on_transport_success(seq, TransportResponse::new(200));
                }
                Event::Failure => {
                    registry.on_transport_error(seq, TransportError::Network("boom".into()));
                }
                Event::Cancel => {
                    registry.cancel(seq);
                }
            }
        }

        let log = log.lock();
        let mut counts: HashMap<SeqId, usize> = HashMap::new();
        for (seq, _) in log.iter() {
            *counts.entry(*seq).or_default() += 1;
        }
        for seq in &ids {
            let expected = match first.get(seq) {
                Some(Event::Success) | Some(Event::Failure) => 1,
                Some(Event::Cancel) | None => 0,
            };
            prop_assert_eq!(counts.get(seq).copied().unwrap_or(0), expected);
        }
        prop_assert_eq!(registry.in_flight(), requests - first.len());
    }
}
