//! Tests for [`ThrottleMediator`] — policy resolution, concurrency and rate
//! checks, outcome routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use heimdallr::throttle::{ThrottleConfig, ThrottleMediator};
use heimdallr::{
    HeimdallrError, MediationRegistry, Mediator, MessageContext, PolicySource, Replicator,
    Result, SequenceResolver,
};
use serde_json::json;

struct RecordingReplicator {
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingReplicator {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Replicator for RecordingReplicator {
    async fn replicate(&self, _key: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(HeimdallrError::Replication("cluster unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Sequence double with a fixed mediation result.
struct StubSequence {
    result: bool,
    invocations: AtomicUsize,
}

impl StubSequence {
    fn returning(result: bool) -> Arc<Self> {
        Arc::new(Self {
            result,
            invocations: AtomicUsize::new(0),
        })
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mediator for StubSequence {
    async fn mediate(&self, _ctx: &mut MessageContext) -> Result<bool> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.result)
    }
}

struct MapResolver {
    sequences: HashMap<String, Arc<dyn Mediator>>,
}

impl MapResolver {
    fn new(entries: Vec<(&str, Arc<dyn Mediator>)>) -> Arc<Self> {
        Arc::new(Self {
            sequences: entries
                .into_iter()
                .map(|(name, m)| (name.to_string(), m))
                .collect(),
        })
    }
}

impl SequenceResolver for MapResolver {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Mediator>> {
        self.sequences.get(name).cloned()
    }
}

/// Policy source double with switchable content and staleness.
struct StubPolicySource {
    bytes: Mutex<Vec<u8>>,
    stale: AtomicBool,
    fail: AtomicBool,
    fetches: AtomicUsize,
}

impl StubPolicySource {
    fn new(policy: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            bytes: Mutex::new(policy.to_string().into_bytes()),
            stale: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        })
    }

    fn replace(&self, policy: serde_json::Value) {
        *self.bytes.lock().unwrap() = policy.to_string().into_bytes();
        self.stale.store(true, Ordering::SeqCst);
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicySource for StubPolicySource {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(HeimdallrError::Configuration(format!(
                "registry entry {key:?} unavailable"
            )));
        }
        self.stale.store(false, Ordering::SeqCst);
        Ok(self.bytes.lock().unwrap().clone())
    }

    fn is_stale(&self, _key: &str) -> bool {
        self.stale.load(Ordering::SeqCst)
    }
}

fn request(ip: &str) -> MessageContext {
    MessageContext::request("m1", Vec::new()).with_remote_ip(ip)
}

#[tokio::test]
async fn concurrency_limit_one_admits_one_in_flight_request() {
    // end-to-end scenario: A takes the sole slot, B is rejected, A's
    // response frees the slot again
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline("t1", json!({ "max_concurrent_access": 1 })),
        Arc::clone(&registry),
    );

    let mut a = request("10.0.0.1");
    assert!(throttle.mediate(&mut a).await.unwrap());

    let mut b = request("10.0.0.2");
    assert!(!throttle.mediate(&mut b).await.unwrap());

    let mut a_response = MessageContext::response("m1", Vec::new());
    assert!(throttle.mediate(&mut a_response).await.unwrap());

    let mut c = request("10.0.0.3");
    assert!(throttle.mediate(&mut c).await.unwrap());
}

#[tokio::test]
async fn rate_rejection_releases_the_concurrency_slot() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline(
            "t1",
            json!({
                "max_concurrent_access": 1,
                "ip": [{ "key": "10.0.0.1", "max_count": 1, "unit_ms": 60000 }]
            }),
        ),
        Arc::clone(&registry),
    );

    // first request holds the slot, then its response returns it
    let mut first = request("10.0.0.1");
    assert!(throttle.mediate(&mut first).await.unwrap());
    let mut first_response = MessageContext::response("m1", Vec::new());
    throttle.mediate(&mut first_response).await.unwrap();

    // second request from the same IP is rate-rejected; without the
    // compensating release the sole slot would leak here
    let mut second = request("10.0.0.1");
    assert!(!throttle.mediate(&mut second).await.unwrap());

    let mut third = request("10.0.0.9");
    assert!(throttle.mediate(&mut third).await.unwrap());
}

#[tokio::test]
async fn sliding_window_scenario_per_ip() {
    // end-to-end scenario: limit 2 per window, three requests inside it
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline(
            "t1",
            json!({ "ip": [{ "key": "other", "max_count": 2, "unit_ms": 60 }] }),
        ),
        Arc::clone(&registry),
    );

    assert!(throttle.mediate(&mut request("10.0.0.1")).await.unwrap());
    assert!(throttle.mediate(&mut request("10.0.0.1")).await.unwrap());
    assert!(!throttle.mediate(&mut request("10.0.0.1")).await.unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(90)).await;
    assert!(throttle.mediate(&mut request("10.0.0.1")).await.unwrap());
}

#[tokio::test]
async fn domain_check_wins_over_ip_and_does_not_fall_back() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline(
            "t1",
            json!({
                "domain": [{ "key": "partner.example.com", "max_count": 1, "unit_ms": 60000 }],
                "ip": [{ "key": "other", "max_count": 100, "unit_ms": 60000 }]
            }),
        ),
        Arc::clone(&registry),
    );

    let caller = || {
        MessageContext::request("m1", Vec::new())
            .with_remote_ip("10.0.0.1")
            .with_remote_domain("partner.example.com")
    };

    assert!(throttle.mediate(&mut caller()).await.unwrap());
    // the domain budget is spent; the generous IP budget must not rescue it
    assert!(!throttle.mediate(&mut caller()).await.unwrap());
}

#[tokio::test]
async fn ip_throttling_applies_when_no_domain_rules_exist() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline(
            "t1",
            json!({ "ip": [{ "key": "10.0.0.1", "max_count": 1, "unit_ms": 60000 }] }),
        ),
        Arc::clone(&registry),
    );

    let caller = || {
        MessageContext::request("m1", Vec::new())
            .with_remote_ip("10.0.0.1")
            .with_remote_domain("partner.example.com")
    };

    assert!(throttle.mediate(&mut caller()).await.unwrap());
    assert!(!throttle.mediate(&mut caller()).await.unwrap());
}

#[tokio::test]
async fn unidentifiable_caller_is_permitted() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline(
            "t1",
            json!({ "ip": [{ "key": "other", "max_count": 1, "unit_ms": 60000 }] }),
        ),
        Arc::clone(&registry),
    );

    // neither domain nor IP resolvable: rejecting would be stricter than
    // the configured policy
    for _ in 0..5 {
        let mut anonymous = MessageContext::request("m1", Vec::new());
        assert!(throttle.mediate(&mut anonymous).await.unwrap());
    }
}

#[tokio::test]
async fn invalid_inline_policy_is_a_policy_error() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline("t1", json!({ "max_concurrent_access": -2 })),
        Arc::clone(&registry),
    );

    let mut ctx = request("10.0.0.1");
    assert!(matches!(
        throttle.mediate(&mut ctx).await,
        Err(HeimdallrError::Policy(_))
    ));
}

#[tokio::test]
async fn inline_policy_is_parsed_once_and_shared_by_id() {
    let registry = Arc::new(MediationRegistry::new());
    let policy = json!({ "max_concurrent_access": 1 });
    let first = ThrottleMediator::new(
        ThrottleConfig::inline("shared", policy.clone()),
        Arc::clone(&registry),
    );
    let second = ThrottleMediator::new(
        ThrottleConfig::inline("shared", policy),
        Arc::clone(&registry),
    );

    let mut a = request("10.0.0.1");
    assert!(first.mediate(&mut a).await.unwrap());

    // same group: a re-parse would have reset the counter and admitted this
    let mut b = request("10.0.0.2");
    assert!(!second.mediate(&mut b).await.unwrap());
}

#[tokio::test]
async fn keyed_policy_is_fetched_then_reloaded_when_stale() {
    let registry = Arc::new(MediationRegistry::new());
    let source = StubPolicySource::new(
        json!({ "ip": [{ "key": "other", "max_count": 1, "unit_ms": 60000 }] }),
    );
    let throttle = ThrottleMediator::new(
        ThrottleConfig::keyed("t1", "policies/orders"),
        Arc::clone(&registry),
    )
    .with_policy_source(source.clone());

    assert!(throttle.mediate(&mut request("10.0.0.1")).await.unwrap());
    assert!(!throttle.mediate(&mut request("10.0.0.1")).await.unwrap());
    assert_eq!(source.fetches(), 1);

    // a fresh document raises the limit; staleness forces a re-parse
    source.replace(json!({ "ip": [{ "key": "other", "max_count": 3, "unit_ms": 60000 }] }));
    assert!(throttle.mediate(&mut request("10.0.0.1")).await.unwrap());
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn keyed_policy_without_a_source_is_a_configuration_error() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::keyed("t1", "policies/orders"),
        Arc::clone(&registry),
    );

    let mut ctx = request("10.0.0.1");
    assert!(matches!(
        throttle.mediate(&mut ctx).await,
        Err(HeimdallrError::Configuration(_))
    ));
}

#[tokio::test]
async fn keyed_policy_fetch_failure_is_a_policy_error() {
    let registry = Arc::new(MediationRegistry::new());
    let source = StubPolicySource::new(json!({}));
    source.set_fail(true);
    let throttle = ThrottleMediator::new(
        ThrottleConfig::keyed("t1", "policies/orders"),
        Arc::clone(&registry),
    )
    .with_policy_source(source);

    let mut ctx = request("10.0.0.1");
    assert!(matches!(
        throttle.mediate(&mut ctx).await,
        Err(HeimdallrError::Policy(_))
    ));
}

#[tokio::test]
async fn outcomes_route_to_their_sequences() {
    let registry = Arc::new(MediationRegistry::new());
    let accept_seq = StubSequence::returning(true);
    let reject_seq = StubSequence::returning(false);
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline("t1", json!({ "max_concurrent_access": 1 }))
            .on_accept("accepted")
            .on_reject("rejected"),
        Arc::clone(&registry),
    )
    .with_resolver(MapResolver::new(vec![
        ("accepted", accept_seq.clone() as Arc<dyn Mediator>),
        ("rejected", reject_seq.clone() as Arc<dyn Mediator>),
    ]));

    let mut a = request("10.0.0.1");
    assert!(throttle.mediate(&mut a).await.unwrap());
    assert_eq!(accept_seq.invocations(), 1);

    let mut b = request("10.0.0.2");
    assert!(!throttle.mediate(&mut b).await.unwrap());
    assert_eq!(reject_seq.invocations(), 1);
}

#[tokio::test]
async fn missing_outcome_sequence_is_an_error() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline("t1", json!({})).on_accept("no-such-seq"),
        Arc::clone(&registry),
    );

    let mut ctx = request("10.0.0.1");
    assert!(matches!(
        throttle.mediate(&mut ctx).await,
        Err(HeimdallrError::SequenceNotFound(_))
    ));
}

#[tokio::test]
async fn unmatched_response_does_not_grow_capacity() {
    let registry = Arc::new(MediationRegistry::new());
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline("t1", json!({ "max_concurrent_access": 1 })),
        Arc::clone(&registry),
    );

    // load the policy, then feed responses that never had a request
    let mut warmup = request("10.0.0.1");
    assert!(throttle.mediate(&mut warmup).await.unwrap());
    let mut release = MessageContext::response("m1", Vec::new());
    throttle.mediate(&mut release).await.unwrap();

    for _ in 0..3 {
        let mut orphan = MessageContext::response("m1", Vec::new());
        assert!(throttle.mediate(&mut orphan).await.unwrap());
    }

    // the clamp held the limit at one: a single request takes the only slot
    assert!(throttle.mediate(&mut request("10.0.0.1")).await.unwrap());
    assert!(!throttle.mediate(&mut request("10.0.0.2")).await.unwrap());
}

#[tokio::test]
async fn replication_runs_per_mediate_and_failures_are_tolerated() {
    let registry = Arc::new(MediationRegistry::new());
    let replicator = RecordingReplicator::new(true);
    let throttle = ThrottleMediator::new(
        ThrottleConfig::inline("t1", json!({ "max_concurrent_access": 2 })),
        Arc::clone(&registry),
    )
    .with_replicator(replicator.clone());

    // install + acquire: one replication despite the failing transport
    let mut a = request("10.0.0.1");
    assert!(throttle.mediate(&mut a).await.unwrap());
    assert_eq!(replicator.calls(), 1);

    // release on the response path replicates once more
    let mut a_response = MessageContext::response("m1", Vec::new());
    assert!(throttle.mediate(&mut a_response).await.unwrap());
    assert_eq!(replicator.calls(), 2);
}
