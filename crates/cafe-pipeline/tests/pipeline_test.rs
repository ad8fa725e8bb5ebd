use async_trait::async_trait;
use cafe_actor::tracing::setup_tracing;
use cafe_pipeline::authority::{AuthGate, AuthorityError, CredentialAuthority};
use cafe_pipeline::bus::{
    BusError, Delivery, EventBus, MemoryBus, Record, Subscription, KITCHEN_GROUP, NEW_ORDERS,
    READY_ORDERS,
};
use cafe_pipeline::cache::{MemoryStatusCache, StatusCache, DEFAULT_TTL};
use cafe_pipeline::config::PipelineConfig;
use cafe_pipeline::intake::{Intake, IntakeError};
use cafe_pipeline::lifecycle::{Backends, CafeSystem};
use cafe_pipeline::model::{Credentials, NewOrder, Order, OrderId, OrderStatus};
use cafe_pipeline::query::StatusQuery;
use cafe_pipeline::retry::Backoff;
use cafe_pipeline::stage::{
    Fulfillment, Preparation, SimulatedWork, Stage, StageError, StageRunner, StatusTracker,
    WorkPolicy,
};
use cafe_pipeline::store::{MemoryOrderStore, OrderStore, StoreError, Upserted};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const VALID_TOKEN: &str = "valid-token";

fn fast() -> Backoff {
    Backoff::new(Duration::from_millis(1), Duration::from_millis(2)).with_attempts(2)
}

fn alice_order() -> NewOrder {
    NewOrder {
        customer: "alice".into(),
        items: vec!["coffee".into(), "muffin".into()],
    }
}

/// Accepts exactly one token and never registers anyone.
struct StaticAuthority;

#[async_trait]
impl CredentialAuthority for StaticAuthority {
    async fn register(&self, _credentials: &Credentials) -> Result<(), AuthorityError> {
        Err(AuthorityError::Rejected("closed".into()))
    }

    async fn login(&self, _username: &str, _password: &str) -> Result<String, AuthorityError> {
        Ok(VALID_TOKEN.to_string())
    }

    async fn validate_token(&self, token: &str) -> Result<bool, AuthorityError> {
        Ok(token == VALID_TOKEN)
    }
}

/// Counts writes and optionally fails them all.
struct RecordingStore {
    inner: MemoryOrderStore,
    upserts: AtomicUsize,
    broken: bool,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: MemoryOrderStore::spawn(),
            upserts: AtomicUsize::new(0),
            broken: false,
        }
    }

    fn broken() -> Self {
        Self {
            broken: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl OrderStore for RecordingStore {
    async fn upsert(&self, order: &Order) -> Result<Upserted, StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.upsert(order).await
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.inner.get(id).await
    }
}

struct RecordingCache {
    inner: MemoryStatusCache,
    puts: AtomicUsize,
}

impl RecordingCache {
    fn new() -> Self {
        Self {
            inner: MemoryStatusCache::spawn(DEFAULT_TTL),
            puts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StatusCache for RecordingCache {
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, cafe_pipeline::cache::CacheError> {
        self.inner.get(id).await
    }

    async fn put(&self, order: &Order) -> Result<(), cafe_pipeline::cache::CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(order).await
    }
}

/// A bus whose brokers are all down.
struct DownBus;

#[async_trait]
impl EventBus for DownBus {
    async fn publish(&self, _topic: &str, _record: Record) -> Result<(), BusError> {
        Err(BusError::Unavailable("no brokers".into()))
    }

    async fn subscribe(
        &self,
        _topic: &str,
        _group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        Err(BusError::Unavailable("no brokers".into()))
    }
}

struct Harness {
    bus: Arc<MemoryBus>,
    store: Arc<RecordingStore>,
    cache: Arc<RecordingCache>,
    intake: Intake,
}

fn harness_with(bus: Arc<dyn EventBus>, store: Arc<RecordingStore>) -> (Intake, Arc<RecordingCache>) {
    let cache = Arc::new(RecordingCache::new());
    let intake = Intake::new(
        AuthGate::new(Arc::new(StaticAuthority)).with_backoff(fast()),
        bus,
        cache.clone(),
        store,
    )
    .with_publish_backoff(fast());
    (intake, cache)
}

fn harness() -> Harness {
    let bus = Arc::new(MemoryBus::spawn(3));
    let store = Arc::new(RecordingStore::new());
    let (intake, cache) = harness_with(bus.clone(), store.clone());
    Harness {
        bus,
        store,
        cache,
        intake,
    }
}

async fn wait_for_status(query: &StatusQuery, id: &OrderId, status: OrderStatus) -> Order {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(order) = query.lookup(id).await {
                if order.status == status {
                    return order;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("order {id} never reached {status}"))
}

#[tokio::test]
async fn test_order_moves_from_received_to_delivered() {
    setup_tracing();
    let config = PipelineConfig {
        preparation_time: Duration::from_millis(20),
        delivery_time: Duration::from_millis(300),
        work_timeout: Duration::from_secs(2),
        ..PipelineConfig::default()
    };
    let backends = Backends::in_memory(&config);
    let store = backends.store.clone();
    let system = CafeSystem::start(&config, backends);

    let credentials = Credentials::new("alice", "s3cret").with_email("alice@example.com");
    system.gate.register(&credentials).await.unwrap();
    let token = system.gate.login(&credentials).await.unwrap();

    let placed = system
        .intake
        .submit(alice_order(), Some(&token))
        .await
        .unwrap();
    assert_eq!(placed.status, OrderStatus::Received);
    assert_eq!(placed.customer, "alice");
    assert_eq!(placed.items, vec!["coffee", "muffin"]);

    let ready = wait_for_status(&system.query, &placed.id, OrderStatus::Ready).await;
    assert_eq!(ready.items, placed.items);

    let delivered = wait_for_status(&system.query, &placed.id, OrderStatus::Delivered).await;
    assert_eq!(delivered.id, placed.id);
    assert_eq!(
        store.get(&placed.id).await.unwrap().map(|o| o.status),
        Some(OrderStatus::Delivered)
    );

    // A store-only read sees the same snapshot as the cached one.
    let cold = StatusQuery::new(Arc::new(MemoryStatusCache::spawn(DEFAULT_TTL)), store);
    assert_eq!(cold.lookup(&placed.id).await.unwrap(), delivered);

    system.shutdown().await;
}

#[tokio::test]
async fn test_unauthorized_orders_leave_no_trace() {
    let h = harness();

    for token in [None, Some(""), Some("   "), Some("forged")] {
        let result = h.intake.submit(alice_order(), token).await;
        assert!(matches!(result, Err(IntakeError::Unauthorized)), "{token:?}");
    }

    assert_eq!(h.store.upserts.load(Ordering::SeqCst), 0);
    assert_eq!(h.cache.puts.load(Ordering::SeqCst), 0);

    // Nothing was published either.
    let mut sub = h.bus.subscribe(NEW_ORDERS, "audit").await.unwrap();
    let next = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
    assert!(next.is_err());
}

#[tokio::test]
async fn test_invalid_order_is_rejected_before_publish() {
    let h = harness();
    let empty = NewOrder {
        customer: "alice".into(),
        items: vec![],
    };
    assert!(matches!(
        h.intake.submit(empty, Some(VALID_TOKEN)).await,
        Err(IntakeError::InvalidRequest(_))
    ));
    assert_eq!(h.store.upserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_accepted_order_is_published_cached_and_stored() {
    let h = harness();
    let order = h.intake.submit(alice_order(), Some(VALID_TOKEN)).await.unwrap();

    let mut sub = h.bus.subscribe(NEW_ORDERS, KITCHEN_GROUP).await.unwrap();
    let delivery = sub.next().await.unwrap();
    assert_eq!(delivery.key, order.id.to_string());
    assert_eq!(Order::from_payload(&delivery.payload).unwrap(), order);

    assert_eq!(h.cache.get(&order.id).await.unwrap(), Some(order.clone()));
    assert_eq!(h.store.get(&order.id).await.unwrap(), Some(order));
}

#[tokio::test]
async fn test_ids_are_unique() {
    let h = harness();
    let mut ids = HashSet::new();
    for _ in 0..20 {
        let order = h.intake.submit(alice_order(), Some(VALID_TOKEN)).await.unwrap();
        ids.insert(order.id);
    }
    assert_eq!(ids.len(), 20);
}

#[tokio::test]
async fn test_publish_failure_rejects_the_order() {
    let store = Arc::new(RecordingStore::new());
    let (intake, cache) = harness_with(Arc::new(DownBus), store.clone());

    let result = intake.submit(alice_order(), Some(VALID_TOKEN)).await;
    assert!(matches!(result, Err(IntakeError::PublishFailure(_))));
    assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    assert_eq!(cache.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_persist_failure_after_publish_is_reported() {
    let bus = Arc::new(MemoryBus::spawn(1));
    let store = Arc::new(RecordingStore::broken());
    let (intake, _cache) = harness_with(bus.clone(), store);

    let err = intake
        .submit(alice_order(), Some(VALID_TOKEN))
        .await
        .unwrap_err();
    let IntakeError::PersistFailure { order_id, .. } = err else {
        panic!("expected PersistFailure, got {err:?}");
    };

    // The event is already in flight.
    let mut sub = bus.subscribe(NEW_ORDERS, KITCHEN_GROUP).await.unwrap();
    assert_eq!(sub.next().await.unwrap().key, order_id.to_string());
}

#[tokio::test]
async fn test_redelivered_and_late_events_never_regress_status() {
    let store = Arc::new(MemoryOrderStore::spawn());
    let cache = Arc::new(MemoryStatusCache::spawn(DEFAULT_TTL));
    let policy = WorkPolicy::new(Duration::from_secs(1), 1);
    let fulfillment = Fulfillment::new(
        store.clone(),
        cache.clone(),
        Arc::new(SimulatedWork::new(Duration::from_millis(1))),
        policy,
    );
    let tracker = StatusTracker::new(store.clone(), cache.clone());
    let shutdown = CancellationToken::new();

    let ready = Order::place(alice_order())
        .unwrap()
        .advanced_to(OrderStatus::Ready);

    fulfillment.process(ready.clone(), &shutdown).await.unwrap();
    fulfillment.process(ready.clone(), &shutdown).await.unwrap();
    // The tracker's copy of the same event lands after delivery.
    tracker.process(ready.clone(), &shutdown).await.unwrap();

    let stored = store.get(&ready.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Delivered);
    assert_eq!(stored.items, ready.items);
    assert_eq!(
        cache.get(&ready.id).await.unwrap().map(|o| o.status),
        Some(OrderStatus::Delivered)
    );
    assert_eq!(store.upsert(&ready).await.unwrap(), Upserted::Unchanged);
}

#[tokio::test]
async fn test_redelivered_submission_prepares_the_same_snapshot() {
    let bus = Arc::new(MemoryBus::spawn(3));
    let preparation = Preparation::new(
        bus.clone(),
        Arc::new(SimulatedWork::new(Duration::from_millis(1))),
        WorkPolicy::new(Duration::from_secs(1), 1),
    );
    let shutdown = CancellationToken::new();
    let received = Order::place(alice_order()).unwrap();

    preparation.process(received.clone(), &shutdown).await.unwrap();
    preparation.process(received.clone(), &shutdown).await.unwrap();

    let mut ready = bus.subscribe(READY_ORDERS, "audit").await.unwrap();
    let first = ready.next().await.unwrap();
    let second = ready.next().await.unwrap();
    assert_eq!(first.key, received.id.to_string());
    assert_eq!(first.key, second.key);
    assert_eq!(first.payload, second.payload);
    assert_eq!(
        Order::from_payload(&first.payload).unwrap(),
        received.advanced_to(OrderStatus::Ready)
    );
}

#[tokio::test]
async fn test_store_failure_skips_the_cache() {
    let store = Arc::new(RecordingStore::broken());
    let cache = Arc::new(RecordingCache::new());
    let fulfillment = Fulfillment::new(
        store.clone(),
        cache.clone(),
        Arc::new(SimulatedWork::new(Duration::from_millis(1))),
        WorkPolicy::new(Duration::from_secs(1), 1),
    )
    .with_store_backoff(fast());

    let ready = Order::place(alice_order())
        .unwrap()
        .advanced_to(OrderStatus::Ready);
    let result = fulfillment.process(ready.clone(), &CancellationToken::new()).await;

    assert!(matches!(result, Err(StageError::Store(_))));
    assert_eq!(store.upserts.load(Ordering::SeqCst), 2);
    assert_eq!(cache.puts.load(Ordering::SeqCst), 0);
    assert_eq!(cache.get(&ready.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_runner_skips_malformed_payloads() {
    let bus = Arc::new(MemoryBus::spawn(1));
    let shutdown = CancellationToken::new();
    let preparation: Arc<dyn Stage> = Arc::new(Preparation::new(
        bus.clone(),
        Arc::new(SimulatedWork::new(Duration::from_millis(1))),
        WorkPolicy::new(Duration::from_secs(1), 1),
    ));
    let runner = tokio::spawn(StageRunner::new(preparation, bus.clone(), shutdown.clone()).run());

    let order = Order::place(alice_order()).unwrap();
    bus.publish(NEW_ORDERS, Record::new("junk", b"not json".to_vec()))
        .await
        .unwrap();
    bus.publish(NEW_ORDERS, Record::new("empty", br#"{"id":"00000000-0000-0000-0000-000000000000","customer":"x","items":[],"status":"received"}"#.to_vec()))
        .await
        .unwrap();
    bus.publish(
        NEW_ORDERS,
        Record::new(order.id.to_string(), order.to_payload().unwrap()),
    )
    .await
    .unwrap();

    let mut ready = bus.subscribe(READY_ORDERS, "audit").await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), ready.next())
        .await
        .unwrap()
        .unwrap();
    let published = Order::from_payload(&delivery.payload).unwrap();
    assert_eq!(published.id, order.id);
    assert_eq!(published.status, OrderStatus::Ready);

    shutdown.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_mid_work_finishes_the_message() {
    let bus = Arc::new(MemoryBus::spawn(1));
    let shutdown = CancellationToken::new();
    let preparation: Arc<dyn Stage> = Arc::new(Preparation::new(
        bus.clone(),
        Arc::new(SimulatedWork::new(Duration::from_millis(200))),
        WorkPolicy::new(Duration::from_secs(2), 1),
    ));
    let runner = tokio::spawn(StageRunner::new(preparation, bus.clone(), shutdown.clone()).run());

    let order = Order::place(alice_order()).unwrap();
    bus.publish(
        NEW_ORDERS,
        Record::new(order.id.to_string(), order.to_payload().unwrap()),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();

    // The order taken before shutdown was prepared and published.
    let mut ready = bus.subscribe(READY_ORDERS, "audit").await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(1), ready.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.key, order.id.to_string());

    // And committed: the kitchen group has nothing left to hand out.
    let mut kitchen = bus.subscribe(NEW_ORDERS, KITCHEN_GROUP).await.unwrap();
    let next = tokio::time::timeout(Duration::from_millis(50), kitchen.next()).await;
    assert!(next.is_err());
}

#[tokio::test]
async fn test_late_ready_event_after_cache_expiry_keeps_delivered() {
    let store = Arc::new(MemoryOrderStore::spawn());
    let cache = Arc::new(MemoryStatusCache::spawn(Duration::from_millis(50)));
    let fulfillment = Fulfillment::new(
        store.clone(),
        cache.clone(),
        Arc::new(SimulatedWork::new(Duration::from_millis(1))),
        WorkPolicy::new(Duration::from_secs(1), 1),
    );
    let tracker = StatusTracker::new(store.clone(), cache.clone());
    let shutdown = CancellationToken::new();
    let ready = Order::place(alice_order())
        .unwrap()
        .advanced_to(OrderStatus::Ready);

    fulfillment.process(ready.clone(), &shutdown).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get(&ready.id).await.unwrap(), None);

    tracker.process(ready.clone(), &shutdown).await.unwrap();

    assert_eq!(
        cache.get(&ready.id).await.unwrap().map(|o| o.status),
        Some(OrderStatus::Delivered)
    );
    let query = StatusQuery::new(cache, store);
    assert_eq!(
        query.lookup(&ready.id).await.unwrap().status,
        OrderStatus::Delivered
    );
}

/// Fails `next` a few times, then hands out its deliveries.
struct FlakySubscription {
    failures_left: u32,
    deliveries: VecDeque<Delivery>,
    committed: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl Subscription for FlakySubscription {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(BusError::Unavailable("broker restarting".into()));
        }
        match self.deliveries.pop_front() {
            Some(delivery) => Ok(delivery),
            None => std::future::pending().await,
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        self.committed.lock().unwrap().push(delivery.offset);
        Ok(())
    }

    async fn close(self: Box<Self>) {}
}

struct FlakyBus {
    subscription: Mutex<Option<FlakySubscription>>,
}

#[async_trait]
impl EventBus for FlakyBus {
    async fn publish(&self, _topic: &str, _record: Record) -> Result<(), BusError> {
        Ok(())
    }

    async fn subscribe(
        &self,
        _topic: &str,
        _group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let subscription = self.subscription.lock().unwrap().take();
        subscription
            .map(|s| Box::new(s) as Box<dyn Subscription>)
            .ok_or(BusError::Closed)
    }
}

#[tokio::test]
async fn test_runner_survives_bus_read_errors() {
    let order = Order::place(alice_order())
        .unwrap()
        .advanced_to(OrderStatus::Ready);
    let committed = Arc::new(Mutex::new(Vec::new()));
    let bus = Arc::new(FlakyBus {
        subscription: Mutex::new(Some(FlakySubscription {
            failures_left: 3,
            deliveries: VecDeque::from([Delivery {
                topic: READY_ORDERS.into(),
                partition: 0,
                offset: 7,
                key: order.id.to_string(),
                payload: order.to_payload().unwrap(),
                generation: 1,
            }]),
            committed: committed.clone(),
        })),
    });

    let store = Arc::new(MemoryOrderStore::spawn());
    let tracker: Arc<dyn Stage> = Arc::new(StatusTracker::new(
        store.clone(),
        Arc::new(MemoryStatusCache::spawn(DEFAULT_TTL)),
    ));
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn(
        StageRunner::new(tracker, bus, shutdown.clone())
            .with_read_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(2)))
            .run(),
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while committed.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*committed.lock().unwrap(), vec![7]);
    assert_eq!(store.get(&order.id).await.unwrap(), Some(order));
    assert!(!runner.is_finished());

    shutdown.cancel();
    runner.await.unwrap();
}
