//! # In-Process Bus
//!
//! A single broker task owns every topic log and every consumer group, the same
//! way a `ResourceActor` owns its map: requests arrive on one channel and are
//! handled in order, so offsets, assignments and commits never race.
//!
//! ```rust
//! use cafe_pipeline::bus::{EventBus, MemoryBus, Record};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MemoryBus::spawn(3);
//!     bus.publish("new_orders", Record::new("order-1", b"{}".to_vec())).await.unwrap();
//!
//!     let mut sub = bus.subscribe("new_orders", "kitchen-group").await.unwrap();
//!     let delivery = sub.next().await.unwrap();
//!     assert_eq!(delivery.key, "order-1");
//!     sub.commit(&delivery).await.unwrap();
//!     sub.close().await;
//! }
//! ```

use crate::bus::{BusError, Delivery, EventBus, Record, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

type MemberId = u64;
type Reply<T> = oneshot::Sender<Result<T, BusError>>;

enum BrokerRequest {
    Publish {
        topic: String,
        record: Record,
        respond_to: Reply<(u32, u64)>,
    },
    Join {
        topic: String,
        group: String,
        respond_to: Reply<MemberId>,
    },
    Fetch {
        topic: String,
        group: String,
        member: MemberId,
        respond_to: Reply<Option<Delivery>>,
    },
    Commit {
        topic: String,
        group: String,
        member: MemberId,
        partition: u32,
        offset: u64,
        generation: u64,
        respond_to: Reply<()>,
    },
    Leave {
        topic: String,
        group: String,
        member: MemberId,
    },
}

#[derive(Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

/// Fetch state of one member: the partitions it owns and where it is in each.
struct MemberCursor {
    partitions: Vec<u32>,
    positions: HashMap<u32, u64>,
    next: usize,
}

struct GroupState {
    generation: u64,
    members: Vec<MemberId>,
    committed: Vec<u64>,
    cursors: HashMap<MemberId, MemberCursor>,
}

impl GroupState {
    fn new(partitions: u32) -> Self {
        Self {
            generation: 0,
            members: Vec::new(),
            committed: vec![0; partitions as usize],
            cursors: HashMap::new(),
        }
    }

    /// Spreads partitions round-robin over members in join order and rewinds
    /// every cursor to the committed offset.
    fn rebalance(&mut self) {
        self.generation += 1;
        self.cursors.clear();
        if self.members.is_empty() {
            return;
        }
        for member in &self.members {
            self.cursors.insert(
                *member,
                MemberCursor {
                    partitions: Vec::new(),
                    positions: HashMap::new(),
                    next: 0,
                },
            );
        }
        for (partition, committed) in self.committed.iter().enumerate() {
            let owner = self.members[partition % self.members.len()];
            if let Some(cursor) = self.cursors.get_mut(&owner) {
                cursor.partitions.push(partition as u32);
                cursor.positions.insert(partition as u32, *committed);
            }
        }
    }
}

/// The broker task. Create with [`MemoryBus::new`] and spawn [`BusBroker::run`].
pub struct BusBroker {
    receiver: mpsc::Receiver<BrokerRequest>,
    partitions: u32,
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<(String, String), GroupState>,
    next_member: MemberId,
    notify: watch::Sender<u64>,
}

impl BusBroker {
    pub async fn run(mut self) {
        info!(partitions = self.partitions, "Bus broker started");

        while let Some(request) = self.receiver.recv().await {
            match request {
                BrokerRequest::Publish {
                    topic,
                    record,
                    respond_to,
                } => {
                    let coords = self.append(&topic, record);
                    self.notify.send_modify(|seq| *seq += 1);
                    let _ = respond_to.send(Ok(coords));
                }
                BrokerRequest::Join {
                    topic,
                    group,
                    respond_to,
                } => {
                    let member = self.join(topic, group);
                    self.notify.send_modify(|seq| *seq += 1);
                    let _ = respond_to.send(Ok(member));
                }
                BrokerRequest::Fetch {
                    topic,
                    group,
                    member,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.fetch(&topic, &group, member));
                }
                BrokerRequest::Commit {
                    topic,
                    group,
                    member,
                    partition,
                    offset,
                    generation,
                    respond_to,
                } => {
                    let result = self.commit(topic, group, member, partition, offset, generation);
                    let _ = respond_to.send(result);
                }
                BrokerRequest::Leave {
                    topic,
                    group,
                    member,
                } => {
                    self.leave(&topic, &group, member);
                    self.notify.send_modify(|seq| *seq += 1);
                }
            }
        }

        info!(topics = self.logs.len(), "Bus broker shutdown");
    }

    fn log(&mut self, topic: &str) -> &mut Vec<Vec<StoredRecord>> {
        let partitions = self.partitions as usize;
        self.logs
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions])
    }

    fn append(&mut self, topic: &str, record: Record) -> (u32, u64) {
        let partition = partition_for(&record.key, self.partitions);
        let log = &mut self.log(topic)[partition as usize];
        log.push(StoredRecord {
            key: record.key,
            payload: record.payload,
        });
        let offset = (log.len() - 1) as u64;
        debug!(topic, partition, offset, "Published");
        (partition, offset)
    }

    fn join(&mut self, topic: String, group: String) -> MemberId {
        self.next_member += 1;
        let member = self.next_member;
        let partitions = self.partitions;
        self.log(&topic);
        let state = self
            .groups
            .entry((topic.clone(), group.clone()))
            .or_insert_with(|| GroupState::new(partitions));
        state.members.push(member);
        state.rebalance();
        info!(
            %topic,
            %group,
            member,
            members = state.members.len(),
            generation = state.generation,
            "Member joined"
        );
        member
    }

    fn leave(&mut self, topic: &str, group: &str, member: MemberId) {
        let key = (topic.to_string(), group.to_string());
        if let Some(state) = self.groups.get_mut(&key) {
            let before = state.members.len();
            state.members.retain(|m| *m != member);
            if state.members.len() != before {
                state.rebalance();
                info!(
                    topic,
                    group,
                    member,
                    members = state.members.len(),
                    generation = state.generation,
                    "Member left"
                );
            }
        }
    }

    fn fetch(
        &mut self,
        topic: &str,
        group: &str,
        member: MemberId,
    ) -> Result<Option<Delivery>, BusError> {
        let key = (topic.to_string(), group.to_string());
        let state = self
            .groups
            .get_mut(&key)
            .ok_or(BusError::UnknownMember(member))?;
        let generation = state.generation;
        let cursor = state
            .cursors
            .get_mut(&member)
            .ok_or(BusError::UnknownMember(member))?;
        let Some(log) = self.logs.get(topic) else {
            return Ok(None);
        };

        // Rotate across owned partitions so one busy partition cannot starve the rest.
        let owned = cursor.partitions.len();
        for step in 0..owned {
            let slot = (cursor.next + step) % owned;
            let partition = cursor.partitions[slot];
            let position = cursor.positions.get(&partition).copied().unwrap_or(0);
            if let Some(record) = log[partition as usize].get(position as usize) {
                cursor.positions.insert(partition, position + 1);
                cursor.next = (slot + 1) % owned;
                return Ok(Some(Delivery {
                    topic: topic.to_string(),
                    partition,
                    offset: position,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    generation,
                }));
            }
        }
        Ok(None)
    }

    fn commit(
        &mut self,
        topic: String,
        group: String,
        member: MemberId,
        partition: u32,
        offset: u64,
        generation: u64,
    ) -> Result<(), BusError> {
        let key = (topic, group);
        let Some(state) = self.groups.get_mut(&key) else {
            return Err(BusError::UnknownMember(member));
        };
        let owns = state
            .cursors
            .get(&member)
            .is_some_and(|c| c.partitions.contains(&partition));
        if generation != state.generation || !owns {
            let (topic, group) = key;
            return Err(BusError::Rebalanced { topic, group });
        }
        let committed = &mut state.committed[partition as usize];
        *committed = (*committed).max(offset + 1);
        Ok(())
    }
}

/// FNV-1a over the key bytes. Stable across runs and builds.
fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions.max(1)
}

/// Client handle to a [`BusBroker`]. Cheap to clone.
#[derive(Clone)]
pub struct MemoryBus {
    sender: mpsc::Sender<BrokerRequest>,
    notify: watch::Receiver<u64>,
}

impl MemoryBus {
    /// Creates the broker and its handle. `partitions` applies to every topic.
    pub fn new(partitions: u32) -> (BusBroker, MemoryBus) {
        let (sender, receiver) = mpsc::channel(256);
        let (notify_tx, notify_rx) = watch::channel(0);
        let broker = BusBroker {
            receiver,
            partitions: partitions.max(1),
            logs: HashMap::new(),
            groups: HashMap::new(),
            next_member: 0,
            notify: notify_tx,
        };
        let bus = MemoryBus {
            sender,
            notify: notify_rx,
        };
        (broker, bus)
    }

    /// Creates the broker, spawns it, and returns the handle.
    pub fn spawn(partitions: u32) -> MemoryBus {
        let (broker, bus) = Self::new(partitions);
        tokio::spawn(broker.run());
        bus
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> BrokerRequest,
    ) -> Result<T, BusError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BusError::Closed)?;
        response.await.map_err(|_| BusError::Closed)?
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, record: Record) -> Result<(), BusError> {
        self.request(|respond_to| BrokerRequest::Publish {
            topic: topic.to_string(),
            record,
            respond_to,
        })
        .await
        .map(|_| ())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BusError> {
        let member = self
            .request(|respond_to| BrokerRequest::Join {
                topic: topic.to_string(),
                group: group.to_string(),
                respond_to,
            })
            .await?;
        Ok(Box::new(MemorySubscription {
            bus: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            member,
            closed: false,
        }))
    }
}

struct MemorySubscription {
    bus: MemoryBus,
    topic: String,
    group: String,
    member: MemberId,
    closed: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        loop {
            // Mark the current sequence seen before fetching, so a publish that
            // lands after the fetch still wakes the wait below.
            self.bus.notify.borrow_and_update();
            let fetched = self
                .bus
                .request(|respond_to| BrokerRequest::Fetch {
                    topic: self.topic.clone(),
                    group: self.group.clone(),
                    member: self.member,
                    respond_to,
                })
                .await?;
            if let Some(delivery) = fetched {
                return Ok(delivery);
            }
            self.bus
                .notify
                .changed()
                .await
                .map_err(|_| BusError::Closed)?;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        self.bus
            .request(|respond_to| BrokerRequest::Commit {
                topic: self.topic.clone(),
                group: self.group.clone(),
                member: self.member,
                partition: delivery.partition,
                offset: delivery.offset,
                generation: delivery.generation,
                respond_to,
            })
            .await
    }

    async fn close(mut self: Box<Self>) {
        self.closed = true;
        let _ = self
            .bus
            .sender
            .send(BrokerRequest::Leave {
                topic: self.topic.clone(),
                group: self.group.clone(),
                member: self.member,
            })
            .await;
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.bus.sender.try_send(BrokerRequest::Leave {
                topic: self.topic.clone(),
                group: self.group.clone(),
                member: self.member,
            });
        }
    }
}
