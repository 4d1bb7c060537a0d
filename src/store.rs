//! The persisted container: named slots of durable storage with atomic functional
//! updates and change notification across execution contexts.
//!
//! A [`Store`] is one execution context (a background service, a visible panel, a CLI
//! invocation...). Several stores may share one durable backend. Every committed write
//! lands in the backend's change log; each store reads that log in commit order, keeps a
//! cache of the latest value per slot, and hands every value to the slot's subscribers.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::broadcast::ChangeBroadcaster;
use crate::error::StoreError;
use crate::storage::{MemoryBackend, SlotBackend};

// Change records read from the backend per round trip
const SYNC_BATCH: i64 = 256;

/// Values that can live in a slot.
pub trait SlotValue: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {}

impl<T> SlotValue for T where T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How often to look for writes committed by other contexts. `None` disables polling;
    /// [`Store::sync`] can still be called explicitly.
    pub poll_interval: Option<Duration>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            poll_interval: Some(Duration::from_millis(250)),
        }
    }
}

/// A write to a slot: either a replacement value or a pure function of the current one.
pub enum Update<V> {
    Replace(V),
    Apply(Box<dyn FnOnce(V) -> V + Send>),
}

impl<V> Update<V> {
    pub fn apply(f: impl FnOnce(V) -> V + Send + 'static) -> Self {
        Update::Apply(Box::new(f))
    }
}

impl<V> From<V> for Update<V> {
    fn from(value: V) -> Self {
        Update::Replace(value)
    }
}

struct CachedValue {
    value: Arc<Value>,
    seq: i64,
}

struct StoreInner {
    backend: Arc<dyn SlotBackend>,
    origin: String,
    broadcaster: ChangeBroadcaster,
    cache: DashMap<String, CachedValue>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
    // Seq of the last change record delivered; the lock serializes delivery
    cursor: Mutex<i64>,
}

/// One execution context's handle on the persisted slots. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Opens a context over `backend`. Only writes committed after this call are broadcast.
    ///
    /// Must be called from within a tokio runtime when polling is enabled.
    pub async fn open(backend: Arc<dyn SlotBackend>, options: StoreOptions) -> Result<Self, StoreError> {
        let cursor = backend.latest_seq().await?;
        let origin = Uuid::new_v4().to_string();
        log::info!("Opening store context {} at seq {}", origin, cursor);

        let store = Self {
            inner: Arc::new(StoreInner {
                backend,
                origin,
                broadcaster: ChangeBroadcaster::new(),
                cache: DashMap::new(),
                write_locks: DashMap::new(),
                cursor: Mutex::new(cursor),
            }),
        };

        if let Some(interval) = options.poll_interval.filter(|i| !i.is_zero()) {
            store.spawn_poller(interval);
        }
        Ok(store)
    }

    /// A store over a fresh private [`MemoryBackend`], without polling.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(Arc::new(MemoryBackend::new()), StoreOptions { poll_interval: None }).await
    }

    /// Identifies this context in the change log.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn backend(&self) -> Arc<dyn SlotBackend> {
        Arc::clone(&self.inner.backend)
    }

    /// Typed handle on the slot named `key`. Loads its committed value on first use.
    pub async fn slot<V: SlotValue>(&self, key: &str) -> Result<Slot<V>, StoreError> {
        if !self.inner.cache.contains_key(key) {
            let cached = match self.inner.backend.load(key).await? {
                Some(stored) => CachedValue {
                    value: Arc::new(stored.value),
                    seq: stored.seq,
                },
                None => CachedValue {
                    value: Arc::new(Value::Null),
                    seq: 0,
                },
            };
            self.cache_if_newer(key, cached);
        }

        Ok(Slot {
            store: self.clone(),
            key: key.to_string(),
            _marker: PhantomData,
        })
    }

    /// Delivers every change committed since the last sync, in commit order.
    pub async fn sync(&self) -> Result<(), StoreError> {
        let mut cursor = self.inner.cursor.lock().await;

        if let Some(oldest) = self.inner.backend.oldest_seq().await? {
            if oldest > *cursor + 1 {
                self.resync(&mut cursor).await?;
            }
        }

        loop {
            let batch = self.inner.backend.changes_since(*cursor, SYNC_BATCH).await?;
            let exhausted = batch.len() < SYNC_BATCH as usize;

            for record in batch {
                *cursor = record.seq;
                let value = Arc::new(record.value);
                self.cache_if_newer(
                    &record.key,
                    CachedValue {
                        value: Arc::clone(&value),
                        seq: record.seq,
                    },
                );
                self.inner.broadcaster.publish(&record.key, value);
            }

            if exhausted {
                return Ok(());
            }
        }
    }

    // The change log was pruned past our cursor: publish the current value of every slot we track.
    async fn resync(&self, cursor: &mut i64) -> Result<(), StoreError> {
        log::warn!(
            "Store context {} fell behind the change log at seq {}, resyncing",
            self.inner.origin,
            cursor
        );
        let latest = self.inner.backend.latest_seq().await?;
        let keys: Vec<String> = self.inner.cache.iter().map(|entry| entry.key().clone()).collect();

        for key in keys {
            if let Some(stored) = self.inner.backend.load(&key).await? {
                if stored.seq > *cursor {
                    let value = Arc::new(stored.value);
                    self.cache_if_newer(
                        &key,
                        CachedValue {
                            value: Arc::clone(&value),
                            seq: stored.seq,
                        },
                    );
                    self.inner.broadcaster.publish(&key, value);
                }
            }
        }
        *cursor = latest;
        Ok(())
    }

    fn cache_if_newer(&self, key: &str, cached: CachedValue) {
        match self.inner.cache.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().seq < cached.seq {
                    entry.insert(cached);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(cached);
            }
        }
    }

    fn write_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.inner.write_locks.entry(key.to_string()).or_default().value())
    }

    // Returns whether anything was written. `f` returning `None` leaves the slot untouched.
    async fn commit<V, F>(&self, key: &str, f: F) -> Result<bool, StoreError>
    where
        V: SlotValue,
        F: FnOnce(V) -> Option<V> + Send,
    {
        let lock = self.write_lock(key);
        let guard = lock.lock().await;

        let mut f = Some(f);
        let mut transform = |current: Option<Value>| -> Result<Option<Value>, StoreError> {
            let f = f
                .take()
                .ok_or_else(|| StoreError::Storage(anyhow::anyhow!("transform for slot '{}' ran twice", key)))?;
            match f(decode_or_default::<V>(key, current.as_ref())) {
                Some(next) => serde_json::to_value(&next)
                    .map(Some)
                    .map_err(|source| StoreError::Encode {
                        key: key.to_string(),
                        source,
                    }),
                None => Ok(None),
            }
        };

        let record = match self.inner.backend.update(key, &self.inner.origin, &mut transform).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(false),
            Err(e) => {
                log::error!("Write to slot '{}' rejected: {}", key, e);
                return Err(e);
            }
        };
        drop(guard);

        self.cache_if_newer(
            key,
            CachedValue {
                value: Arc::new(record.value),
                seq: record.seq,
            },
        );

        // The write is durable at this point; a failed dispatch is retried by the next sync
        if let Err(e) = self.sync().await {
            log::warn!("Committed slot '{}' but could not dispatch the change yet: {}", key, e);
        }
        Ok(true)
    }

    fn spawn_poller(&self, interval: Duration) {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = Store { inner };
                if let Err(e) = store.sync().await {
                    log::warn!("Polling for changes failed: {}", e);
                }
            }
            log::debug!("Store poller stopped");
        });
    }
}

fn decode_or_default<V: SlotValue>(key: &str, value: Option<&Value>) -> V {
    match value {
        None | Some(Value::Null) => V::default(),
        Some(value) => V::deserialize(value).unwrap_or_else(|e| {
            log::warn!("Slot '{}' holds a value of the wrong shape, using default: {}", key, e);
            V::default()
        }),
    }
}

/// Typed handle on one slot.
pub struct Slot<V> {
    store: Store,
    key: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V: SlotValue> Slot<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The last committed value seen by this context, or the default when unset.
    pub fn get(&self) -> V {
        let value = self
            .store
            .inner
            .cache
            .get(&self.key)
            .map(|cached| Arc::clone(&cached.value));
        decode_or_default(&self.key, value.as_deref())
    }

    /// Commits `update` atomically against the latest durable value.
    pub async fn set(&self, update: impl Into<Update<V>>) -> Result<(), StoreError> {
        match update.into() {
            Update::Replace(value) => self.store.commit(&self.key, move |_: V| Some(value)).await?,
            Update::Apply(f) => self.store.commit(&self.key, move |value: V| Some(f(value))).await?,
        };
        Ok(())
    }

    pub async fn replace(&self, value: V) -> Result<(), StoreError> {
        self.set(Update::Replace(value)).await
    }

    pub async fn update(&self, f: impl FnOnce(V) -> V + Send + 'static) -> Result<(), StoreError> {
        self.set(Update::apply(f)).await
    }

    /// Functional update that also hands back a result computed inside the transform.
    pub async fn modify<R: Send>(&self, f: impl FnOnce(&mut V) -> R + Send) -> Result<R, StoreError> {
        self.try_modify(|value| Some(f(value)))
            .await?
            .ok_or_else(|| StoreError::Storage(anyhow::anyhow!("transform for slot '{}' did not run", self.key)))
    }

    /// Like [`Slot::modify`], but when `f` returns `None` nothing is written and no
    /// change is broadcast, whatever `f` did to its argument.
    pub async fn try_modify<R: Send>(&self, f: impl FnOnce(&mut V) -> Option<R> + Send) -> Result<Option<R>, StoreError> {
        let mut out = None;
        let out_ref = &mut out;
        self.store
            .commit(&self.key, move |mut value: V| {
                *out_ref = Some(f(&mut value)?);
                Some(value)
            })
            .await?;
        Ok(out)
    }

    /// Calls `listener` with every value committed from now on, in commit order.
    pub fn subscribe(&self, listener: impl Fn(&V) + Send + Sync + 'static) -> Subscription {
        let key = self.key.clone();
        let id = self.store.inner.broadcaster.subscribe(
            &self.key,
            Box::new(move |raw: Arc<Value>| {
                listener(&decode_or_default::<V>(&key, Some(&raw)));
            }),
        );
        Subscription {
            store: Arc::downgrade(&self.store.inner),
            key: self.key.clone(),
            id: Some(id),
        }
    }

    /// Stream of values committed from now on. Dropping it unsubscribes.
    pub fn changes(&self) -> BoxStream<'static, V> {
        let (tx, rx) = mpsc::unbounded_channel::<V>();
        let subscription = self.subscribe(move |value: &V| {
            let _ = tx.send(value.clone());
        });
        stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
            rx.recv().await.map(|value| (value, (rx, subscription)))
        })
        .boxed()
    }
}

/// Keeps a listener attached; dropping it (or calling `unsubscribe`) detaches it.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    store: Weak<StoreInner>,
    key: String,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(inner) = self.store.upgrade() {
                inner.broadcaster.unsubscribe(&self.key, id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
