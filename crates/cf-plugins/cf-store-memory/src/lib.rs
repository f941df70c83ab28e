//! # cf-store-memory
//!
//! In-process implementation of `DocumentStore`.
//! Features: live subscriptions with full-snapshot pushes, server timestamp
//! resolution (optionally held back to mimic writes still in flight), and
//! fault injection for exercising degraded paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use cf_core::models::{is_server_timestamp, Document, Fields, StoreTimestamp};
use cf_core::paths::{CollectionPath, DocPath};
use cf_core::traits::{DocumentStore, Filter, SnapshotSink, Subscription, WriteOptions};
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use uuid::Uuid;

struct Subscriber {
    collection: String,
    sink: Arc<SnapshotSink>,
}

struct Inner {
    /// collection path -> document id -> fields
    collections: DashMap<String, BTreeMap<String, Fields>>,
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber: AtomicU64,
    /// Seconds handed out to the next committed server timestamp.
    clock: AtomicI64,
    hold_server_timestamps: AtomicBool,
    failing_writes: DashSet<String>,
    failing_reads: DashSet<String>,
    failing_subscriptions: DashSet<String>,
}

/// Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(StoreTimestamp::now().seconds)
    }

    /// Starts the commit clock at `seconds`; every commit advances it by one.
    pub fn with_clock(seconds: i64) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: DashMap::new(),
                subscribers: DashMap::new(),
                next_subscriber: AtomicU64::new(1),
                clock: AtomicI64::new(seconds),
                hold_server_timestamps: AtomicBool::new(false),
                failing_writes: DashSet::new(),
                failing_reads: DashSet::new(),
                failing_subscriptions: DashSet::new(),
            }),
        }
    }

    /// While held, written server timestamps stay unresolved (read as null)
    /// until `resolve_server_timestamps` runs.
    pub fn hold_server_timestamps(&self, hold: bool) {
        self.inner.hold_server_timestamps.store(hold, Ordering::SeqCst);
    }

    /// Commits every pending server timestamp and notifies listeners.
    pub fn resolve_server_timestamps(&self) {
        let mut touched = Vec::new();
        for mut entry in self.inner.collections.iter_mut() {
            let mut changed = false;
            for fields in entry.value_mut().values_mut() {
                changed |= self.inner.resolve(fields);
            }
            if changed {
                touched.push(entry.key().clone());
            }
        }
        for collection in touched {
            self.inner.notify(&collection);
        }
    }

    /// Makes writes, adds and deletes under `prefix` fail.
    pub fn fail_writes_under(&self, prefix: &str) {
        self.inner.failing_writes.insert(prefix.to_string());
    }

    pub fn fail_reads_under(&self, prefix: &str) {
        self.inner.failing_reads.insert(prefix.to_string());
    }

    /// Makes new subscriptions on `collection` fail to open.
    pub fn fail_subscriptions_to(&self, collection: &CollectionPath) {
        self.inner
            .failing_subscriptions
            .insert(collection.as_str().to_string());
    }

    pub fn clear_faults(&self) {
        self.inner.failing_writes.clear();
        self.inner.failing_reads.clear();
        self.inner.failing_subscriptions.clear();
    }

    /// Ends every live query on `collection` with an error, the way a
    /// revoked permission does.
    pub fn break_subscriptions(&self, collection: &CollectionPath, reason: &str) {
        let ids: Vec<u64> = self
            .inner
            .subscribers
            .iter()
            .filter(|s| s.collection == collection.as_str())
            .map(|s| *s.key())
            .collect();
        for id in ids {
            if let Some((_, subscriber)) = self.inner.subscribers.remove(&id) {
                (*subscriber.sink)(Err(anyhow!("{reason}")));
            }
        }
    }

    /// Number of live queries, across all collections.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Inserts a document as-is, bypassing faults. For seeding.
    pub fn seed(&self, path: &DocPath, fields: Fields) {
        let collection = path.collection();
        self.inner
            .collections
            .entry(collection.as_str().to_string())
            .or_default()
            .insert(path.id().to_string(), fields);
        self.inner.notify(collection.as_str());
    }
}

impl Inner {
    fn resolve(&self, fields: &mut Fields) -> bool {
        let mut changed = false;
        for value in fields.values_mut() {
            if is_server_timestamp(value) {
                let seconds = self.clock.fetch_add(1, Ordering::SeqCst);
                *value = serde_json::to_value(StoreTimestamp::from_seconds(seconds))
                    .unwrap_or(Value::Null);
                changed = true;
            }
        }
        changed
    }

    fn check(set: &DashSet<String>, path: &str) -> anyhow::Result<()> {
        if set.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            bail!("permission denied on {path}");
        }
        Ok(())
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), visible(fields)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(&self, collection: &str) {
        // Sinks run without any map guard held so they may call back in.
        let sinks: Vec<Arc<SnapshotSink>> = self
            .subscribers
            .iter()
            .filter(|s| s.collection == collection)
            .map(|s| s.sink.clone())
            .collect();
        if sinks.is_empty() {
            return;
        }
        let docs = self.snapshot(collection);
        tracing::debug!(collection, listeners = sinks.len(), docs = docs.len(), "pushing snapshot");
        for sink in sinks {
            (**sink)(Ok(docs.clone()));
        }
    }

    fn write(&self, path: &DocPath, mut fields: Fields, options: WriteOptions) {
        if !self.hold_server_timestamps.load(Ordering::SeqCst) {
            self.resolve(&mut fields);
        }
        let collection = path.collection();
        {
            let mut docs = self
                .collections
                .entry(collection.as_str().to_string())
                .or_default();
            let target = docs.entry(path.id().to_string()).or_default();
            if !options.merge {
                target.clear();
            }
            target.extend(fields);
        }
        self.notify(collection.as_str());
    }
}

/// Pending server timestamps read as null.
fn visible(fields: &Fields) -> Fields {
    fields
        .iter()
        .map(|(k, v)| {
            let v = if is_server_timestamp(v) { Value::Null } else { v.clone() };
            (k.clone(), v)
        })
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read_one(&self, path: &DocPath) -> anyhow::Result<Option<Document>> {
        Inner::check(&self.inner.failing_reads, path.as_str())?;
        Ok(self
            .inner
            .collections
            .get(path.collection().as_str())
            .and_then(|docs| docs.get(path.id()).map(|f| Document::new(path.id(), visible(f)))))
    }

    async fn read_many(
        &self,
        collection: &CollectionPath,
        filter: Option<Filter>,
    ) -> anyhow::Result<Vec<Document>> {
        Inner::check(&self.inner.failing_reads, collection.as_str())?;
        let docs = self.inner.snapshot(collection.as_str());
        Ok(match filter {
            Some(filter) => docs.into_iter().filter(|d| filter.matches(&d.fields)).collect(),
            None => docs,
        })
    }

    async fn write(&self, path: &DocPath, fields: Fields, options: WriteOptions) -> anyhow::Result<()> {
        Inner::check(&self.inner.failing_writes, path.as_str())?;
        self.inner.write(path, fields, options);
        Ok(())
    }

    async fn add(&self, collection: &CollectionPath, fields: Fields) -> anyhow::Result<String> {
        Inner::check(&self.inner.failing_writes, collection.as_str())?;
        let id = Uuid::new_v4().simple().to_string();
        self.inner
            .write(&collection.doc(&id), fields, WriteOptions::replace());
        Ok(id)
    }

    async fn delete(&self, path: &DocPath) -> anyhow::Result<()> {
        Inner::check(&self.inner.failing_writes, path.as_str())?;
        let collection = path.collection();
        let removed = self
            .inner
            .collections
            .get_mut(collection.as_str())
            .and_then(|mut docs| docs.remove(path.id()))
            .is_some();
        if removed {
            self.inner.notify(collection.as_str());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &CollectionPath,
        sink: SnapshotSink,
    ) -> anyhow::Result<Subscription> {
        Inner::check(&self.inner.failing_subscriptions, collection.as_str())?;

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let sink = Arc::new(sink);
        self.inner.subscribers.insert(
            id,
            Subscriber {
                collection: collection.as_str().to_string(),
                sink: sink.clone(),
            },
        );
        (**sink)(Ok(self.inner.snapshot(collection.as_str())));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.remove(&id);
            }
        }))
    }
}
