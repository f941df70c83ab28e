//! # Core Traits (Ports)
//!
//! The hosted document database and the hosted auth service are reached
//! only through these traits. Any backend plugin must implement them.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Document, Fields, Identity};
use crate::paths::{CollectionPath, DocPath};

/// Receives the full current result set of a live query on every change,
/// or the error that ended the subscription.
pub type SnapshotSink = Box<dyn Fn(anyhow::Result<Vec<Document>>) + Send + Sync>;

/// Receives the signed-in identity, or `None` after sign-out.
pub type IdentitySink = Box<dyn Fn(Option<Identity>) + Send + Sync>;

/// Handle to a live listener. Dropping it releases the listener.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Query filter understood by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    FieldEq { field: String, value: Value },
}

impl Filter {
    pub fn field_eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::FieldEq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Filter::FieldEq { field, value } => fields.get(field) == Some(value),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Merge into existing fields instead of replacing the document.
    pub merge: bool,
}

impl WriteOptions {
    pub fn replace() -> Self {
        Self { merge: false }
    }

    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// Data persistence contract for the hosted document database.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_one(&self, path: &DocPath) -> anyhow::Result<Option<Document>>;

    async fn read_many(
        &self,
        collection: &CollectionPath,
        filter: Option<Filter>,
    ) -> anyhow::Result<Vec<Document>>;

    async fn write(&self, path: &DocPath, fields: Fields, options: WriteOptions) -> anyhow::Result<()>;

    /// Writes a new document under a store-assigned id and returns that id.
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> anyhow::Result<String>;

    async fn delete(&self, path: &DocPath) -> anyhow::Result<()>;

    /// Opens a live query. The sink is called with the current result set
    /// right away and again after every change, until the handle drops.
    async fn subscribe(
        &self,
        collection: &CollectionPath,
        sink: SnapshotSink,
    ) -> anyhow::Result<Subscription>;
}

/// Identity contract for the hosted auth service.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The identity known right now, without contacting the service.
    fn current(&self) -> Option<Identity>;

    /// Calls `sink` with the current identity, then on every sign-in/out
    /// and on verification status changes.
    fn on_state_change(&self, sink: IdentitySink) -> Subscription;

    /// Refreshes the identity from the service (e.g. to pick up a verified
    /// email).
    async fn reload(&self) -> anyhow::Result<Option<Identity>>;
}
