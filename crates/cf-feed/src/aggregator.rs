//! # Feed Aggregator
//!
//! Keeps one live query per space open and folds every pushed snapshot into
//! a single deduplicated collection of posts.
//!
//! Snapshot sinks only forward into a channel; all mutation happens in
//! `next_update`/`drain_pending` on the owner, so the collection is never
//! touched from a store callback.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use cf_core::models::{Document, Post, Space, StoreTimestamp};
use cf_core::paths;
use cf_core::traits::{DocumentStore, SnapshotSink, Subscription};
use tokio::sync::mpsc;

use crate::replies::ReplyTree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceStatus {
    /// Subscribed, no snapshot applied yet.
    Pending,
    Live,
    /// The live query failed or ended; posts already merged are kept.
    Degraded(String),
}

/// Counts from folding one snapshot into the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl MergeStats {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Merged { space: Space, stats: MergeStats },
    Degraded { space: Space, reason: String },
}

struct Push {
    space: Space,
    result: anyhow::Result<Vec<Document>>,
}

pub struct FeedAggregator {
    posts: Vec<Post>,
    filter: Option<Space>,
    status: BTreeMap<Space, SpaceStatus>,
    subscriptions: HashMap<Space, Subscription>,
    rx: mpsc::UnboundedReceiver<Push>,
}

impl FeedAggregator {
    /// Opens one live query per space. A space whose query cannot be opened
    /// starts out degraded; the others still load.
    pub async fn open<S>(store: &S, spaces: &[Space]) -> Self
    where
        S: DocumentStore + ?Sized,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut status = BTreeMap::new();
        let mut subscriptions = HashMap::new();

        for &space in spaces {
            if status.contains_key(&space) {
                continue;
            }
            let tx = tx.clone();
            let sink: SnapshotSink = Box::new(move |result| {
                // The receiver is gone once the aggregator closes.
                let _ = tx.send(Push { space, result });
            });
            match store.subscribe(&paths::space_posts(space), sink).await {
                Ok(subscription) => {
                    tracing::debug!(%space, "space subscribed");
                    status.insert(space, SpaceStatus::Pending);
                    subscriptions.insert(space, subscription);
                }
                Err(err) => {
                    tracing::warn!(%space, error = %err, "space subscription failed");
                    status.insert(space, SpaceStatus::Degraded(err.to_string()));
                }
            }
        }

        tracing::info!(
            live = subscriptions.len(),
            degraded = status.len() - subscriptions.len(),
            "feed opened"
        );
        Self {
            posts: Vec::new(),
            filter: None,
            status,
            subscriptions,
            rx,
        }
    }

    /// Waits for the next pushed snapshot and applies it. `None` once every
    /// subscription has ended.
    pub async fn next_update(&mut self) -> Option<FeedUpdate> {
        let push = self.rx.recv().await?;
        Some(self.handle(push))
    }

    /// Applies every snapshot already queued without waiting.
    pub fn drain_pending(&mut self) -> Vec<FeedUpdate> {
        let mut updates = Vec::new();
        while let Ok(push) = self.rx.try_recv() {
            updates.push(self.handle(push));
        }
        updates
    }

    fn handle(&mut self, push: Push) -> FeedUpdate {
        let Push { space, result } = push;
        match result {
            Ok(docs) => {
                let stats = self.apply_snapshot(space, &docs);
                FeedUpdate::Merged { space, stats }
            }
            Err(err) => {
                let reason = err.to_string();
                self.degrade(space, reason.clone());
                FeedUpdate::Degraded { space, reason }
            }
        }
    }

    fn degrade(&mut self, space: Space, reason: String) {
        tracing::warn!(%space, %reason, "space degraded, keeping merged posts");
        // Dropping the handle releases the listener if the store still has it.
        self.subscriptions.remove(&space);
        self.status.insert(space, SpaceStatus::Degraded(reason));
    }

    /// Folds a full snapshot of `space` into the collection.
    ///
    /// New ids are appended. Known ids are refreshed, except that an entry
    /// with a committed timestamp is never replaced by a copy without one.
    /// Posts of `space` absent from the snapshot are dropped.
    pub fn apply_snapshot(&mut self, space: Space, docs: &[Document]) -> MergeStats {
        let incoming: Vec<Post> = docs
            .iter()
            .filter_map(|doc| match Post::from_document(doc, space) {
                Ok(post) => Some(post),
                Err(err) => {
                    tracing::warn!(%space, id = %doc.id, error = %err, "skipping malformed post");
                    None
                }
            })
            .collect();

        let mut stats = MergeStats::default();
        let present: HashSet<&str> = incoming.iter().map(|p| p.id.as_str()).collect();
        let before = self.posts.len();
        self.posts
            .retain(|p| p.space != space || present.contains(p.id.as_str()));
        stats.removed = before - self.posts.len();

        let mut index: HashMap<String, usize> = self
            .posts
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();

        for post in incoming {
            match index.get(&post.id) {
                Some(&i) => {
                    if should_replace(&self.posts[i], &post) {
                        self.posts[i] = post;
                        stats.updated += 1;
                    }
                }
                None => {
                    index.insert(post.id.clone(), self.posts.len());
                    self.posts.push(post);
                    stats.added += 1;
                }
            }
        }

        if !matches!(self.status.get(&space), Some(SpaceStatus::Degraded(_))) {
            self.status.insert(space, SpaceStatus::Live);
        }
        tracing::debug!(%space, added = stats.added, updated = stats.updated, removed = stats.removed, "snapshot merged");
        stats
    }

    /// Restricts `sorted_posts` to one space; `None` shows all spaces.
    /// Nothing is refetched.
    pub fn apply_filter(&mut self, filter: Option<Space>) {
        self.filter = filter;
    }

    pub fn filter(&self) -> Option<Space> {
        self.filter
    }

    /// Visible posts: pending writes first, then newest first. Ties keep
    /// collection order.
    pub fn sorted_posts(&self) -> Vec<&Post> {
        let mut visible: Vec<&Post> = self
            .posts
            .iter()
            .filter(|p| self.filter.map_or(true, |space| p.space == space))
            .collect();
        visible.sort_by(|a, b| newest_first(a.timestamp, b.timestamp));
        visible
    }

    /// Roots and their direct replies, over the visible posts.
    pub fn threads(&self) -> ReplyTree<'_> {
        ReplyTree::build(self.sorted_posts())
    }

    pub fn get(&self, post_id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == post_id)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn space_status(&self, space: Space) -> Option<&SpaceStatus> {
        self.status.get(&space)
    }

    pub fn degraded_spaces(&self) -> Vec<Space> {
        self.status
            .iter()
            .filter(|(_, status)| matches!(status, SpaceStatus::Degraded(_)))
            .map(|(space, _)| *space)
            .collect()
    }

    /// Releases every live query and discards queued snapshots.
    pub fn close(&mut self) {
        let released = self.subscriptions.len();
        self.subscriptions.clear();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        tracing::info!(released, "feed closed");
    }
}

fn should_replace(existing: &Post, incoming: &Post) -> bool {
    existing != incoming && !(existing.timestamp.is_some() && incoming.timestamp.is_none())
}

/// Sort order for post timestamps: pending (`None`) before committed,
/// committed newest first.
pub fn newest_first(a: Option<StoreTimestamp>, b: Option<StoreTimestamp>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => b.cmp(&a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_core::models::Fields;
    use cf_core::traits::MockDocumentStore;
    use serde_json::{json, Value};

    fn doc(id: &str, seconds: Option<i64>, content: &str) -> Document {
        let timestamp = seconds.map_or(Value::Null, |s| json!({ "seconds": s, "nanoseconds": 0 }));
        let fields: Fields = match json!({
            "owner": "u1",
            "content": content,
            "timestamp": timestamp,
            "space": "memes",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        Document::new(id, fields)
    }

    async fn empty_feed() -> FeedAggregator {
        let store = MockDocumentStore::new();
        FeedAggregator::open(&store, &[]).await
    }

    fn ids(feed: &FeedAggregator) -> Vec<&str> {
        feed.sorted_posts().iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn pending_posts_sort_first_then_newest() {
        let mut feed = empty_feed().await;
        feed.apply_snapshot(
            Space::Memes,
            &[doc("old", Some(10), "a"), doc("pending", None, "b"), doc("new", Some(20), "c")],
        );
        assert_eq!(ids(&feed), vec!["pending", "new", "old"]);
    }

    #[tokio::test]
    async fn pending_posts_keep_their_relative_order() {
        let mut feed = empty_feed().await;
        feed.apply_snapshot(
            Space::Memes,
            &[doc("a", None, "a"), doc("b", None, "b"), doc("c", Some(100), "c")],
        );
        assert_eq!(ids(&feed), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_collection_order() {
        let mut feed = empty_feed().await;
        feed.apply_snapshot(Space::Memes, &[doc("a", Some(5), "a"), doc("b", Some(5), "b")]);
        feed.apply_snapshot(Space::Rant, &[doc("c", Some(5), "c")]);
        assert_eq!(ids(&feed), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn reapplying_a_snapshot_changes_nothing() {
        let mut feed = empty_feed().await;
        let snapshot = [doc("a", Some(1), "x"), doc("b", None, "y")];
        feed.apply_snapshot(Space::Memes, &snapshot);
        let stats = feed.apply_snapshot(Space::Memes, &snapshot);
        assert!(stats.is_empty());
        assert_eq!(feed.len(), 2);
    }

    #[tokio::test]
    async fn committed_entry_is_not_replaced_by_pending_copy() {
        let mut feed = empty_feed().await;
        feed.apply_snapshot(Space::Memes, &[doc("a", Some(7), "x")]);
        let stats = feed.apply_snapshot(Space::Memes, &[doc("a", None, "x")]);
        assert_eq!(stats, MergeStats::default());
        assert!(feed.get("a").unwrap().timestamp.is_some());
    }

    #[tokio::test]
    async fn pending_entry_picks_up_its_timestamp() {
        let mut feed = empty_feed().await;
        feed.apply_snapshot(Space::Memes, &[doc("a", None, "x")]);
        let stats = feed.apply_snapshot(Space::Memes, &[doc("a", Some(3), "x")]);
        assert_eq!(stats.updated, 1);
        assert_eq!(feed.get("a").unwrap().timestamp, Some(StoreTimestamp::from_seconds(3)));
    }

    #[tokio::test]
    async fn deletions_only_touch_the_snapshot_space() {
        let mut feed = empty_feed().await;
        feed.apply_snapshot(Space::Memes, &[doc("a", Some(1), "x"), doc("b", Some(2), "y")]);
        feed.apply_snapshot(Space::Rant, &[doc("c", Some(3), "z")]);

        let stats = feed.apply_snapshot(Space::Memes, &[doc("b", Some(2), "y")]);
        assert_eq!(stats.removed, 1);
        assert_eq!(ids(&feed), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn filter_hides_other_spaces_without_dropping_them() {
        let mut feed = empty_feed().await;
        feed.apply_snapshot(Space::Memes, &[doc("a", Some(1), "x")]);
        feed.apply_snapshot(Space::News, &[doc("b", Some(2), "y")]);

        feed.apply_filter(Some(Space::News));
        assert_eq!(ids(&feed), vec!["b"]);
        feed.apply_filter(None);
        assert_eq!(ids(&feed), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn malformed_documents_are_skipped() {
        let mut feed = empty_feed().await;
        let broken = Document::new("bad", Fields::new());
        let stats = feed.apply_snapshot(Space::Memes, &[broken, doc("ok", Some(1), "x")]);
        assert_eq!(stats.added, 1);
        assert!(feed.get("bad").is_none());
    }

    #[tokio::test]
    async fn failed_subscription_degrades_only_that_space() {
        let mut store = MockDocumentStore::new();
        store.expect_subscribe().returning(|collection, sink| {
            if collection.as_str().contains("rant") {
                Err(anyhow::anyhow!("permission denied"))
            } else {
                sink(Ok(Vec::new()));
                Ok(Subscription::detached())
            }
        });

        let mut feed = FeedAggregator::open(&store, &[Space::Memes, Space::Rant]).await;
        feed.drain_pending();

        assert_eq!(feed.space_status(Space::Memes), Some(&SpaceStatus::Live));
        assert_eq!(feed.degraded_spaces(), vec![Space::Rant]);
    }

    #[test]
    fn newest_first_orders_pending_before_committed() {
        let t = |s| Some(StoreTimestamp::from_seconds(s));
        assert_eq!(newest_first(None, t(1)), Ordering::Less);
        assert_eq!(newest_first(t(2), t(1)), Ordering::Less);
        assert_eq!(newest_first(t(1), t(1)), Ordering::Equal);
    }
}
