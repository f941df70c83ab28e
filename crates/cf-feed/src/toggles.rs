//! # Toggles
//!
//! Per-user vote and bookmark state for one post.
//!
//! A user holds at most one directional vote per post. Switching direction
//! removes the old record before writing the new one, so a crash in between
//! leaves no vote rather than two. Local state is updated first and
//! re-derived from the store when a write fails.

use std::sync::Arc;

use cf_core::error::{FeedError, Result};
use cf_core::models::{bookmark_fields, Document, Post, Session, Space, VoteDirection, VoteRecord};
use cf_core::paths::{self, CollectionPath};
use cf_core::traits::WriteOptions;

use crate::session::SessionContext;
use crate::StoreHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoteState {
    #[default]
    None,
    Upvoted,
    Downvoted,
}

impl VoteState {
    pub fn direction(self) -> Option<VoteDirection> {
        match self {
            VoteState::None => None,
            VoteState::Upvoted => Some(VoteDirection::Up),
            VoteState::Downvoted => Some(VoteDirection::Down),
        }
    }
}

impl From<VoteDirection> for VoteState {
    fn from(direction: VoteDirection) -> Self {
        match direction {
            VoteDirection::Up => VoteState::Upvoted,
            VoteDirection::Down => VoteState::Downvoted,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub up: u64,
    pub down: u64,
}

impl VoteTally {
    pub fn score(&self) -> i64 {
        self.up as i64 - self.down as i64
    }

    fn bump(&mut self, direction: VoteDirection, delta: i64) {
        let count = match direction {
            VoteDirection::Up => &mut self.up,
            VoteDirection::Down => &mut self.down,
        };
        *count = count.saturating_add_signed(delta);
    }
}

pub struct VoteToggle {
    store: StoreHandle,
    space: Space,
    post_id: String,
    state: VoteState,
    tally: VoteTally,
    stale: bool,
}

impl VoteToggle {
    pub fn new(store: StoreHandle, post: &Post) -> Self {
        Self {
            store,
            space: post.space,
            post_id: post.id.clone(),
            state: VoteState::None,
            tally: VoteTally::default(),
            stale: false,
        }
    }

    pub fn state(&self) -> VoteState {
        self.state
    }

    pub fn tally(&self) -> VoteTally {
        self.tally
    }

    /// Set when a write failed and re-reading the store failed too; the
    /// local state may not match the store until the next `refresh`.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn collection(&self, direction: VoteDirection) -> CollectionPath {
        paths::votes(self.space, &self.post_id, direction)
    }

    async fn records(&self, direction: VoteDirection) -> Result<Vec<(Document, VoteRecord)>> {
        let docs = self
            .store
            .read_many(&self.collection(direction), None)
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| VoteRecord::from_document(&doc).map(|record| (doc, record)))
            .collect())
    }

    /// Re-derives counts and the user's vote from the store.
    ///
    /// A user found in both directions (left behind by an interrupted
    /// switch) keeps the newer record; the other one is deleted.
    pub async fn refresh(&mut self, ctx: &SessionContext) -> Result<VoteTally> {
        let ups = self.records(VoteDirection::Up).await?;
        let downs = self.records(VoteDirection::Down).await?;
        let mut tally = VoteTally {
            up: ups.len() as u64,
            down: downs.len() as u64,
        };

        let mut state = VoteState::None;
        if let Some(session) = ctx.current() {
            let mine = |records: &[(Document, VoteRecord)]| {
                records
                    .iter()
                    .find(|(doc, _)| doc.id == session.uid())
                    .map(|(_, record)| record.timestamp)
            };
            state = match (mine(&ups), mine(&downs)) {
                (None, None) => VoteState::None,
                (Some(_), None) => VoteState::Upvoted,
                (None, Some(_)) => VoteState::Downvoted,
                (Some(up_at), Some(down_at)) => {
                    // Unresolved timestamps are the most recent writes.
                    let keep = if up_at.is_none() || (down_at.is_some() && up_at >= down_at) {
                        VoteDirection::Up
                    } else {
                        VoteDirection::Down
                    };
                    let discard = keep.opposite();
                    tracing::warn!(post = %self.post_id, uid = %session.uid(), ?keep, "user had both votes, reconciling");
                    self.store
                        .delete(&self.collection(discard).doc(session.uid()))
                        .await?;
                    tally.bump(discard, -1);
                    keep.into()
                }
            };
        }

        self.state = state;
        self.tally = tally;
        self.stale = false;
        Ok(tally)
    }

    pub async fn upvote(&mut self, ctx: &SessionContext) -> Result<VoteState> {
        self.cast(ctx, VoteDirection::Up).await
    }

    pub async fn downvote(&mut self, ctx: &SessionContext) -> Result<VoteState> {
        self.cast(ctx, VoteDirection::Down).await
    }

    /// Voting the held direction again clears the vote; voting the other
    /// direction switches it. The held direction is re-read from the store
    /// first, since other views of the post keep their own toggles.
    async fn cast(&mut self, ctx: &SessionContext, direction: VoteDirection) -> Result<VoteState> {
        let session = ctx.require()?;
        if let Err(err) = self.refresh(ctx).await {
            tracing::warn!(post = %self.post_id, error = %err, "vote re-read failed, using cached state");
        }
        let previous = self.state;
        let target = if previous == VoteState::from(direction) {
            VoteState::None
        } else {
            VoteState::from(direction)
        };

        self.apply_local(previous, target);
        if let Err(err) = self.persist(&session, target).await {
            tracing::error!(post = %self.post_id, error = %err, "vote write failed, re-reading");
            if let Err(reread) = self.refresh(ctx).await {
                tracing::warn!(post = %self.post_id, error = %reread, "vote state may be stale");
                self.stale = true;
            }
            return Err(err);
        }
        Ok(self.state)
    }

    fn apply_local(&mut self, previous: VoteState, target: VoteState) {
        if let Some(old) = previous.direction() {
            self.tally.bump(old, -1);
        }
        if let Some(new) = target.direction() {
            self.tally.bump(new, 1);
        }
        self.state = target;
    }

    /// Every direction other than `target` is deleted before `target` is
    /// written; deleting a record that is not there is a no-op.
    async fn persist(&self, session: &Session, target: VoteState) -> Result<()> {
        let uid = session.uid();
        let keep = target.direction();
        for direction in [VoteDirection::Up, VoteDirection::Down] {
            if keep != Some(direction) {
                self.store.delete(&self.collection(direction).doc(uid)).await?;
            }
        }
        if let Some(new) = keep {
            self.store
                .write(
                    &self.collection(new).doc(uid),
                    VoteRecord::fields(uid, &session.profile.username),
                    WriteOptions::replace(),
                )
                .await?;
        }
        Ok(())
    }
}

pub struct BookmarkToggle {
    store: StoreHandle,
    post_id: String,
    bookmarked: bool,
    stale: bool,
}

impl BookmarkToggle {
    pub fn new(store: StoreHandle, post: &Post) -> Self {
        Self {
            store,
            post_id: post.id.clone(),
            bookmarked: false,
            stale: false,
        }
    }

    pub fn is_bookmarked(&self) -> bool {
        self.bookmarked
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn owner(ctx: &SessionContext) -> Result<Arc<Session>> {
        let session = ctx.require()?;
        if session.profile.school_id.is_empty() {
            return Err(FeedError::Forbidden("profile has no school".into()));
        }
        Ok(session)
    }

    pub async fn refresh(&mut self, ctx: &SessionContext) -> Result<bool> {
        let session = Self::owner(ctx)?;
        let path = paths::bookmark(&session.profile.school_id, session.uid(), &self.post_id);
        self.bookmarked = self.store.read_one(&path).await?.is_some();
        self.stale = false;
        Ok(self.bookmarked)
    }

    pub async fn toggle(&mut self, ctx: &SessionContext) -> Result<bool> {
        let session = Self::owner(ctx)?;
        let path = paths::bookmark(&session.profile.school_id, session.uid(), &self.post_id);

        self.bookmarked = !self.bookmarked;
        let written = if self.bookmarked {
            self.store
                .write(&path, bookmark_fields(&self.post_id), WriteOptions::replace())
                .await
        } else {
            self.store.delete(&path).await
        };

        if let Err(err) = written {
            tracing::error!(post = %self.post_id, error = %err, "bookmark write failed, re-reading");
            if let Err(reread) = self.refresh(ctx).await {
                tracing::warn!(post = %self.post_id, error = %reread, "bookmark state may be stale");
                self.stale = true;
            }
            return Err(err.into());
        }
        Ok(self.bookmarked)
    }
}
