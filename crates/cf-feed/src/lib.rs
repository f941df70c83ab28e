//! # cf-feed
//!
//! Feed synchronization and local state for the campus feed client.
//! Everything here talks to the backend through the `cf-core` ports only.

use std::sync::Arc;

use cf_core::traits::DocumentStore;

pub mod aggregator;
pub mod compose;
pub mod origin;
pub mod polls;
pub mod posts;
pub mod profile;
pub mod replies;
pub mod session;
pub mod signup;
pub mod toggles;
pub mod verification;

pub use aggregator::{FeedAggregator, FeedUpdate, MergeStats, SpaceStatus};
pub use compose::{PostComposer, PostDraft, ReplyComposer};
pub use origin::{open_reply_chain, resolve_origin, OriginState, ReplyChain};
pub use polls::{OptionTally, PollController, PollDraft};
pub use profile::{user_page, UserPage};
pub use replies::{ReplyTree, Thread};
pub use session::{follow_stats, FollowStats, SessionContext, SessionManager};
pub use signup::{resolve_school, SigninForm, SignupForm};
pub use toggles::{BookmarkToggle, VoteState, VoteTally, VoteToggle};
pub use verification::{wait_for_verification, PollPolicy};

/// Shared handle to the document store port.
pub type StoreHandle = Arc<dyn DocumentStore>;
