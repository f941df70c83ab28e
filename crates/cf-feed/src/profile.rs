//! Public profile pages: a user looked up by username, with their posts
//! from every space.

use cf_core::error::{FeedError, Result};
use cf_core::models::{Post, Profile, Space};
use cf_core::paths;
use cf_core::traits::{DocumentStore, Filter};
use serde::Deserialize;

use crate::aggregator::newest_first;
use crate::session::{build_profile, FollowStats};

#[derive(Debug, Clone, PartialEq)]
pub struct UserPage {
    pub profile: Profile,
    /// Every post and reply the user wrote, pending first then newest first.
    pub posts: Vec<Post>,
}

impl UserPage {
    pub fn follow_stats(&self) -> FollowStats {
        FollowStats {
            followers: self.profile.followers,
            following: self.profile.following,
        }
    }
}

#[derive(Deserialize)]
struct UserRef {
    #[serde(default)]
    uid: Option<String>,
}

/// Loads the page of the user called `username`, searching every school.
pub async fn user_page<S>(store: &S, username: &str) -> Result<UserPage>
where
    S: DocumentStore + ?Sized,
{
    for school in store.read_many(&paths::schools(), None).await? {
        let found = store
            .read_many(
                &paths::school_users(&school.id),
                Some(Filter::field_eq("username", username)),
            )
            .await?;
        let Some(user_doc) = found.first() else {
            continue;
        };
        // User documents are keyed by uid; older ones also carry it as a field.
        let uid = user_doc
            .decode::<UserRef>()?
            .uid
            .unwrap_or_else(|| user_doc.id.clone());
        let profile = build_profile(store, &school, user_doc, &uid).await?;
        let posts = posts_by_owner(store, &uid).await?;
        tracing::debug!(%username, school = %school.id, posts = posts.len(), "user page loaded");
        return Ok(UserPage { profile, posts });
    }
    Err(FeedError::NotFound("User".into(), username.into()))
}

/// All posts owned by `uid` across every space.
pub async fn posts_by_owner<S>(store: &S, uid: &str) -> Result<Vec<Post>>
where
    S: DocumentStore + ?Sized,
{
    let mut posts = Vec::new();
    for space in Space::ALL {
        let docs = store
            .read_many(&paths::space_posts(space), Some(Filter::field_eq("owner", uid)))
            .await?;
        for doc in &docs {
            match Post::from_document(doc, space) {
                Ok(post) => posts.push(post),
                Err(err) => tracing::warn!(%space, id = %doc.id, error = %err, "skipping malformed post"),
            }
        }
    }
    posts.sort_by(|a, b| newest_first(a.timestamp, b.timestamp));
    Ok(posts)
}
