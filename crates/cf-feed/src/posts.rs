//! Post management outside the live feed: deletion, reply counts, links.

use cf_core::error::{FeedError, Result};
use cf_core::models::Post;
use cf_core::paths;
use cf_core::traits::{DocumentStore, Filter};

use crate::session::SessionContext;

/// Deletes a post. Only its owner may do so.
pub async fn delete_post<S>(store: &S, ctx: &SessionContext, post: &Post) -> Result<()>
where
    S: DocumentStore + ?Sized,
{
    let session = ctx.require()?;
    if post.owner != session.uid() {
        return Err(FeedError::Forbidden(format!("post {} belongs to another user", post.id)));
    }
    store.delete(&paths::post(post.space, &post.id)).await?;
    tracing::info!(space = %post.space, id = %post.id, "post deleted");
    Ok(())
}

/// Number of direct replies stored for a post.
pub async fn count_replies<S>(store: &S, post: &Post) -> Result<usize>
where
    S: DocumentStore + ?Sized,
{
    let replies = store
        .read_many(
            &paths::space_posts(post.space),
            Some(Filter::field_eq("parentId", post.id.as_str())),
        )
        .await?;
    Ok(replies.len())
}

/// Shareable link: `{base}/{space}/{id}`.
pub fn permalink(base_url: &str, post: &Post) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), post.space, post.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_core::models::{AuthorSnapshot, Document, Fields, Identity, Profile, Session, Space};
    use cf_core::traits::MockDocumentStore;

    fn post(owner: &str) -> Post {
        Post {
            id: "p1".into(),
            owner: owner.into(),
            space: Space::Confession,
            title: "t".into(),
            content: "c".into(),
            timestamp: None,
            parent_id: None,
            origin_id: None,
            user: AuthorSnapshot::default(),
        }
    }

    fn ctx(uid: &str) -> SessionContext {
        SessionContext::fixed(Session {
            identity: Identity {
                uid: uid.into(),
                email: None,
                email_verified: true,
            },
            profile: Profile::default(),
        })
    }

    #[tokio::test]
    async fn only_owner_may_delete() {
        let mut store = MockDocumentStore::new();
        store
            .expect_delete()
            .withf(|path| path.as_str() == "spaces/confession/posts/p1")
            .times(1)
            .returning(|_| Ok(()));

        let err = delete_post(&store, &ctx("mallory"), &post("ada")).await.unwrap_err();
        assert!(matches!(err, FeedError::Forbidden(_)));
        tokio_test::assert_ok!(delete_post(&store, &ctx("ada"), &post("ada")).await);
    }

    #[tokio::test]
    async fn reply_count_filters_on_parent() {
        let mut store = MockDocumentStore::new();
        store
            .expect_read_many()
            .withf(|collection, filter| {
                collection.as_str() == "spaces/confession/posts"
                    && *filter == Some(Filter::field_eq("parentId", "p1"))
            })
            .returning(|_, _| Ok(vec![Document::new("r1", Fields::new())]));

        assert_eq!(tokio_test::assert_ok!(count_replies(&store, &post("ada")).await), 1);
    }

    #[test]
    fn permalink_joins_space_and_id() {
        assert_eq!(
            permalink("https://campus.example/", &post("ada")),
            "https://campus.example/confession/p1"
        );
    }
}
