//! Resolves the root of a reply chain and builds the focused chain view.

use cf_core::error::Result;
use cf_core::models::Post;
use cf_core::paths;
use cf_core::traits::DocumentStore;

use crate::replies::ReplyTree;

#[derive(Debug, Clone, PartialEq)]
pub enum OriginState {
    /// The post is its own origin (a root, or a reply missing `originId`).
    Itself,
    Available(Post),
    /// The origin was deleted; the chain is shown without it.
    Unavailable { origin_id: String },
}

impl OriginState {
    /// Where "jump to origin" lands, if anywhere.
    pub fn target(&self) -> Option<&Post> {
        match self {
            OriginState::Available(post) => Some(post),
            _ => None,
        }
    }
}

pub async fn resolve_origin<S>(store: &S, post: &Post) -> Result<OriginState>
where
    S: DocumentStore + ?Sized,
{
    let Some(origin_id) = post.origin_id.as_deref().filter(|id| *id != post.id) else {
        return Ok(OriginState::Itself);
    };

    match store.read_one(&paths::post(post.space, origin_id)).await? {
        Some(doc) => Ok(OriginState::Available(Post::from_document(&doc, post.space)?)),
        None => {
            tracing::debug!(post = %post.id, %origin_id, "origin missing");
            Ok(OriginState::Unavailable {
                origin_id: origin_id.to_string(),
            })
        }
    }
}

/// A post opened in focus: where its chain starts and who answered it.
#[derive(Debug, Clone)]
pub struct ReplyChain<'a> {
    pub post: &'a Post,
    pub origin: OriginState,
    pub replies: Vec<&'a Post>,
}

pub async fn open_reply_chain<'a, S>(
    store: &S,
    tree: &ReplyTree<'a>,
    post: &'a Post,
) -> Result<ReplyChain<'a>>
where
    S: DocumentStore + ?Sized,
{
    let origin = resolve_origin(store, post).await?;
    Ok(ReplyChain {
        post,
        origin,
        replies: tree.replies_to(&post.id).to_vec(),
    })
}
