//! # Store Paths
//!
//! Hierarchical document paths: collections sit at odd segment counts,
//! documents at even ones (`spaces/{space}/posts/{postId}`).

use std::fmt;

use crate::error::{FeedError, Result};
use crate::models::{Space, VoteDirection};

/// Path to a collection, e.g. `spaces/memes/posts`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

/// Path to a single document, e.g. `spaces/memes/posts/abc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

fn check_segments(raw: &str) -> Result<usize> {
    let segments: Vec<&str> = raw.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(FeedError::InvalidPath(raw.to_string()));
    }
    Ok(segments.len())
}

impl CollectionPath {
    pub fn parse(raw: &str) -> Result<Self> {
        match check_segments(raw)? {
            n if n % 2 == 1 => Ok(Self(raw.to_string())),
            _ => Err(FeedError::InvalidPath(raw.to_string())),
        }
    }

    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn doc(&self, id: &str) -> DocPath {
        DocPath(format!("{}/{}", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DocPath {
    pub fn parse(raw: &str) -> Result<Self> {
        match check_segments(raw)? {
            n if n % 2 == 0 => Ok(Self(raw.to_string())),
            _ => Err(FeedError::InvalidPath(raw.to_string())),
        }
    }

    pub fn collection(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    /// The last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn sub(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Layout of the backend's collections.

pub fn space_posts(space: Space) -> CollectionPath {
    CollectionPath(format!("spaces/{}/posts", space.as_str()))
}

pub fn post(space: Space, post_id: &str) -> DocPath {
    space_posts(space).doc(post_id)
}

pub fn votes(space: Space, post_id: &str, direction: VoteDirection) -> CollectionPath {
    post(space, post_id).sub(direction.collection_name())
}

pub fn upvotes(space: Space, post_id: &str) -> CollectionPath {
    votes(space, post_id, VoteDirection::Up)
}

pub fn downvotes(space: Space, post_id: &str) -> CollectionPath {
    votes(space, post_id, VoteDirection::Down)
}

pub fn schools() -> CollectionPath {
    CollectionPath::root("schools")
}

pub fn school_users(school_id: &str) -> CollectionPath {
    schools().doc(school_id).sub("users")
}

pub fn user(school_id: &str, uid: &str) -> DocPath {
    school_users(school_id).doc(uid)
}

pub fn bookmarks(school_id: &str, uid: &str) -> CollectionPath {
    user(school_id, uid).sub("bookmarks")
}

pub fn bookmark(school_id: &str, uid: &str, post_id: &str) -> DocPath {
    bookmarks(school_id, uid).doc(post_id)
}

pub fn followers(school_id: &str, uid: &str) -> CollectionPath {
    user(school_id, uid).sub("followers")
}

pub fn followings(school_id: &str, uid: &str) -> CollectionPath {
    user(school_id, uid).sub("followings")
}

pub fn polls() -> CollectionPath {
    CollectionPath::root("polls")
}

pub fn poll(poll_id: &str) -> DocPath {
    polls().doc(poll_id)
}

pub fn poll_option(poll_id: &str, index: usize) -> DocPath {
    poll(poll_id).sub("options").doc(&index.to_string())
}

/// Voters for one option live in `polls/{id}/voted{index}`.
pub fn poll_voters(poll_id: &str, index: usize) -> CollectionPath {
    poll(poll_id).sub(&format!("voted{index}"))
}

pub fn poll_voter(poll_id: &str, index: usize, uid: &str) -> DocPath {
    poll_voters(poll_id, index).doc(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_paths_nest_under_post() {
        assert_eq!(
            upvotes(Space::Memes, "p1").doc("u1").as_str(),
            "spaces/memes/posts/p1/upvotes/u1"
        );
        assert_eq!(
            bookmark("msu", "u1", "p1").as_str(),
            "schools/msu/users/u1/bookmarks/p1"
        );
        assert_eq!(
            votes(Space::Memes, "p1", VoteDirection::Down).as_str(),
            "spaces/memes/posts/p1/downvotes"
        );
        assert_eq!(poll_voter("q", 2, "u1").as_str(), "polls/q/voted2/u1");
    }

    #[test]
    fn parse_checks_segment_parity() {
        assert!(CollectionPath::parse("spaces/memes/posts").is_ok());
        assert!(CollectionPath::parse("spaces/memes").is_err());
        assert!(DocPath::parse("spaces//posts/x").is_err());

        let doc = DocPath::parse("spaces/memes/posts/x").unwrap();
        assert_eq!(doc.id(), "x");
        assert_eq!(doc.collection().as_str(), "spaces/memes/posts");
    }
}
