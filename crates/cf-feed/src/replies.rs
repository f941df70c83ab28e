//! Groups a flat post list into roots and their direct replies.

use std::collections::{HashMap, HashSet};

use cf_core::models::Post;

/// A root post and the replies whose parent is that root.
#[derive(Debug, Clone)]
pub struct Thread<'a> {
    pub root: &'a Post,
    pub replies: Vec<&'a Post>,
}

/// Parent/child view over posts that keeps the input order at every level.
#[derive(Debug, Default)]
pub struct ReplyTree<'a> {
    roots: Vec<Thread<'a>>,
    children: HashMap<&'a str, Vec<&'a Post>>,
    orphans: Vec<&'a Post>,
}

impl<'a> ReplyTree<'a> {
    pub fn build<I>(posts: I) -> Self
    where
        I: IntoIterator<Item = &'a Post>,
    {
        let posts: Vec<&'a Post> = posts.into_iter().collect();
        let known: HashSet<&str> = posts.iter().map(|p| p.id.as_str()).collect();

        let mut children: HashMap<&'a str, Vec<&'a Post>> = HashMap::new();
        let mut orphans = Vec::new();
        for &post in &posts {
            let Some(parent) = post.parent_id.as_deref() else {
                continue;
            };
            if parent != post.id && known.contains(parent) {
                children.entry(parent).or_default().push(post);
            } else {
                orphans.push(post);
            }
        }

        let roots = posts
            .iter()
            .filter(|p| p.parent_id.is_none())
            .map(|&root| Thread {
                root,
                replies: children.get(root.id.as_str()).cloned().unwrap_or_default(),
            })
            .collect();

        Self {
            roots,
            children,
            orphans,
        }
    }

    pub fn roots(&self) -> &[Thread<'a>] {
        &self.roots
    }

    /// Direct replies to any post, root or not.
    pub fn replies_to(&self, post_id: &str) -> &[&'a Post] {
        self.children
            .get(post_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Replies whose parent is not among the posts the tree was built from.
    pub fn orphans(&self) -> &[&'a Post] {
        &self.orphans
    }
}
