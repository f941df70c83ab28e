//! # Composers
//!
//! Submission gates for new posts and replies. Checks run in a fixed order
//! and stop at the first failure; the store is only touched once every
//! check passes.

use cf_core::error::{Field, Reason, Result, ValidationError};
use cf_core::models::{NewPost, Post, Space};
use cf_core::paths;

use crate::session::SessionContext;
use crate::StoreHandle;

pub const TITLE_MAX_CHARS: usize = 60;
/// Line breaks do not count toward this.
pub const CONTENT_MAX_CHARS: usize = 300;
pub const CONTENT_MAX_LINES: usize = 15;

/// Body text checks shared by posts and replies. Limits apply to the
/// trimmed text, which is what gets stored.
pub fn check_content(content: &str) -> std::result::Result<(), ValidationError> {
    let flag = |reason| Err(ValidationError::new(Field::Content, reason));
    let content = content.trim();
    if content.is_empty() {
        return flag(Reason::Missing);
    }
    if content.chars().filter(|c| *c != '\n').count() > CONTENT_MAX_CHARS {
        return flag(Reason::TooLong {
            max: CONTENT_MAX_CHARS,
        });
    }
    if content.lines().count() > CONTENT_MAX_LINES {
        return flag(Reason::TooManyLines {
            max: CONTENT_MAX_LINES,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    /// Space name as picked by the user; empty until one is selected.
    pub space: String,
    pub title: String,
    pub content: String,
}

impl PostDraft {
    /// Space, then title, then content.
    pub fn validate(&self) -> std::result::Result<Space, ValidationError> {
        if self.space.is_empty() {
            return Err(ValidationError::new(Field::Space, Reason::Missing));
        }
        let space: Space = self
            .space
            .parse()
            .map_err(|_| ValidationError::new(Field::Space, Reason::UnknownSpace))?;

        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::new(Field::Title, Reason::Missing));
        }
        if title.chars().count() > TITLE_MAX_CHARS {
            return Err(ValidationError::new(
                Field::Title,
                Reason::TooLong {
                    max: TITLE_MAX_CHARS,
                },
            ));
        }

        check_content(&self.content)?;
        Ok(space)
    }
}

pub struct PostComposer {
    store: StoreHandle,
    draft: PostDraft,
    flagged: Option<Field>,
}

impl PostComposer {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            draft: PostDraft::default(),
            flagged: None,
        }
    }

    pub fn draft(&self) -> &PostDraft {
        &self.draft
    }

    /// The field the last failed submission stopped at.
    pub fn flagged(&self) -> Option<Field> {
        self.flagged
    }

    pub fn select_space(&mut self, space: &str) {
        self.draft.space = space.to_string();
        self.clear_flag(Field::Space);
    }

    pub fn set_title(&mut self, title: &str) {
        self.draft.title = title.to_string();
        self.clear_flag(Field::Title);
    }

    pub fn set_content(&mut self, content: &str) {
        self.draft.content = content.to_string();
        self.clear_flag(Field::Content);
    }

    fn clear_flag(&mut self, field: Field) {
        if self.flagged == Some(field) {
            self.flagged = None;
        }
    }

    /// Writes the draft as a new root post and returns its id. On a store
    /// failure the draft is kept for another try.
    pub async fn submit(&mut self, ctx: &SessionContext) -> Result<String> {
        let space = match self.draft.validate() {
            Ok(space) => space,
            Err(invalid) => {
                self.flagged = Some(invalid.field);
                return Err(invalid.into());
            }
        };
        self.flagged = None;
        let session = ctx.require()?;

        let new_post = NewPost {
            owner: session.uid().to_string(),
            space,
            title: self.draft.title.trim().to_string(),
            content: self.draft.content.trim().to_string(),
            parent_id: None,
            origin_id: None,
            user: session.author_snapshot(),
        };
        let id = self
            .store
            .add(&paths::space_posts(space), new_post.into_fields())
            .await?;

        tracing::info!(%space, %id, "post created");
        self.draft.title.clear();
        self.draft.content.clear();
        Ok(id)
    }
}

/// Replies are posts in the parent's space pointing at their parent and at
/// the root of the chain.
pub struct ReplyComposer {
    store: StoreHandle,
    parent: Post,
    content: String,
    flagged: bool,
}

impl ReplyComposer {
    pub fn new(store: StoreHandle, parent: &Post) -> Self {
        Self {
            store,
            parent: parent.clone(),
            content: String::new(),
            flagged: false,
        }
    }

    pub fn parent(&self) -> &Post {
        &self.parent
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    pub fn set_content(&mut self, content: &str) {
        self.content = content.to_string();
        self.flagged = false;
    }

    pub async fn submit(&mut self, ctx: &SessionContext) -> Result<String> {
        if let Err(invalid) = check_content(&self.content) {
            self.flagged = true;
            return Err(invalid.into());
        }
        self.flagged = false;
        let session = ctx.require()?;

        let origin_id = self
            .parent
            .origin_id
            .clone()
            .unwrap_or_else(|| self.parent.id.clone());
        let reply = NewPost {
            owner: session.uid().to_string(),
            space: self.parent.space,
            title: String::new(),
            content: self.content.trim().to_string(),
            parent_id: Some(self.parent.id.clone()),
            origin_id: Some(origin_id),
            user: session.author_snapshot(),
        };
        let id = self
            .store
            .add(&paths::space_posts(self.parent.space), reply.into_fields())
            .await?;

        tracing::info!(parent = %self.parent.id, %id, "reply created");
        self.content.clear();
        Ok(id)
    }
}
