//! # Domain Models
//!
//! Typed views over the schema-less documents kept by the backend.
//! Wire field names are fixed by documents already stored, so the serde
//! renames below must not change.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FeedError, Result, UnknownSpace};

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

const SENTINEL_KEY: &str = "__sentinel";
const SERVER_TIMESTAMP: &str = "serverTimestamp";

/// Placeholder the store replaces with its own clock at commit time.
pub fn server_timestamp() -> Value {
    let mut marker = Map::new();
    marker.insert(SENTINEL_KEY.into(), Value::String(SERVER_TIMESTAMP.into()));
    Value::Object(marker)
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value.get(SENTINEL_KEY).and_then(Value::as_str) == Some(SERVER_TIMESTAMP)
}

/// A document as returned by the store: its id plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self { id: id.into(), fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut fields = self.fields.clone();
        // Unresolved placeholders read as null, the same as a pending write.
        for value in fields.values_mut() {
            if is_server_timestamp(value) {
                *value = Value::Null;
            }
        }
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| FeedError::Decode(format!("document {}: {e}", self.id)))
    }
}

/// Commit time as the backend reports it: `{seconds, nanoseconds}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreTimestamp {
    pub seconds: i64,
    #[serde(default)]
    pub nanoseconds: u32,
}

impl StoreTimestamp {
    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds, nanoseconds: 0 }
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            seconds: at.timestamp(),
            nanoseconds: at.timestamp_subsec_nanos(),
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }
}

/// The fixed set of topic categories posts are filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    Confession,
    Memes,
    News,
    Questions,
    Rant,
}

impl Space {
    pub const ALL: [Space; 5] = [
        Space::Confession,
        Space::Memes,
        Space::News,
        Space::Questions,
        Space::Rant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Space::Confession => "confession",
            Space::Memes => "memes",
            Space::News => "news",
            Space::Questions => "questions",
            Space::Rant => "rant",
        }
    }
}

impl FromStr for Space {
    type Err = UnknownSpace;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Space::ALL
            .into_iter()
            .find(|space| space.as_str() == s)
            .ok_or_else(|| UnknownSpace(s.to_string()))
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author details copied onto a post when it is written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub school: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostWire {
    owner: String,
    content: String,
    #[serde(default)]
    timestamp: Option<StoreTimestamp>,
    space: Space,
    #[serde(default)]
    title: String,
    #[serde(default)]
    user: AuthorSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin_id: Option<String>,
}

/// The fundamental unit of conversation. Replies are posts with a parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub owner: String,
    pub space: Space,
    pub title: String,
    pub content: String,
    /// `None` until the store commits the write.
    pub timestamp: Option<StoreTimestamp>,
    pub parent_id: Option<String>,
    pub origin_id: Option<String>,
    pub user: AuthorSnapshot,
}

impl Post {
    /// Decodes a document pushed from `spaces/{space}/posts`. The space of
    /// the collection wins over whatever the document says.
    pub fn from_document(doc: &Document, space: Space) -> Result<Self> {
        let mut doc = doc.clone();
        doc.fields
            .insert("space".into(), Value::String(space.as_str().into()));
        let wire: PostWire = doc.decode()?;
        Ok(Self {
            id: doc.id,
            owner: wire.owner,
            space: wire.space,
            title: wire.title,
            content: wire.content,
            timestamp: wire.timestamp,
            parent_id: wire.parent_id,
            origin_id: wire.origin_id,
            user: wire.user,
        })
    }

    pub fn to_fields(&self) -> Fields {
        let wire = PostWire {
            owner: self.owner.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            space: self.space,
            title: self.title.clone(),
            user: self.user.clone(),
            parent_id: self.parent_id.clone(),
            origin_id: self.origin_id.clone(),
        };
        to_fields(&wire)
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// A post about to be written; the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub owner: String,
    pub space: Space,
    pub title: String,
    pub content: String,
    pub parent_id: Option<String>,
    pub origin_id: Option<String>,
    pub user: AuthorSnapshot,
}

impl NewPost {
    pub fn into_fields(self) -> Fields {
        let wire = PostWire {
            owner: self.owner,
            content: self.content,
            timestamp: None,
            space: self.space,
            title: self.title,
            user: self.user,
            parent_id: self.parent_id,
            origin_id: self.origin_id,
        };
        let mut fields = to_fields(&wire);
        fields.insert("timestamp".into(), server_timestamp());
        fields
    }
}

fn to_fields<T: Serialize>(value: &T) -> Fields {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Fields::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// Subcollection of the post holding records for this direction.
    pub fn collection_name(&self) -> &'static str {
        match self {
            VoteDirection::Up => "upvotes",
            VoteDirection::Down => "downvotes",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            VoteDirection::Up => VoteDirection::Down,
            VoteDirection::Down => VoteDirection::Up,
        }
    }
}

/// A directional vote, stored at `.../{upvotes|downvotes}/{userId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub timestamp: Option<StoreTimestamp>,
}

impl VoteRecord {
    /// Older clients "removed" votes by blanking the document, so a record
    /// only counts when it still names its voter.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let record: VoteRecord = doc.decode().ok()?;
        (!record.user_id.is_empty() && !record.username.is_empty()).then_some(record)
    }

    pub fn fields(user_id: &str, username: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("userId".into(), Value::String(user_id.into()));
        fields.insert("username".into(), Value::String(username.into()));
        fields.insert("timestamp".into(), server_timestamp());
        fields
    }
}

pub fn bookmark_fields(post_id: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("postId".into(), Value::String(post_id.into()));
    fields.insert("bookmarkedAt".into(), server_timestamp());
    fields
}

/// What the auth provider knows about a user. Profile data lives in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Profile projection resolved once per sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub uid: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub school: String,
    pub school_id: String,
    pub followers: u64,
    pub following: u64,
}

/// A signed-in user: identity plus resolved profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub profile: Profile,
}

impl Session {
    pub fn uid(&self) -> &str {
        &self.identity.uid
    }

    pub fn author_snapshot(&self) -> AuthorSnapshot {
        AuthorSnapshot {
            first_name: self.profile.first_name.clone(),
            last_name: self.profile.last_name.clone(),
            username: self.profile.username.clone(),
            school: self.profile.school.clone(),
        }
    }
}

/// A school document in `schools/{id}`; `email` holds its mail domain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct School {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// A poll in `polls/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub created_by: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollWire {
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<PollOptionWire>,
    #[serde(default)]
    created_by: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct PollOptionWire {
    #[serde(default)]
    option: String,
}

impl Poll {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let wire: PollWire = doc.decode()?;
        Ok(Self {
            id: doc.id.clone(),
            question: wire.question,
            options: wire.options.into_iter().map(|o| o.option).collect(),
            created_by: wire.created_by,
        })
    }

    pub fn fields(question: &str, options: &[String], created_by: &str) -> Fields {
        let options: Vec<PollOptionWire> = options
            .iter()
            .map(|o| PollOptionWire { option: o.clone() })
            .collect();
        let mut fields = Fields::new();
        fields.insert("question".into(), Value::String(question.into()));
        fields.insert(
            "options".into(),
            serde_json::to_value(options).unwrap_or(Value::Array(Vec::new())),
        );
        fields.insert("createdBy".into(), Value::String(created_by.into()));
        fields
    }
}
