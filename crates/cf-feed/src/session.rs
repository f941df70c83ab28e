//! # Session
//!
//! `SessionManager` is the only writer of the signed-in state. It listens to
//! the auth provider, resolves the profile once per sign-in and publishes the
//! result. Everything else reads it through a cloned `SessionContext`.

use std::sync::Arc;
use std::time::Duration;

use cf_core::error::{FeedError, Result};
use cf_core::models::{Document, Identity, Profile, Session};
use cf_core::paths;
use cf_core::traits::{DocumentStore, Filter, SessionProvider, Subscription};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::StoreHandle;

/// Read side of the session state. Cheap to clone; pass by reference.
#[derive(Debug, Clone)]
pub struct SessionContext {
    rx: watch::Receiver<Option<Arc<Session>>>,
}

impl SessionContext {
    /// A context that stays signed out.
    pub fn signed_out() -> Self {
        let (_, rx) = watch::channel(None);
        Self { rx }
    }

    /// A context pinned to one session, for tools and tests.
    pub fn fixed(session: Session) -> Self {
        let (_, rx) = watch::channel(Some(Arc::new(session)));
        Self { rx }
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.rx.borrow().clone()
    }

    /// The current session, or `Unauthenticated`.
    pub fn require(&self) -> Result<Arc<Session>> {
        self.current().ok_or(FeedError::Unauthenticated)
    }

    pub fn is_signed_in(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Waits until the published session changes. `false` once the manager
    /// is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowStats {
    pub followers: u64,
    pub following: u64,
}

/// Counts a user's followers and followings.
pub async fn follow_stats<S>(store: &S, school_id: &str, uid: &str) -> Result<FollowStats>
where
    S: DocumentStore + ?Sized,
{
    let followers = store
        .read_many(&paths::followers(school_id, uid), None)
        .await?
        .len() as u64;
    let following = store
        .read_many(&paths::followings(school_id, uid), None)
        .await?
        .len() as u64;
    Ok(FollowStats {
        followers,
        following,
    })
}

#[derive(Deserialize)]
struct UserDoc {
    #[serde(default, alias = "firstName")]
    first_name: String,
    #[serde(default, alias = "lastName")]
    last_name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    school: Option<String>,
}

#[derive(Deserialize)]
struct SchoolDoc {
    #[serde(default)]
    name: String,
}

/// Profile of the user stored at `user_doc` under `school`.
pub(crate) async fn build_profile<S>(
    store: &S,
    school: &Document,
    user_doc: &Document,
    uid: &str,
) -> Result<Profile>
where
    S: DocumentStore + ?Sized,
{
    let user: UserDoc = user_doc.decode()?;
    let school_name = match user.school {
        Some(name) => name,
        None => school.decode::<SchoolDoc>()?.name,
    };
    let stats = follow_stats(store, &school.id, uid).await?;
    Ok(Profile {
        uid: uid.to_string(),
        first_name: user.first_name,
        last_name: user.last_name,
        username: user.username,
        school: school_name,
        school_id: school.id.clone(),
        followers: stats.followers,
        following: stats.following,
    })
}

/// Finds the user record for `uid` across all schools.
pub async fn resolve_profile<S>(store: &S, uid: &str) -> Result<Option<Profile>>
where
    S: DocumentStore + ?Sized,
{
    for school in store.read_many(&paths::schools(), None).await? {
        let found = store
            .read_many(&paths::school_users(&school.id), Some(Filter::field_eq("uid", uid)))
            .await?;
        if let Some(user_doc) = found.first() {
            return build_profile(store, &school, user_doc, uid).await.map(Some);
        }
    }
    Ok(None)
}

/// Delay before a failed profile lookup is tried again by `run`.
pub const PROFILE_RETRY: Duration = Duration::from_secs(5);

pub struct SessionManager {
    store: StoreHandle,
    tx: watch::Sender<Option<Arc<Session>>>,
    events: mpsc::UnboundedReceiver<Option<Identity>>,
    /// Signed-in identity whose profile lookup failed on a store error.
    unresolved: Option<Identity>,
    _listener: Subscription,
}

impl SessionManager {
    pub fn start<P>(store: StoreHandle, provider: &P) -> Self
    where
        P: SessionProvider + ?Sized,
    {
        let (event_tx, events) = mpsc::unbounded_channel();
        let listener = provider.on_state_change(Box::new(move |identity| {
            let _ = event_tx.send(identity);
        }));
        let (tx, _) = watch::channel(None);
        Self {
            store,
            tx,
            events,
            unresolved: None,
            _listener: listener,
        }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            rx: self.tx.subscribe(),
        }
    }

    /// Applies the next auth state change and returns what was published.
    /// While a profile lookup is outstanding it is retried every
    /// `PROFILE_RETRY`. `None` once the provider stops reporting.
    pub async fn next_change(&mut self) -> Option<Option<Arc<Session>>> {
        let identity = match self.unresolved.clone() {
            Some(pending) => tokio::select! {
                event = self.events.recv() => match event {
                    Some(identity) => identity,
                    None => return None,
                },
                _ = tokio::time::sleep(PROFILE_RETRY) => Some(pending),
            },
            None => self.events.recv().await?,
        };
        Some(self.apply(identity).await)
    }

    /// Applies every queued auth state change without waiting, then retries
    /// an outstanding profile lookup once.
    pub async fn sync(&mut self) -> Option<Arc<Session>> {
        while let Ok(identity) = self.events.try_recv() {
            self.apply(identity).await;
        }
        if let Some(pending) = self.unresolved.clone() {
            self.apply(Some(pending)).await;
        }
        self.tx.borrow().clone()
    }

    pub async fn run(mut self) {
        while self.next_change().await.is_some() {}
        tracing::debug!("auth provider closed, session manager stopping");
    }

    async fn apply(&mut self, identity: Option<Identity>) -> Option<Arc<Session>> {
        self.unresolved = None;
        let Some(identity) = identity else {
            if self.tx.borrow().is_some() {
                tracing::info!("signed out");
            }
            self.tx.send_replace(None);
            return None;
        };

        // Same user: keep the resolved profile, refresh identity flags only.
        let known = self
            .tx
            .borrow()
            .as_ref()
            .filter(|s| s.identity.uid == identity.uid)
            .map(|s| s.profile.clone());
        let profile = match known {
            Some(profile) => Some(profile),
            None => match resolve_profile(self.store.as_ref(), &identity.uid).await {
                Ok(Some(profile)) => Some(profile),
                Ok(None) => {
                    tracing::warn!(uid = %identity.uid, "no profile for signed-in user");
                    None
                }
                Err(err) => {
                    // A store error is not a sign-out: leave the published
                    // state alone unless it belongs to someone else.
                    tracing::error!(uid = %identity.uid, error = %err, "profile lookup failed, will retry");
                    self.unresolved = Some(identity);
                    let other_user = self.tx.borrow().is_some();
                    if other_user {
                        self.tx.send_replace(None);
                    }
                    return None;
                }
            },
        };

        let session = profile.map(|profile| {
            Arc::new(Session {
                identity,
                profile,
            })
        });
        if let Some(session) = &session {
            tracing::info!(uid = %session.uid(), school = %session.profile.school_id, "session published");
        }
        self.tx.send_replace(session.clone());
        session
    }
}
