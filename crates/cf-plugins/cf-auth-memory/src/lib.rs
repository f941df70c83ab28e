//! # cf-auth-memory
//!
//! Argon2-based, in-process implementation of `SessionProvider`.
//! Stands in for the hosted auth service in local runs and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use cf_core::error::{FeedError, Field, Reason, Result, ValidationError};
use cf_core::models::Identity;
use cf_core::traits::{IdentitySink, SessionProvider, Subscription};
use dashmap::DashMap;
use uuid::Uuid;

struct Account {
    uid: String,
    password_hash: String,
    email_verified: bool,
}

struct Inner {
    /// Keyed by lowercased email.
    accounts: DashMap<String, Account>,
    current: Mutex<Option<Identity>>,
    listeners: DashMap<u64, Arc<IdentitySink>>,
    next_listener: AtomicU64,
    /// Push verification changes to listeners instead of waiting for `reload`.
    push_verification: AtomicBool,
}

#[derive(Clone)]
pub struct MemorySessionProvider {
    inner: Arc<Inner>,
}

impl Default for MemorySessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                accounts: DashMap::new(),
                current: Mutex::new(None),
                listeners: DashMap::new(),
                next_listener: AtomicU64::new(1),
                push_verification: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_push_verification(&self, push: bool) {
        self.inner.push_verification.store(push, Ordering::SeqCst);
    }

    /// Creates an unverified account and signs it in.
    pub fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
        let key = email.to_lowercase();
        if self.inner.accounts.contains_key(&key) {
            return Err(ValidationError::new(Field::Email, Reason::AlreadyInUse).into());
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("password hashing failed: {e}"))?
            .to_string();

        let uid = Uuid::new_v4().simple().to_string();
        self.inner.accounts.insert(
            key,
            Account {
                uid: uid.clone(),
                password_hash,
                email_verified: false,
            },
        );
        tracing::info!(%uid, "account created");

        let identity = Identity {
            uid,
            email: Some(email.to_string()),
            email_verified: false,
        };
        self.inner.set_current(Some(identity.clone()));
        Ok(identity)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = {
            let account = self
                .inner
                .accounts
                .get(&email.to_lowercase())
                .ok_or(FeedError::InvalidCredentials)?;
            let parsed = PasswordHash::new(&account.password_hash)
                .map_err(|e| anyhow!("stored hash unreadable: {e}"))?;
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .map_err(|_| FeedError::InvalidCredentials)?;
            Identity {
                uid: account.uid.clone(),
                email: Some(email.to_string()),
                email_verified: account.email_verified,
            }
        };
        self.inner.set_current(Some(identity.clone()));
        Ok(identity)
    }

    pub fn sign_out(&self) {
        self.inner.set_current(None);
    }

    /// What following the emailed verification link does.
    pub fn verify_email(&self, email: &str) -> Result<()> {
        let uid = {
            let mut account = self
                .inner
                .accounts
                .get_mut(&email.to_lowercase())
                .ok_or_else(|| FeedError::NotFound("Account".into(), email.into()))?;
            account.email_verified = true;
            account.uid.clone()
        };

        if self.inner.push_verification.load(Ordering::SeqCst) {
            let refreshed = self
                .inner
                .current()
                .filter(|identity| identity.uid == uid)
                .map(|identity| Identity {
                    email_verified: true,
                    ..identity
                });
            if refreshed.is_some() {
                self.inner.set_current(refreshed);
            }
        }
        Ok(())
    }
}

fn lock(current: &Mutex<Option<Identity>>) -> MutexGuard<'_, Option<Identity>> {
    current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn current(&self) -> Option<Identity> {
        lock(&self.current).clone()
    }

    fn set_current(&self, identity: Option<Identity>) {
        *lock(&self.current) = identity.clone();
        let listeners: Vec<Arc<IdentitySink>> =
            self.listeners.iter().map(|l| l.value().clone()).collect();
        for listener in listeners {
            (**listener)(identity.clone());
        }
    }

    fn verified(&self, email: &str) -> Option<bool> {
        self.accounts
            .get(&email.to_lowercase())
            .map(|account| account.email_verified)
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    fn current(&self) -> Option<Identity> {
        self.inner.current()
    }

    fn on_state_change(&self, sink: IdentitySink) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        let sink = Arc::new(sink);
        self.inner.listeners.insert(id, sink.clone());
        (**sink)(self.inner.current());

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.remove(&id);
            }
        })
    }

    async fn reload(&self) -> anyhow::Result<Option<Identity>> {
        let Some(mut identity) = self.inner.current() else {
            return Ok(None);
        };
        if let Some(verified) = identity.email.as_deref().and_then(|e| self.inner.verified(e)) {
            identity.email_verified = verified;
        }
        *lock(&self.inner.current) = Some(identity.clone());
        Ok(Some(identity))
    }
}
