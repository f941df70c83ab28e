//! # Polls
//!
//! Campus-wide polls in `polls/{id}`. Each option `i` keeps its voters in
//! `polls/{id}/voted{i}/{uid}`, so a user's choice is wherever their uid
//! shows up. Cached counts in `polls/{id}/options/{i}` are informational;
//! tallies always come from the voter collections.

use cf_core::error::{FeedError, Field, Reason, Result, ValidationError};
use cf_core::models::{Fields, Poll};
use cf_core::paths;
use cf_core::traits::{DocumentStore, WriteOptions};
use serde_json::Value;

use crate::session::SessionContext;
use crate::StoreHandle;

pub const POLL_MIN_OPTIONS: usize = 2;
pub const POLL_MAX_OPTIONS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollDraft {
    pub question: String,
    pub options: Vec<String>,
}

impl PollDraft {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.question.trim().is_empty() {
            return Err(ValidationError::new(Field::Question, Reason::Missing));
        }
        if self.options.len() < POLL_MIN_OPTIONS {
            return Err(ValidationError::new(
                Field::PollOption(self.options.len()),
                Reason::TooFewOptions {
                    min: POLL_MIN_OPTIONS,
                },
            ));
        }
        if self.options.len() > POLL_MAX_OPTIONS {
            return Err(ValidationError::new(
                Field::PollOption(POLL_MAX_OPTIONS),
                Reason::TooManyOptions {
                    max: POLL_MAX_OPTIONS,
                },
            ));
        }
        if let Some(blank) = self.options.iter().position(|o| o.trim().is_empty()) {
            return Err(ValidationError::new(Field::PollOption(blank), Reason::Missing));
        }
        Ok(())
    }
}

fn option_fields(label: &str, votes: u64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("option".into(), Value::String(label.into()));
    fields.insert("votes".into(), Value::from(votes));
    fields
}

fn voter_fields(uid: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("userId".into(), Value::String(uid.into()));
    fields
}

pub async fn create_poll<S>(store: &S, ctx: &SessionContext, draft: &PollDraft) -> Result<String>
where
    S: DocumentStore + ?Sized,
{
    draft.validate()?;
    let session = ctx.require()?;

    let question = draft.question.trim();
    let options: Vec<String> = draft.options.iter().map(|o| o.trim().to_string()).collect();
    let id = store
        .add(&paths::polls(), Poll::fields(question, &options, session.uid()))
        .await?;
    for (i, label) in options.iter().enumerate() {
        store
            .write(&paths::poll_option(&id, i), option_fields(label, 0), WriteOptions::replace())
            .await?;
    }
    tracing::info!(%id, options = options.len(), "poll created");
    Ok(id)
}

/// Every readable poll; documents that fail to decode are skipped.
pub async fn list_polls<S>(store: &S) -> Result<Vec<Poll>>
where
    S: DocumentStore + ?Sized,
{
    let docs = store.read_many(&paths::polls(), None).await?;
    Ok(docs
        .iter()
        .filter_map(|doc| match Poll::from_document(doc) {
            Ok(poll) => Some(poll),
            Err(err) => {
                tracing::warn!(id = %doc.id, error = %err, "skipping malformed poll");
                None
            }
        })
        .collect())
}

/// Removes a poll with its cached option counts. Admins only.
pub async fn delete_poll<S>(store: &S, ctx: &SessionContext, admins: &[String], poll: &Poll) -> Result<()>
where
    S: DocumentStore + ?Sized,
{
    let session = ctx.require()?;
    if !admins.iter().any(|admin| admin == session.uid()) {
        return Err(FeedError::Forbidden("only admins may delete polls".into()));
    }
    for i in 0..poll.options.len() {
        store.delete(&paths::poll_option(&poll.id, i)).await?;
    }
    store.delete(&paths::poll(&poll.id)).await?;
    tracing::info!(id = %poll.id, "poll deleted");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionTally {
    pub label: String,
    pub votes: u64,
    /// Rounded share of all votes, 0 when nobody voted.
    pub percentage: u8,
}

pub struct PollController {
    store: StoreHandle,
    poll: Poll,
    tallies: Vec<OptionTally>,
    choice: Option<usize>,
}

impl PollController {
    pub fn new(store: StoreHandle, poll: Poll) -> Self {
        let tallies = poll
            .options
            .iter()
            .map(|label| OptionTally {
                label: label.clone(),
                votes: 0,
                percentage: 0,
            })
            .collect();
        Self {
            store,
            poll,
            tallies,
            choice: None,
        }
    }

    pub fn poll(&self) -> &Poll {
        &self.poll
    }

    pub fn tallies(&self) -> &[OptionTally] {
        &self.tallies
    }

    /// The option the signed-in user picked, as of the last refresh.
    pub fn choice(&self) -> Option<usize> {
        self.choice
    }

    pub fn total_votes(&self) -> u64 {
        self.tallies.iter().map(|t| t.votes).sum()
    }

    pub async fn refresh(&mut self, ctx: &SessionContext) -> Result<&[OptionTally]> {
        let uid = ctx.current().map(|s| s.uid().to_string());
        let mut counts = Vec::with_capacity(self.poll.options.len());
        let mut choice = None;

        for i in 0..self.poll.options.len() {
            let voters = self
                .store
                .read_many(&paths::poll_voters(&self.poll.id, i), None)
                .await?;
            if choice.is_none() && uid.as_deref().is_some_and(|me| voters.iter().any(|v| v.id == me)) {
                choice = Some(i);
            }
            counts.push(voters.len() as u64);
        }

        let total: u64 = counts.iter().sum();
        self.tallies = self
            .poll
            .options
            .iter()
            .zip(counts)
            .map(|(label, votes)| OptionTally {
                label: label.clone(),
                votes,
                percentage: percentage(votes, total),
            })
            .collect();
        self.choice = choice;
        Ok(&self.tallies)
    }

    /// Picks `option`, moving an earlier pick. Picking the held option again
    /// withdraws it. Returns the resulting choice.
    pub async fn vote(&mut self, ctx: &SessionContext, option: usize) -> Result<Option<usize>> {
        let session = ctx.require()?;
        if option >= self.poll.options.len() {
            return Err(ValidationError::new(Field::PollOption(option), Reason::OutOfRange).into());
        }

        self.refresh(ctx).await?;
        let uid = session.uid();
        let previous = self.choice;
        if let Some(held) = previous {
            self.store
                .delete(&paths::poll_voter(&self.poll.id, held, uid))
                .await?;
        }
        if previous != Some(option) {
            self.store
                .write(
                    &paths::poll_voter(&self.poll.id, option, uid),
                    voter_fields(uid),
                    WriteOptions::replace(),
                )
                .await?;
        }

        self.refresh(ctx).await?;
        self.write_cached_counts().await;
        tracing::debug!(poll = %self.poll.id, ?previous, choice = ?self.choice, "poll vote recorded");
        Ok(self.choice)
    }

    async fn write_cached_counts(&self) {
        for (i, tally) in self.tallies.iter().enumerate() {
            let written = self
                .store
                .write(
                    &paths::poll_option(&self.poll.id, i),
                    option_fields(&tally.label, tally.votes),
                    WriteOptions::merge(),
                )
                .await;
            if let Err(err) = written {
                tracing::warn!(poll = %self.poll.id, option = i, error = %err, "cached count not updated");
            }
        }
    }
}

fn percentage(votes: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((votes as f64 / total as f64) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(question: &str, options: &[&str]) -> PollDraft {
        PollDraft {
            question: question.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[test]
    fn option_count_bounds() {
        assert_eq!(
            draft("q", &["a"]).validate().unwrap_err().reason,
            Reason::TooFewOptions { min: 2 }
        );
        assert_eq!(
            draft("q", &["a", "b", "c", "d", "e", "f"]).validate().unwrap_err().reason,
            Reason::TooManyOptions { max: 5 }
        );
        assert_eq!(
            draft("q", &["a", " "]).validate().unwrap_err().field,
            Field::PollOption(1)
        );
        assert!(draft("q", &["a", "b"]).validate().is_ok());
        assert_eq!(draft("", &["a", "b"]).validate().unwrap_err().field, Field::Question);
    }

    #[test]
    fn percentages_round() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(0, 0), 0);
    }
}
