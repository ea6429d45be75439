//! Proposal based lock over any [`Storage`].
//!
//! # How It Works
//!
//! 1. `acquire` writes the contender's proposal under the target's proposal
//!    root. The value is empty (no expiration) or an RFC 3339 instant.
//! 2. All proposals under the root are listed. Entries that vanished since the
//!    listing and entries whose expiration has passed are ignored.
//! 3. Any other live proposal means contention: the own proposal is deleted
//!    and [`StashError::LockBusy`] is returned.
//! 4. `release` deletes the own proposal and tolerates it being gone.
//!
//! There is no compare-and-swap involved, so two contenders racing between
//! steps 1 and 2 may both back off. Retrying is left to [`super::RetryLock`].

use super::Lock;
use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use ulid::Ulid;

/// Reserved top-level segment holding lock proposals.
///
/// Proposals for target `t` live at `.stash-locks/<t>/<contender>`. Data keys
/// must not use this segment.
pub const LOCKS_ROOT: &str = ".stash-locks";

pub struct StorageLock {
    proposals: Proposals,
    contender: String,
    expiration: Option<DateTime<Utc>>,
}

impl StorageLock {
    pub fn new(storage: Arc<dyn Storage>, target: Key) -> Self {
        Self {
            proposals: Proposals { storage, target },
            contender: Ulid::new().to_string(),
            expiration: None,
        }
    }

    /// Makes the proposal stale for other contenders after `expiration`.
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Replaces the generated contender id. The id becomes one key segment,
    /// so it must be non-empty and free of `/`.
    pub fn with_contender(mut self, contender: impl Into<String>) -> Result<Self> {
        let contender = contender.into();
        Key::from_parts([contender.as_str()])?;
        self.contender = contender;
        Ok(self)
    }

    pub fn contender(&self) -> &str {
        &self.contender
    }

    pub fn target(&self) -> &Key {
        &self.proposals.target
    }
}

#[async_trait]
impl Lock for StorageLock {
    async fn acquire(&self) -> Result<()> {
        self.proposals.create(&self.contender, self.expiration).await?;

        if let Err(error) = self.proposals.check_single(&self.contender).await {
            if let Err(rollback) = self.proposals.delete(&self.contender).await {
                if !rollback.is_not_found() {
                    tracing::warn!(
                        "Failed to roll back proposal {} for '{}': {}",
                        self.contender,
                        self.proposals.target,
                        rollback
                    );
                }
            }
            return Err(error);
        }

        tracing::debug!(
            "Lock on '{}' acquired by {}",
            self.proposals.target,
            self.contender
        );
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        match self.proposals.delete(&self.contender).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

struct Proposals {
    storage: Arc<dyn Storage>,
    target: Key,
}

impl Proposals {
    fn root(&self) -> Result<Key> {
        Ok(Key::from_parts([LOCKS_ROOT])?.join(&self.target))
    }

    fn proposal_key(&self, contender: &str) -> Result<Key> {
        Ok(self.root()?.join(&Key::from_parts([contender])?))
    }

    async fn create(&self, contender: &str, expiration: Option<DateTime<Utc>>) -> Result<()> {
        let value = expiration
            .map(|instant| Content::from(instant.to_rfc3339_opts(SecondsFormat::Millis, true)))
            .unwrap_or_else(Content::empty);
        self.storage.save(&self.proposal_key(contender)?, value).await
    }

    /// Fails with [`StashError::LockBusy`] if any other live proposal exists.
    async fn check_single(&self, contender: &str) -> Result<()> {
        let now = Utc::now();
        let root = self.root()?;
        let own = self.proposal_key(contender)?;

        for proposal in self.storage.list(&root).await? {
            // the listing is by string prefix, so it may include other targets
            if proposal == own || proposal.parent().as_ref() != Some(&root) {
                continue;
            }
            let Some(expiration) = self.value_if_present(&proposal).await? else {
                continue;
            };
            if is_active(&proposal, &expiration, now)? {
                tracing::debug!(
                    "Lock on '{}' is busy for {}: live proposal {} ('{}')",
                    self.target,
                    contender,
                    proposal,
                    expiration
                );
                return Err(StashError::LockBusy(self.target.clone()));
            }
        }
        Ok(())
    }

    async fn delete(&self, contender: &str) -> Result<()> {
        self.storage.delete(&self.proposal_key(contender)?).await
    }

    /// Reads a listed proposal; entries deleted since the listing read as None.
    async fn value_if_present(&self, key: &Key) -> Result<Option<String>> {
        let content = match self.storage.value(key).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        match content.text().await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Only an exactly empty value means "never expires". Anything else,
/// whitespace included, must be an RFC 3339 instant.
fn is_active(proposal: &Key, expiration: &str, now: DateTime<Utc>) -> Result<bool> {
    if expiration.is_empty() {
        return Ok(true);
    }
    let instant = DateTime::parse_from_rfc3339(expiration).map_err(|e| {
        StashError::Backend(format!(
            "malformed expiration '{}' in lock proposal {}: {}",
            expiration, proposal, e
        ))
    })?;
    Ok(instant.with_timezone(&Utc) > now)
}
