//! Administrative operations over the whole queue.
//!
//! Only free entries are touched; a mail currently leased by a worker is left
//! for that worker to settle.

use std::fmt::{self, Display};

use courier_common::{MailId, internal};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    error::QueueError,
    queue::{Entry, MailQueue},
};

/// What [`MailQueue::remove`] compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// The mail id, in full or by lineage root
    Name,
    /// The envelope sender; `<>` selects the null sender
    Sender,
    /// Any envelope recipient
    Recipient,
}

impl Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("name"),
            Self::Sender => f.write_str("sender"),
            Self::Recipient => f.write_str("recipient"),
        }
    }
}

impl MatchKind {
    fn matches(self, entry: &Entry, value: &str) -> bool {
        match self {
            Self::Name => entry.id.matches_name(value),
            Self::Sender => match &entry.sender {
                None => value.trim() == "<>",
                Some(sender) => sender.matches(value),
            },
            Self::Recipient => entry.recipients.iter().any(|rcpt| rcpt.matches(value)),
        }
    }
}

/// Point-in-time counts, for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub ready: usize,
    pub delayed: usize,
    pub leased: usize,
}

impl MailQueue {
    /// Number of entries, leased or not
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.inner.lock().entries.len()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let now = Instant::now();
        let inner = self.shared.inner.lock();

        inner
            .entries
            .values()
            .fold(QueueStats::default(), |mut stats, entry| {
                stats.total += 1;
                if !entry.is_free() {
                    stats.leased += 1;
                } else if entry.ready_at <= now {
                    stats.ready += 1;
                } else {
                    stats.delayed += 1;
                }
                stats
            })
    }

    /// Make every free entry visible immediately, returning how many changed
    pub fn flush(&self) -> usize {
        let now = Instant::now();
        let flushed = {
            let mut inner = self.shared.inner.lock();
            let seqs: Vec<u64> = inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_free() && entry.ready_at > now)
                .map(|(seq, _)| *seq)
                .collect();

            for seq in &seqs {
                inner.update(*seq, |entry| entry.ready_at = now);
            }
            seqs.len()
        };

        if flushed > 0 {
            self.wake();
        }

        internal!(level = INFO, "Flushed {flushed} queued mails");
        flushed
    }

    /// Remove every free entry and its record, returning how many went
    ///
    /// # Errors
    /// If a record cannot be removed from the repository
    pub async fn clear(&self) -> Result<usize, QueueError> {
        self.remove_where(|_| true).await
    }

    /// Remove the free entries matching `value` under `kind`, with their
    /// records, returning how many went
    ///
    /// # Errors
    /// If a record cannot be removed from the repository
    pub async fn remove(&self, kind: MatchKind, value: &str) -> Result<usize, QueueError> {
        let removed = self
            .remove_where(|entry| kind.matches(entry, value))
            .await?;

        internal!(level = INFO, "Removed {removed} queued mails by {kind} '{value}'");
        Ok(removed)
    }

    /// Remove the free entry queued for exactly `id`, with its record,
    /// returning whether there was one
    ///
    /// # Errors
    /// If the record cannot be removed from the repository
    pub async fn withdraw(&self, id: &MailId) -> Result<bool, QueueError> {
        Ok(self.remove_where(|entry| &entry.id == id).await? > 0)
    }

    /// Claims the matching free entries, then removes each record before its
    /// entry. On a repository failure the unprocessed entries are handed back
    /// untouched.
    async fn remove_where(&self, predicate: impl Fn(&Entry) -> bool) -> Result<usize, QueueError> {
        let deadline = Instant::now() + self.shared.visibility_timeout;
        let claimed: Vec<(u64, u64, MailId)> = {
            let mut inner = self.shared.inner.lock();
            let seqs: Vec<u64> = inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_free() && predicate(entry))
                .map(|(seq, _)| *seq)
                .collect();

            seqs.into_iter()
                .filter_map(|seq| {
                    let token = inner.claim(seq, deadline)?;
                    inner.entries.get(&seq).map(|entry| (seq, token, entry.id))
                })
                .collect()
        };

        let mut removed = 0;
        for (index, (seq, token, id)) in claimed.iter().enumerate() {
            if let Err(err) = self.shared.repository.remove_if_present(id).await {
                {
                    let mut inner = self.shared.inner.lock();
                    for (seq, token, _) in &claimed[index..] {
                        inner.unclaim(*seq, *token);
                    }
                }
                self.wake();

                internal!(
                    level = WARN,
                    "Removed {removed} of {} queued mails before the repository failed: {err}",
                    claimed.len()
                );
                return Err(err.into());
            }

            let mut inner = self.shared.inner.lock();
            if inner.holds(*seq, *token) {
                inner.remove(*seq);
                removed += 1;
            }
        }

        Ok(removed)
    }
}
