use std::time::Duration;

use courier_common::{Mail, MailId, internal};
use tokio::time::Instant;

use crate::{error::QueueError, queue::MailQueue};

/// Exclusive, time-limited claim on one queued mail.
///
/// Settle it with [`Lease::ack`], [`Lease::ack_retaining_record`] or
/// [`Lease::nack`]. Dropping it unsettled leaves the entry leased until the
/// visibility timeout passes, after which the mail is redelivered.
#[derive(Debug)]
pub struct Lease {
    queue: MailQueue,
    seq: u64,
    token: u64,
    attempts: u32,
    mail: Mail,
}

impl Lease {
    pub(crate) const fn new(queue: MailQueue, seq: u64, token: u64, attempts: u32, mail: Mail) -> Self {
        Self {
            queue,
            seq,
            token,
            attempts,
            mail,
        }
    }

    #[inline]
    pub const fn id(&self) -> &MailId {
        self.mail.id()
    }

    /// Failed attempts recorded against this mail before this lease
    #[inline]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The mail as loaded from the repository when the lease was granted
    #[inline]
    pub const fn mail(&self) -> &Mail {
        &self.mail
    }

    fn lost(&self) -> QueueError {
        QueueError::LeaseLost(*self.mail.id())
    }

    /// Finish the mail: remove its entry and its repository record
    ///
    /// # Errors
    /// - [`QueueError::LeaseLost`] if another worker holds the mail now
    /// - [`QueueError::Persistence`] if the record could not be removed
    pub async fn ack(self) -> Result<(), QueueError> {
        let latest = {
            let mut inner = self.queue.shared.inner.lock();
            if !inner.holds(self.seq, self.token) {
                return Err(self.lost());
            }
            inner.remove(self.seq);
            inner.is_latest(self.seq, self.mail.id())
        };

        // A newer entry for the same id still needs the record
        if latest {
            self.queue
                .shared
                .repository
                .remove_if_present(self.mail.id())
                .await?;
        }

        internal!(level = DEBUG, "Acknowledged {}", self.mail.id());
        Ok(())
    }

    /// Remove the entry but keep the repository record, because the same id
    /// has just been enqueued again
    ///
    /// # Errors
    /// [`QueueError::LeaseLost`] if another worker holds the mail now
    pub fn ack_retaining_record(self) -> Result<(), QueueError> {
        let mut inner = self.queue.shared.inner.lock();
        if !inner.holds(self.seq, self.token) {
            return Err(self.lost());
        }
        inner.remove(self.seq);
        drop(inner);

        internal!(level = DEBUG, "Acknowledged {} (record retained)", self.mail.id());
        Ok(())
    }

    /// Give the mail back, visible again after `delay`, counting a failed
    /// attempt
    ///
    /// # Errors
    /// [`QueueError::LeaseLost`] if another worker holds the mail now
    pub fn nack(self, delay: Duration) -> Result<(), QueueError> {
        let ready_at = Instant::now() + delay;
        {
            let mut inner = self.queue.shared.inner.lock();
            if !inner.holds(self.seq, self.token) {
                return Err(self.lost());
            }

            if inner.is_latest(self.seq, self.mail.id()) {
                inner.update(self.seq, |entry| {
                    entry.lease = None;
                    entry.ready_at = ready_at;
                    entry.attempts = entry.attempts.saturating_add(1);
                });
            } else {
                // A newer entry for this id already carries the mail forward
                inner.remove(self.seq);
            }
        }

        self.queue.wake();
        internal!(
            level = DEBUG,
            "Returned {} to the queue, visible in {delay:?}",
            self.mail.id()
        );
        Ok(())
    }

    /// Push the lease deadline out by one visibility timeout
    ///
    /// # Errors
    /// [`QueueError::LeaseLost`] if another worker holds the mail now
    pub fn renew(&self) -> Result<(), QueueError> {
        let deadline = Instant::now() + self.queue.shared.visibility_timeout;
        let token = self.token;

        let mut inner = self.queue.shared.inner.lock();
        if !inner.holds(self.seq, token) {
            return Err(self.lost());
        }

        inner.update(self.seq, |entry| {
            if let Some(lease) = entry.lease.as_mut() {
                lease.deadline = deadline;
            }
        });

        Ok(())
    }
}
