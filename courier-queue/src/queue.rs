use std::{collections::BTreeSet, sync::Arc, time::Duration};

use ahash::AHashMap;
use courier_common::{Mail, MailAddress, MailId, Recipients, Signal, internal};
use courier_spool::MailRepository;
use courier_tracing::traced;
use parking_lot::Mutex;
use tokio::{
    sync::{
        Notify,
        broadcast::{self, error::TryRecvError},
    },
    time::Instant,
};

use crate::{
    config::QueueConfig,
    error::{DequeueError, EnqueueError, QueueError},
    lease::Lease,
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseState {
    pub(crate) token: u64,
    pub(crate) deadline: Instant,
}

/// One queued reference to a stored mail.
///
/// Sender and recipients are copied in so the management operations can match
/// on them without loading every record.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) id: MailId,
    pub(crate) sender: Option<MailAddress>,
    pub(crate) recipients: Recipients,
    pub(crate) ready_at: Instant,
    pub(crate) attempts: u32,
    pub(crate) lease: Option<LeaseState>,
}

impl Entry {
    fn new(mail: &Mail, ready_at: Instant) -> Self {
        Self {
            id: *mail.id(),
            sender: mail.sender().cloned(),
            recipients: mail.recipients().clone(),
            ready_at,
            attempts: 0,
            lease: None,
        }
    }

    /// Free entries become eligible at `ready_at`, leased ones when the lease
    /// runs out
    fn due_at(&self) -> Instant {
        self.lease.map_or(self.ready_at, |lease| lease.deadline)
    }

    pub(crate) const fn is_free(&self) -> bool {
        self.lease.is_none()
    }
}

pub(crate) enum Next {
    Leased {
        seq: u64,
        token: u64,
        id: MailId,
        attempts: u32,
        expired: bool,
    },
    Idle(Option<Instant>),
}

/// Queue bookkeeping, always accessed under one lock.
///
/// `schedule` orders entries by `(due time, sequence)`, which gives the
/// earliest-visible entry first and enqueue order among equals.
#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) entries: AHashMap<u64, Entry>,
    schedule: BTreeSet<(Instant, u64)>,
    by_id: AHashMap<MailId, u64>,
    next_seq: u64,
    next_token: u64,
}

impl Inner {
    fn insert(&mut self, entry: Entry) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.schedule.insert((entry.due_at(), seq));
        self.by_id.insert(entry.id, seq);
        self.entries.insert(seq, entry);

        seq
    }

    pub(crate) fn remove(&mut self, seq: u64) -> Option<Entry> {
        let entry = self.entries.remove(&seq)?;
        self.schedule.remove(&(entry.due_at(), seq));
        if self.by_id.get(&entry.id) == Some(&seq) {
            self.by_id.remove(&entry.id);
        }
        Some(entry)
    }

    pub(crate) fn update(&mut self, seq: u64, change: impl FnOnce(&mut Entry)) -> bool {
        let Some(entry) = self.entries.get_mut(&seq) else {
            return false;
        };

        self.schedule.remove(&(entry.due_at(), seq));
        change(entry);
        self.schedule.insert((entry.due_at(), seq));
        true
    }

    /// The free entry currently queued for `id`, if any
    fn free_entry_for(&self, id: &MailId) -> Option<u64> {
        self.by_id
            .get(id)
            .copied()
            .filter(|seq| self.entries.get(seq).is_some_and(Entry::is_free))
    }

    /// Checks that `token` still holds the lease on `seq`
    pub(crate) fn holds(&self, seq: u64, token: u64) -> bool {
        self.entries
            .get(&seq)
            .and_then(|entry| entry.lease)
            .is_some_and(|lease| lease.token == token)
    }

    pub(crate) fn is_latest(&self, seq: u64, id: &MailId) -> bool {
        self.by_id.get(id).is_none_or(|latest| *latest == seq)
    }

    fn lease_next(&mut self, now: Instant, visibility_timeout: Duration) -> Next {
        let Some(&(due, seq)) = self.schedule.first() else {
            return Next::Idle(None);
        };

        if due > now {
            return Next::Idle(Some(due));
        }

        let token = self.next_token;
        self.next_token += 1;

        let mut expired = false;
        self.update(seq, |entry| {
            if entry.lease.is_some() {
                // Previous holder never settled: count it as a failed attempt
                entry.attempts = entry.attempts.saturating_add(1);
                expired = true;
            }
            entry.lease = Some(LeaseState {
                token,
                deadline: now + visibility_timeout,
            });
        });

        match self.entries.get(&seq) {
            Some(entry) => Next::Leased {
                seq,
                token,
                id: entry.id,
                attempts: entry.attempts,
                expired,
            },
            None => Next::Idle(None),
        }
    }

    /// Leases a free entry to the queue itself so no worker picks it up while
    /// an administrative operation works on it
    pub(crate) fn claim(&mut self, seq: u64, deadline: Instant) -> Option<u64> {
        if !self.entries.get(&seq).is_some_and(Entry::is_free) {
            return None;
        }

        let token = self.next_token;
        self.next_token += 1;
        self.update(seq, |entry| entry.lease = Some(LeaseState { token, deadline }));
        Some(token)
    }

    /// Gives back a [`claim`](Self::claim) without counting an attempt
    pub(crate) fn unclaim(&mut self, seq: u64, token: u64) {
        if self.holds(seq, token) {
            self.update(seq, |entry| entry.lease = None);
        }
    }

    /// Drops a lease without settling it, making the entry visible again now
    fn release(&mut self, seq: u64, token: u64, now: Instant) {
        if self.holds(seq, token) {
            self.update(seq, |entry| {
                entry.lease = None;
                entry.ready_at = now;
            });
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) notify: Notify,
    pub(crate) repository: MailRepository,
    pub(crate) visibility_timeout: Duration,
}

/// Durable producer/consumer queue of mail
///
/// Mail content lives in the backing [`MailRepository`]; the queue keeps a
/// lightweight entry per mail with its ready time, attempt counter and lease.
/// Cloning is cheap and every clone refers to the same queue.
///
/// A mail is stored in the repository before its entry becomes visible, and
/// its record is only removed once a worker acknowledges it. A worker that
/// dies mid-flight simply lets its lease expire, after which the same mail is
/// handed out again.
#[derive(Debug, Clone)]
pub struct MailQueue {
    pub(crate) shared: Arc<Shared>,
}

impl MailQueue {
    pub fn new(repository: MailRepository, config: &QueueConfig) -> Self {
        Self::with_visibility_timeout(repository, config.visibility_timeout())
    }

    pub fn with_visibility_timeout(repository: MailRepository, visibility_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                notify: Notify::new(),
                repository,
                visibility_timeout,
            }),
        }
    }

    #[inline]
    pub fn repository(&self) -> &MailRepository {
        &self.shared.repository
    }

    #[inline]
    pub fn visibility_timeout(&self) -> Duration {
        self.shared.visibility_timeout
    }

    pub(crate) fn wake(&self) {
        self.shared.notify.notify_waiters();
    }

    /// Store `mail` and make it visible to workers after `delay`
    ///
    /// If a free entry for the same id is already queued it is rescheduled
    /// rather than duplicated.
    ///
    /// # Errors
    /// - [`EnqueueError::Invalid`] for a ghost mail
    /// - [`EnqueueError::Persistence`] if the mail cannot be stored
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, mail), fields(id = %mail.id(), state = %mail.state())), timing(precision = "us"))]
    pub async fn enqueue(&self, mail: &Mail, delay: Duration) -> Result<(), EnqueueError> {
        if mail.is_ghost() {
            return Err(EnqueueError::Invalid {
                id: *mail.id(),
                reason: String::from("ghost mail is finished and cannot be queued"),
            });
        }

        self.shared.repository.store(mail).await?;

        let ready_at = Instant::now() + delay;
        {
            let mut inner = self.shared.inner.lock();
            if let Some(seq) = inner.free_entry_for(mail.id()) {
                inner.update(seq, |entry| {
                    entry.ready_at = ready_at;
                    entry.sender = mail.sender().cloned();
                    entry.recipients = mail.recipients().clone();
                });
            } else {
                inner.insert(Entry::new(mail, ready_at));
            }
        }

        self.wake();
        Ok(())
    }

    /// Wait for the next visible mail and lease it
    ///
    /// Returns `Ok(None)` as soon as a shutdown signal is observed.
    ///
    /// # Errors
    /// [`DequeueError::Backend`] if the repository fails while loading the
    /// leased mail; the lease is released first.
    pub async fn dequeue(
        &self,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<Option<Lease>, DequeueError> {
        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => return Ok(None),
            }

            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = self
                .shared
                .inner
                .lock()
                .lease_next(Instant::now(), self.shared.visibility_timeout);

            match next {
                Next::Leased {
                    seq,
                    token,
                    id,
                    attempts,
                    expired,
                } => {
                    if expired {
                        internal!(
                            level = WARN,
                            "Lease on {id} expired, redelivering (attempt {attempts})"
                        );
                    }

                    match self.shared.repository.retrieve(&id).await {
                        Ok(mail) => {
                            return Ok(Some(Lease::new(self.clone(), seq, token, attempts, mail)));
                        }
                        Err(err) if err.is_not_found() => {
                            internal!(
                                level = WARN,
                                "Record for {id} vanished from the repository, dropping its entry"
                            );
                            let mut inner = self.shared.inner.lock();
                            if inner.holds(seq, token) {
                                inner.remove(seq);
                            }
                        }
                        Err(source) => {
                            self.shared.inner.lock().release(seq, token, Instant::now());
                            self.wake();
                            return Err(DequeueError::Backend { id, source });
                        }
                    }
                }
                Next::Idle(wake_at) => {
                    let sleep = async move {
                        match wake_at {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    };

                    tokio::select! {
                        _ = shutdown.recv() => return Ok(None),
                        () = &mut notified => {}
                        () = sleep => {}
                    }
                }
            }
        }
    }

    /// Rebuild entries for every record already in the repository
    ///
    /// Run once at startup so mail persisted before a crash or shutdown is
    /// processed again. Records already queued are left alone.
    ///
    /// # Errors
    /// If the repository cannot be listed or a record cannot be read
    #[traced(instrument(level = tracing::Level::INFO, skip(self)), timing(precision = "ms"))]
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let ids = self.shared.repository.list().await?;
        let mut recovered = 0;

        for id in ids {
            if self.shared.inner.lock().by_id.contains_key(&id) {
                continue;
            }

            let mail = match self.shared.repository.retrieve(&id).await {
                Ok(mail) => mail,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            };

            if mail.is_ghost() {
                self.shared.repository.remove_if_present(&id).await?;
                continue;
            }

            self.shared
                .inner
                .lock()
                .insert(Entry::new(&mail, Instant::now()));
            recovered += 1;
        }

        if recovered > 0 {
            internal!(level = INFO, "Recovered {recovered} mails from the repository");
            self.wake();
        }

        Ok(recovered)
    }
}
