//! One spool manager worker: dequeue, resolve, process, settle.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use courier_common::{Mail, MailId, Signal, State, internal, outgoing};
use courier_pipeline::ProcessingError;
use courier_queue::{Lease, retry::calculate_backoff};
use courier_tracing::traced;
use futures_util::FutureExt;
use tokio::{sync::broadcast, time::Instant};

use crate::{config::ManagerConfig, context::SpoolContext};

/// Set on a mail once it has been sent to the error processor for looping
pub const LOOP_DETECTED: &str = "courier.loop-detected";

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

/// What one pass through the pipeline produced
enum Pass {
    Streams(Vec<Mail>),
    /// The mail cannot be processed any further
    Fatal(Mail, ProcessingError),
}

pub(crate) struct Worker {
    id: usize,
    context: SpoolContext,
    config: Arc<ManagerConfig>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic"))
}

impl Worker {
    pub(crate) const fn new(id: usize, context: SpoolContext, config: Arc<ManagerConfig>) -> Self {
        Self {
            id,
            context,
            config,
        }
    }

    pub(crate) async fn run(self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Worker {} starting", self.id);
        let mut failures = 0u32;

        loop {
            match self.context.queue().dequeue(&mut shutdown).await {
                Ok(Some(lease)) => {
                    failures = 0;
                    self.handle(lease).await;
                }
                Ok(None) => break,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let pause = calculate_backoff(
                        failures,
                        self.config.dequeue_backoff_base_ms,
                        self.config.dequeue_backoff_max_ms,
                        0.0,
                    );
                    internal!(
                        level = WARN,
                        "Worker {} failed to dequeue: {err}, retrying in {pause:?}",
                        self.id
                    );

                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(pause) => {}
                    }
                }
            }
        }

        internal!("Worker {} stopped", self.id);
    }

    /// Process one leased mail, keeping the lease alive until it is settled
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(worker = self.id, id = %lease.id(), attempts = lease.attempts())), timing(precision = "ms"))]
    async fn handle(&self, lease: Lease) {
        let pass = AssertUnwindSafe(self.process(lease.mail().clone())).catch_unwind();
        tokio::pin!(pass);

        let every = (self.context.queue().visibility_timeout() / 2).max(MIN_RENEW_INTERVAL);
        let mut renewal = tokio::time::interval_at(Instant::now() + every, every);

        let outcome = loop {
            tokio::select! {
                outcome = &mut pass => break outcome,
                _ = renewal.tick() => {
                    if let Err(err) = lease.renew() {
                        internal!(level = WARN, "Unable to renew lease: {err}");
                    }
                }
            }
        };

        match outcome {
            Ok(Pass::Streams(streams)) => self.settle(lease, streams).await,
            Ok(Pass::Fatal(mail, err)) => self.retire(lease, mail, &err.to_string()).await,
            Err(panic) => {
                let reason = format!("processing panicked: {}", panic_message(&*panic));
                self.fail(lease, &reason).await;
            }
        }
    }

    /// Record a hop, detect loops, resolve the processor and run it
    async fn process(&self, mut mail: Mail) -> Pass {
        let processors = self.context.processors();
        let hops = mail.record_hop();

        if hops > processors.max_hops() {
            let err = ProcessingError::LoopDetected {
                id: *mail.id(),
                hops,
            };
            if mail.state().is_error() || mail.attribute(LOOP_DETECTED).is_some() {
                return Pass::Fatal(mail, err);
            }

            internal!(
                level = WARN,
                "{} in state '{}': {err}, escalating to the error processor",
                mail.id(),
                mail.state()
            );
            mail.set_attribute(LOOP_DETECTED, true);
            mail.set_error_message(err.to_string());
            mail.set_state(State::error());
        }

        let processor = if let Some(processor) = processors.resolve(mail.state()) {
            processor
        } else {
            let err = ProcessingError::UnknownState {
                id: *mail.id(),
                state: mail.state().to_string(),
            };
            if mail.state().is_error() {
                return Pass::Fatal(mail, err);
            }

            internal!(level = ERROR, "{}: {err}", mail.id());
            mail.set_error_message(err.to_string());
            mail.set_state(State::error());

            match processors.resolve(mail.state()) {
                Some(processor) => processor,
                None => return Pass::Fatal(mail, err),
            }
        };

        Pass::Streams(processor.process(mail, &self.context).await)
    }

    /// Queue every live stream, forks first, then acknowledge the lease.
    ///
    /// The stream carrying the original id goes last so its stored record is
    /// untouched if an earlier enqueue fails and the lease is nacked. Forks
    /// already queued by then are withdrawn again; any a worker has picked up
    /// meanwhile are overwritten by the retry, which derives the same ids.
    async fn settle(&self, lease: Lease, streams: Vec<Mail>) {
        let original = *lease.id();
        let queue = self.context.queue();

        let (originals, forks): (Vec<Mail>, Vec<Mail>) = streams
            .into_iter()
            .partition(|stream| stream.id() == &original);

        let mut retained = false;
        let mut queued = Vec::new();
        for stream in forks.into_iter().chain(originals) {
            if stream.is_ghost() {
                if stream.id() != &original
                    && let Err(err) = queue.repository().remove_if_present(stream.id()).await
                {
                    internal!(level = WARN, "Unable to remove ghost {}: {err}", stream.id());
                }
                outgoing!(level = DEBUG, "{} finished", stream.id());
                continue;
            }

            if let Err(err) = queue.enqueue(&stream, Duration::ZERO).await {
                let reason = format!("unable to queue {} for '{}': {err}", stream.id(), stream.state());
                self.withdraw(&queued).await;
                self.fail(lease, &reason).await;
                return;
            }

            internal!(
                level = DEBUG,
                "{} queued for '{}' with [{}]",
                stream.id(),
                stream.state(),
                stream.recipients()
            );
            if stream.id() == &original {
                retained = true;
            } else {
                queued.push(*stream.id());
            }
        }

        let settled = if retained {
            lease.ack_retaining_record()
        } else {
            lease.ack().await
        };

        if let Err(err) = settled {
            internal!(level = WARN, "Unable to acknowledge {original}: {err}");
        }
    }

    async fn withdraw(&self, forks: &[MailId]) {
        for id in forks {
            match self.context.queue().withdraw(id).await {
                Ok(true) => internal!(level = DEBUG, "Withdrew {id} from the queue"),
                Ok(false) => {}
                Err(err) => internal!(level = WARN, "Unable to withdraw {id}: {err}"),
            }
        }
    }

    /// Retry after a backoff, or dead-letter once the attempts are spent
    async fn fail(&self, lease: Lease, reason: &str) {
        let retry = &self.config.retry;
        let attempts = lease.attempts().saturating_add(1);

        if retry.should_retry(attempts) {
            let delay = retry.backoff(lease.attempts());
            internal!(
                level = WARN,
                "Attempt {attempts} of {} for {} failed: {reason}, retrying in {delay:?}",
                retry.max_attempts,
                lease.id()
            );

            if let Err(err) = lease.nack(delay) {
                internal!(level = WARN, "Unable to return mail to the queue: {err}");
            }
            return;
        }

        let mail = lease.mail().clone();
        self.retire(lease, mail, &format!("gave up after {attempts} attempts: {reason}"))
            .await;
    }

    /// Move `mail` to the dead-letter repository and acknowledge the lease.
    /// If that fails the mail stays queued.
    async fn retire(&self, lease: Lease, mail: Mail, reason: &str) {
        let id = *lease.id();
        match self.context.dead_letter(mail, reason).await {
            Ok(()) => {
                if let Err(err) = lease.ack().await {
                    internal!(level = WARN, "Unable to acknowledge {id}: {err}");
                }
            }
            Err(err) => {
                let delay = self.config.retry.backoff(lease.attempts());
                internal!(
                    level = ERROR,
                    "{err}, keeping {id} queued and retrying in {delay:?}"
                );
                if let Err(err) = lease.nack(delay) {
                    internal!(level = WARN, "Unable to return mail to the queue: {err}");
                }
            }
        }
    }
}
