use std::sync::Arc;

use courier_common::{Signal, internal};
use courier_tracing::traced;
use tokio::{sync::broadcast, task::JoinSet, time::Instant};

use crate::{config::ManagerConfig, context::SpoolContext, error::Result, worker::Worker};

/// Fixed pool of workers driving queued mail through the pipeline
#[derive(Debug, Clone)]
pub struct SpoolManager {
    context: SpoolContext,
    config: Arc<ManagerConfig>,
}

impl SpoolManager {
    pub fn new(context: SpoolContext, config: ManagerConfig) -> Self {
        Self {
            context,
            config: Arc::new(config),
        }
    }

    #[inline]
    pub const fn context(&self) -> &SpoolContext {
        &self.context
    }

    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    ///
    /// Recover persisted mail, then run the workers until shutdown
    ///
    /// On [`Signal::Shutdown`] workers stop taking new mail and finish what
    /// they hold. Anything still running after the shutdown timeout is
    /// abandoned; its lease expires and the mail is processed again after a
    /// restart.
    ///
    /// # Errors
    /// If the queue cannot be recovered from its repository
    ///
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let recovered = self.context.queue().recover().await?;
        internal!(
            level = INFO,
            "Spool manager starting {} workers ({recovered} mails recovered)",
            self.config.workers
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            let worker = Worker::new(id, self.context.clone(), Arc::clone(&self.config));
            workers.spawn(worker.run(shutdown.resubscribe()));
        }

        let mut deadline: Option<Instant> = None;
        loop {
            let expired = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Err(err)) => internal!(level = ERROR, "Worker exited abnormally: {err}"),
                    Some(Ok(())) => {}
                },
                sig = shutdown.recv(), if deadline.is_none() => {
                    internal!(level = INFO, "Spool manager received {sig:?}, waiting for in-flight mail");
                    deadline = Some(Instant::now() + self.config.shutdown_timeout());
                }
                () = expired => {
                    internal!(
                        level = WARN,
                        "Shutdown timeout exceeded, abandoning {} workers; their mail is redelivered after restart",
                        workers.len()
                    );
                    workers.abort_all();
                    break;
                }
            }
        }

        internal!(level = INFO, "Spool manager stopped");
        Ok(())
    }
}
