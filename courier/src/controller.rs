//! The top-level configuration and the lifecycle of a running instance.

use std::sync::Arc;

use ahash::AHashMap;
use anyhow::Context;
use courier_common::{Signal, internal, logging};
use courier_control::{ControlAuthConfig, ControlServer, DEFAULT_CONTROL_SOCKET};
use courier_manager::{
    Ingest, IngestConfig, ManagerConfig, Management, SpoolContext, SpoolManager,
};
use courier_pipeline::{ComponentRegistry, PipelineConfig};
use courier_queue::{MailQueue, QueueConfig};
use courier_spool::{RepositoryConfig, RepositoryStore};
use courier_tracing::traced;
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::control_handler::CourierControlHandler;

const fn default_control_enabled() -> bool {
    true
}

fn default_socket_path() -> String {
    DEFAULT_CONTROL_SOCKET.to_string()
}

/// Control socket settings
///
/// ```ron
/// control: (
///     socket_path: "/run/courier/control.sock",
///     auth: (enabled: true, token_hashes: ["..."]),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Default: true
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,

    /// Default: `/tmp/courier.sock`
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    #[serde(default)]
    pub auth: ControlAuthConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            socket_path: default_socket_path(),
            auth: ControlAuthConfig::default(),
        }
    }
}

/// Everything a courier instance is configured with, as read from
/// `courier.config.ron`
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    /// Where queued mail is persisted
    #[serde(default)]
    pub spool: RepositoryConfig,

    /// Named repositories mailets can store into. `dead-letter` is kept in
    /// memory unless configured here.
    #[serde(default)]
    pub repositories: AHashMap<String, RepositoryConfig>,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub control: ControlConfig,
}

/// A started instance: the spool manager and, when enabled, the control
/// server, running until [`Running::shutdown`]
pub struct Running {
    context: SpoolContext,
    ingest: Ingest,
    management: Management,
    shutdown: broadcast::Sender<Signal>,
    manager: JoinHandle<courier_manager::Result<()>>,
    control: Option<JoinHandle<courier_control::Result<()>>>,
}

#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    };

    Ok(())
}

impl Courier {
    /// Parse a RON configuration
    ///
    /// # Errors
    /// If the text is not a valid configuration
    pub fn from_ron(config: &str) -> anyhow::Result<Self> {
        ron::from_str(config).context("Invalid configuration")
    }

    /// Build the repositories, the queue and the processors
    ///
    /// # Errors
    /// If a repository cannot be initialised or the pipeline is invalid
    pub fn context(&self, components: &ComponentRegistry) -> anyhow::Result<SpoolContext> {
        let repositories = RepositoryStore::from_config(self.repositories.clone())
            .context("Unable to build repositories")?;
        let spool = self
            .spool
            .clone()
            .into_repository("spool")
            .context("Unable to build the spool repository")?;
        let processors = self
            .pipeline
            .build(components)
            .and_then(|processors| {
                processors.check_repositories(&repositories.names())?;
                Ok(processors)
            })
            .context("Invalid pipeline configuration")?;

        internal!(
            level = INFO,
            "Processors: [{}], repositories: [{}]",
            processors
                .states()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            repositories.names().join(", ")
        );

        Ok(SpoolContext::new(
            MailQueue::new(spool, &self.queue),
            Arc::new(repositories),
            Arc::new(processors),
        ))
    }

    /// Start with the built-in matchers and mailets
    ///
    /// # Errors
    /// See [`Courier::start_with`]
    pub async fn start(self) -> anyhow::Result<Running> {
        self.start_with(&ComponentRegistry::with_builtins()).await
    }

    /// Start the spool manager and the control server, resolving pipeline
    /// components through `components`
    ///
    /// # Errors
    /// If the context cannot be built or the control socket cannot be bound
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "ms"))]
    pub async fn start_with(self, components: &ComponentRegistry) -> anyhow::Result<Running> {
        let context = self.context(components)?;
        let (shutdown, _) = broadcast::channel(16);

        let control = if self.control.enabled {
            let handler = CourierControlHandler::new(
                context.clone(),
                self.ingest.clone(),
                self.manager.workers,
            );
            let server = ControlServer::new(self.control.socket_path.as_str(), Arc::new(handler))?
                .with_auth(self.control.auth.clone());
            let receiver = shutdown.subscribe();
            Some(tokio::spawn(async move { server.serve(receiver).await }))
        } else {
            internal!(level = INFO, "Control socket disabled");
            None
        };

        let manager = SpoolManager::new(context.clone(), self.manager);
        let receiver = shutdown.subscribe();
        let manager = tokio::spawn(async move { manager.serve(receiver).await });

        internal!(level = INFO, "Courier running");

        Ok(Running {
            ingest: Ingest::new(context.clone(), self.ingest),
            management: Management::new(context.clone()),
            context,
            shutdown,
            manager,
            control,
        })
    }

    /// Run until interrupted or terminated
    ///
    /// # Errors
    /// If startup fails or the spool manager stops with an error
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let running = self.start().await?;
        shutdown_signal().await?;
        running.shutdown().await
    }
}

impl Running {
    #[must_use]
    pub const fn context(&self) -> &SpoolContext {
        &self.context
    }

    /// Hand new mail to the pipeline
    #[must_use]
    pub const fn ingest(&self) -> &Ingest {
        &self.ingest
    }

    #[must_use]
    pub const fn management(&self) -> &Management {
        &self.management
    }

    /// Stop taking new work and wait for in-flight mail, up to the manager's
    /// shutdown timeout
    ///
    /// # Errors
    /// If the spool manager stopped with an error or panicked
    pub async fn shutdown(self) -> anyhow::Result<()> {
        internal!(level = INFO, "Shutting down...");
        let _ = self.shutdown.send(Signal::Shutdown);

        let managed = self.manager.await.context("Spool manager panicked")?;

        if let Some(control) = self.control {
            match control.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => internal!(level = ERROR, "Control server failed: {err}"),
                Err(err) => internal!(level = ERROR, "Control server panicked: {err}"),
            }
        }

        let _ = self.shutdown.send(Signal::Finalised);
        managed?;

        internal!(level = INFO, "Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let courier = Courier::from_ron("()").unwrap();

        assert_eq!(courier.spool, RepositoryConfig::default());
        assert!(courier.repositories.is_empty());
        assert_eq!(courier.manager, ManagerConfig::default());
        assert_eq!(courier.pipeline.initial_state.as_str(), "root");
        assert!(courier.control.enabled);
        assert_eq!(courier.control.socket_path, DEFAULT_CONTROL_SOCKET);
        assert!(!courier.control.auth.requires_auth());
    }

    #[test]
    fn test_full_config() {
        let courier = Courier::from_ron(
            r#"(
                spool: File(path: "/var/spool/courier"),
                repositories: {
                    "dead-letter": Memory(capacity: Some(100)),
                    "local": Memory(capacity: None),
                },
                queue: (visibility_timeout_secs: 60),
                manager: (workers: 8, retry: (max_attempts: 3)),
                pipeline: (
                    max_hops: 10,
                    processors: [
                        (name: "root", rules: [(matcher: "HostIs=example.com", mailets: [(name: "ToRepository", config: { "repository": "local" })])]),
                        (name: "error", rules: [(matcher: "All", mailets: [(name: "ToRepository", config: { "repository": "dead-letter" })])]),
                    ],
                ),
                ingest: (max_message_size: 1024),
                control: (enabled: false, socket_path: "/run/courier.sock"),
            )"#,
        )
        .unwrap();

        assert_eq!(
            courier.spool,
            RepositoryConfig::File {
                path: PathBuf::from("/var/spool/courier")
            }
        );
        assert_eq!(courier.repositories.len(), 2);
        assert_eq!(courier.queue.visibility_timeout_secs, 60);
        assert_eq!(courier.manager.workers, 8);
        assert_eq!(courier.manager.retry.max_attempts, 3);
        assert_eq!(courier.pipeline.max_hops, 10);
        assert_eq!(courier.ingest.max_message_size, 1024);
        assert!(!courier.control.enabled);
        assert_eq!(courier.control.socket_path, "/run/courier.sock");

        let context = Courier {
            spool: RepositoryConfig::memory(),
            ..courier
        }
        .context(&ComponentRegistry::with_builtins())
        .unwrap();
        assert!(context.repositories().contains("local"));
        assert_eq!(context.processors().max_hops(), 10);
    }

    #[test]
    fn test_invalid_pipeline_is_reported() {
        let courier = Courier::from_ron(
            r#"(
                spool: Memory(capacity: None),
                pipeline: (processors: [(name: "root", rules: [(matcher: "Nope", mailets: [])])]),
            )"#,
        )
        .unwrap();

        let err = courier
            .context(&ComponentRegistry::with_builtins())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid pipeline configuration"));
    }

    #[test]
    fn test_unknown_repository_is_reported() {
        let courier = Courier::from_ron(
            r#"(
                spool: Memory(capacity: None),
                repositories: { "local": Memory(capacity: None) },
                pipeline: (processors: [
                    (name: "root", rules: [
                        (matcher: "All", mailets: [(name: "ToRepository", config: { "repository": "no-such-repo" })]),
                    ]),
                    (name: "error", rules: [
                        (matcher: "All", mailets: [(name: "ToRepository", config: { "repository": "dead-letter" })]),
                    ]),
                ]),
            )"#,
        )
        .unwrap();

        let err = courier
            .context(&ComponentRegistry::with_builtins())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid pipeline configuration"));
        assert!(format!("{err:#}").contains("'no-such-repo', which is not a repository"));

        let courier = Courier::from_ron(
            r#"(
                spool: Memory(capacity: None),
                repositories: { "local": Memory(capacity: None) },
                pipeline: (processors: [
                    (name: "root", rules: [
                        (matcher: "All", mailets: [(name: "ToRepository", config: { "repository": "local" })]),
                    ]),
                    (name: "error"),
                ]),
            )"#,
        )
        .unwrap();
        assert!(courier.context(&ComponentRegistry::with_builtins()).is_ok());
    }
}
