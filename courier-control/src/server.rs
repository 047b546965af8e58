//! Control server

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::Signal;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    ControlAuthConfig, ControlError, Request, Response, Result,
    frame::{MAX_REQUEST_SIZE, MAX_RESPONSE_SIZE, read_frame, write_frame},
    protocol::PROTOCOL_VERSION,
};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Processes authenticated, version-checked requests
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// # Errors
    /// If the command cannot be processed; the error is sent to the client
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Serves control requests on a Unix domain socket
pub struct ControlServer {
    socket_path: String,
    handler: Arc<dyn CommandHandler>,
    auth: Arc<ControlAuthConfig>,
    timeout: Duration,
}

impl ControlServer {
    /// # Errors
    /// If the socket path is empty
    pub fn new(socket_path: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let socket_path = socket_path.into();
        if socket_path.trim().is_empty() {
            return Err(ControlError::InvalidSocketPath(
                "socket path is empty".to_string(),
            ));
        }

        Ok(Self {
            socket_path,
            handler,
            auth: Arc::new(ControlAuthConfig::default()),
            timeout: CONNECTION_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_auth(mut self, auth: ControlAuthConfig) -> Self {
        if auth.requires_auth() && auth.token_hashes.is_empty() {
            warn!("Control authentication is enabled with no tokens; every request will be refused");
        }
        self.auth = Arc::new(auth);
        self
    }

    /// Per-connection limit on reading the request and writing the response
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Accept connections until a shutdown signal is received
    ///
    /// # Errors
    /// If another instance already listens on the socket, or the socket
    /// cannot be bound
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!(
                        "Socket already in use by running instance: {}",
                        self.socket_path
                    ),
                )));
            }
            info!("Removing stale socket file: {}", self.socket_path);
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            let mut perms = tokio::fs::metadata(&self.socket_path).await?.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&self.socket_path, perms).await?;
        }
        info!(
            "Control server listening on {} (authentication {})",
            self.socket_path,
            if self.auth.requires_auth() {
                "enabled"
            } else {
                "disabled"
            }
        );

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        let handler = Arc::clone(&self.handler);
                        let auth = Arc::clone(&self.auth);
                        let timeout = self.timeout;
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_connection(stream, &*handler, &auth, timeout).await {
                                error!("Error handling control connection: {e}");
                            }
                        });
                    }
                    Err(e) => error!("Error accepting control connection: {e}"),
                },
                sig = shutdown.recv() => {
                    match sig {
                        Ok(sig) => info!("Control server received {sig:?}, shutting down"),
                        Err(e) => error!("Control server shutdown channel error: {e}"),
                    }
                    break;
                }
            }
        }

        if socket_path.exists() {
            debug!("Removing socket file: {}", self.socket_path);
            let _ = tokio::fs::remove_file(socket_path).await;
        }

        Ok(())
    }

    async fn handle_connection(
        mut stream: UnixStream,
        handler: &dyn CommandHandler,
        auth: &ControlAuthConfig,
        timeout: Duration,
    ) -> Result<()> {
        let request: Request = tokio::time::timeout(timeout, read_frame(&mut stream, MAX_REQUEST_SIZE))
            .await
            .map_err(|_| ControlError::Timeout)??;

        trace!("Received request: {:?}", request.command);

        let response = Self::dispatch(request, handler, auth).await;

        trace!("Sending response: {response:?}");

        tokio::time::timeout(timeout, write_frame(&mut stream, &response, MAX_RESPONSE_SIZE))
            .await
            .map_err(|_| ControlError::Timeout)??;

        Ok(())
    }

    async fn dispatch(
        request: Request,
        handler: &dyn CommandHandler,
        auth: &ControlAuthConfig,
    ) -> Response {
        if !request.is_version_compatible() {
            warn!(
                "Rejected control request with protocol version {} (expected {PROTOCOL_VERSION})",
                request.version
            );
            return Response::error(
                ControlError::VersionMismatch {
                    peer: request.version,
                    local: PROTOCOL_VERSION,
                }
                .to_string(),
            );
        }

        if let Err(reason) = auth.validate_token_option(request.token.as_deref()) {
            warn!("Rejected control request {:?}: {reason}", request.command);
            return Response::error(ControlError::Unauthorised(reason).to_string());
        }

        match handler.handle_request(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Error handling request: {e}");
                Response::error(e.to_string())
            }
        }
    }
}
