//! Client for the control socket

use std::{path::Path, time::Duration};

use tokio::net::UnixStream;
use tracing::debug;

use crate::{
    ControlError, Request, RequestCommand, Response, ResponsePayload, Result,
    frame::{MAX_REQUEST_SIZE, MAX_RESPONSE_SIZE, read_frame, write_frame},
    protocol::PROTOCOL_VERSION,
};

/// One connection per request
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: String,
    timeout: Duration,
    token: Option<String>,
}

impl ControlClient {
    #[must_use]
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
            token: None,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bearer token sent with every request built by [`Self::execute`]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Send `command` with the configured token
    ///
    /// # Errors
    /// See [`Self::send_request`]
    pub async fn execute(&self, command: RequestCommand) -> Result<Response> {
        let request = match &self.token {
            Some(token) => Request::with_token(command, token.clone()),
            None => Request::new(command),
        };
        self.send_request(request).await
    }

    /// Send a request and receive its response
    ///
    /// # Errors
    /// If the connection fails, the exchange times out, the server speaks
    /// another protocol version or answers with an error
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn exchange(&self, request: Request) -> Result<Response> {
        debug!("Connecting to control socket: {}", self.socket_path);
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        write_frame(&mut stream, &request, MAX_REQUEST_SIZE).await?;
        let response: Response = read_frame(&mut stream, MAX_RESPONSE_SIZE).await?;

        if !response.is_version_compatible() {
            return Err(ControlError::VersionMismatch {
                peer: response.version,
                local: PROTOCOL_VERSION,
            });
        }

        if let ResponsePayload::Error(err) = response.payload {
            return Err(ControlError::ServerError(err));
        }

        Ok(response)
    }

    /// # Errors
    /// If the socket file does not exist
    pub fn check_socket_exists(&self) -> Result<()> {
        if Path::new(&self.socket_path).exists() {
            Ok(())
        } else {
            Err(ControlError::InvalidSocketPath(format!(
                "Socket does not exist: {}",
                self.socket_path
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = ControlClient::new("/tmp/test.sock");
        assert_eq!(client.socket_path, "/tmp/test.sock");
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert!(client.token.is_none());

        let client = client
            .with_timeout(Duration::from_secs(5))
            .with_token("secret");
        assert_eq!(client.timeout, Duration::from_secs(5));
        assert_eq!(client.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_missing_socket() {
        let client = ControlClient::new("/nonexistent/courier.sock");
        assert!(matches!(
            client.check_socket_exists(),
            Err(ControlError::InvalidSocketPath(_))
        ));
    }
}
