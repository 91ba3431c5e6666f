//! Role routing: turns an accepted transport into a [`Connection`].

use crate::connection::{Connection, ConnectionConfig};
use crate::hub::HubHandle;
use crate::metrics;
use crate::peer::{validate_identity, Role};
use beacon_protocol::{codec, ErrorPayload};
use beacon_transport::{FrameSink, Transport, WireFrame};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Reasons a transport was turned away.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcceptError {
    /// No identity was supplied.
    #[error("{0} is required")]
    MissingIdentity(&'static str),

    /// The identity failed validation.
    #[error("Invalid {param}: {reason}")]
    InvalidIdentity {
        param: &'static str,
        reason: &'static str,
    },
}

/// Builds connections bound to one hub.
#[derive(Clone)]
pub struct ConnectionFactory {
    hub: HubHandle,
    config: ConnectionConfig,
}

impl ConnectionFactory {
    #[must_use]
    pub fn new(hub: HubHandle, config: ConnectionConfig) -> Self {
        Self { hub, config }
    }

    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Validate the identity and build a connection for `role`.
    ///
    /// On rejection an `{"error": ...}` frame is written and the transport is
    /// closed; the hub is never contacted.
    ///
    /// # Errors
    ///
    /// Returns [`AcceptError`] if the identity is missing or invalid.
    pub async fn accept<T: Transport>(
        &self,
        transport: T,
        role: Role,
        identity: Option<&str>,
    ) -> Result<Connection<T>, AcceptError> {
        let param = role.identity_param();
        let checked = match identity {
            None | Some("") => Err(AcceptError::MissingIdentity(param)),
            Some(identity) => validate_identity(identity)
                .map(|()| identity)
                .map_err(|reason| AcceptError::InvalidIdentity { param, reason }),
        };

        match checked {
            Ok(identity) => {
                debug!(%role, identity, "Accepted connection");
                Ok(Connection::new(
                    transport,
                    identity,
                    role,
                    self.hub.clone(),
                    self.config.clone(),
                ))
            }
            Err(e) => {
                warn!(%role, error = %e, "Rejecting connection");
                metrics::record_error("rejected");
                self.reject(transport, &e).await;
                Err(e)
            }
        }
    }

    async fn reject<T: Transport>(&self, transport: T, error: &AcceptError) {
        let (mut sink, _stream) = transport.split();
        let write_wait = self.config.write_wait;

        if let Ok(text) = codec::encode(&ErrorPayload::new(error.to_string())) {
            if !matches!(
                timeout(write_wait, sink.send(WireFrame::Text(text))).await,
                Ok(Ok(()))
            ) {
                debug!(%error, "Failed to deliver rejection");
            }
        }
        let _ = timeout(write_wait, sink.close()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use beacon_transport::MemoryTransport;

    fn factory() -> ConnectionFactory {
        ConnectionFactory::new(Hub::spawn(HubConfig::default()), ConnectionConfig::default())
    }

    #[tokio::test]
    async fn test_missing_identity_rejected() {
        let factory = factory();
        let (transport, mut client) = MemoryTransport::pair();

        let result = factory.accept(transport, Role::Publisher, None).await;
        assert!(matches!(result, Err(AcceptError::MissingIdentity("driver_id"))));

        assert_eq!(
            client.recv().await,
            Some(WireFrame::Text(r#"{"error":"driver_id is required"}"#.to_string()))
        );
        assert_eq!(client.recv().await, Some(WireFrame::Close));
        assert_eq!(factory.hub().stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_empty_rider_identity_rejected() {
        let factory = factory();
        let (transport, mut client) = MemoryTransport::pair();

        let result = factory.accept(transport, Role::Subscriber, Some("")).await;
        assert!(result.is_err());
        assert_eq!(
            client.recv_text().await.as_deref(),
            Some(r#"{"error":"rider_id is required"}"#)
        );
    }

    #[tokio::test]
    async fn test_invalid_identity_rejected() {
        let factory = factory();
        let (transport, mut client) = MemoryTransport::pair();

        let result = factory
            .accept(transport, Role::Subscriber, Some("bad\u{0}id"))
            .await;
        assert!(matches!(
            result,
            Err(AcceptError::InvalidIdentity {
                param: "rider_id",
                ..
            })
        ));
        let text = client.recv_text().await.unwrap();
        assert!(text.contains("Invalid rider_id"));
    }

    #[tokio::test]
    async fn test_valid_identity_builds_connection() {
        let factory = factory();
        let (transport, _client) = MemoryTransport::pair();

        let connection = factory
            .accept(transport, Role::Publisher, Some("D1"))
            .await
            .unwrap();
        assert_eq!(connection.identity(), "D1");
        assert_eq!(connection.role(), Role::Publisher);
    }
}
