//! Connection lifecycle
//!
//! A `Connection` is the one handle a process holds on the streaming
//! server. It is acquired with `connect` and released with `close`; there
//! are no process-exit hooks. Closing ends every subscription opened
//! through it. Messages still unacknowledged at that point are not drained;
//! the server redelivers them to the next member of the same queue group.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::{
    InMemoryStreamingServer, Payload, StreamTransport, Subscription, SubscriptionOptions,
};
use crate::config::NatsSettings;
use crate::transport::WebSocketTransport;
use crate::utils::BrokerError;

/// Length of generated client ids, in hex characters.
const CLIENT_ID_LEN: usize = 8;

/// A short random client id so several instances of one service never collide.
pub fn random_client_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(CLIENT_ID_LEN);
    id
}

#[derive(Clone)]
pub struct Connection {
    cluster_id: String,
    client_id: String,
    transport: Arc<dyn StreamTransport>,
}

impl Connection {
    /// Connect over WebSocket using `settings`, generating a client id if none is configured.
    pub async fn connect(settings: &NatsSettings) -> Result<Self, BrokerError> {
        let client_id = settings.client_id.clone().unwrap_or_else(random_client_id);
        let transport =
            WebSocketTransport::connect(&settings.url, &settings.cluster_id, &client_id).await?;

        info!("connected to {} as {client_id}", settings.url);
        Ok(Self::with_transport(
            settings.cluster_id.clone(),
            client_id,
            Arc::new(transport),
        ))
    }

    /// Connect to an in-process server.
    pub fn connect_in_memory(
        server: &InMemoryStreamingServer,
        client_id: Option<String>,
    ) -> Result<Self, BrokerError> {
        let client_id = client_id.unwrap_or_else(random_client_id);
        let transport = server.connect(server.cluster_id(), &client_id)?;
        Ok(Self::with_transport(
            server.cluster_id().to_string(),
            client_id,
            transport,
        ))
    }

    pub fn with_transport(
        cluster_id: impl Into<String>,
        client_id: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            client_id: client_id.into(),
            transport,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        options: &SubscriptionOptions,
    ) -> Result<Subscription, BrokerError> {
        self.transport.subscribe(subject, queue_group, options).await
    }

    pub async fn publish(&self, subject: &str, payload: impl Into<Payload>) -> Result<(), BrokerError> {
        self.transport.publish(subject, payload.into()).await
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Ok(());
        }
        match self.transport.close().await {
            Ok(()) => {
                info!("connection {} closed", self.client_id);
                Ok(())
            }
            Err(e) => {
                warn!("closing connection {} failed: {e}", self.client_id);
                Err(e)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.transport.closed_signal().borrow()
    }

    /// Resolves once the connection is closed, by us or by the server.
    pub async fn closed(&self) {
        let mut signal = self.transport.closed_signal();
        // an Err means the transport is gone, which is closed as well
        let _ = signal.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("cluster_id", &self.cluster_id)
            .field("client_id", &self.client_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
