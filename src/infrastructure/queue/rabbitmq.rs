use anyhow::{anyhow, Result};
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection,
    ConnectionProperties,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct Session {
    _conn: Connection,
    channel: Channel,
}

/// Publisher for durable queues. The connection is opened on first use so an
/// unreachable broker never prevents the service from starting.
#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    session: Arc<Mutex<Option<Session>>>,
}

impl RabbitMqService {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            session: Arc::new(Mutex::new(None)),
        }
    }

    async fn connect(url: &str) -> Result<Session> {
        info!("Connecting to RabbitMQ at {}", url);
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create channel: {}", e))?;

        info!("Connected to RabbitMQ");
        Ok(Session {
            _conn: conn,
            channel,
        })
    }

    async fn publish_on(channel: &Channel, queue: &str, payload: &[u8]) -> Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue: {}", e))?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // Persistent
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?
            .await
            .map_err(|e| anyhow!("Failed to confirm publication: {}", e))?;

        Ok(())
    }

    /// Publishes once, reconnecting and retrying a single time if the
    /// current session is broken.
    pub async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let mut guard = self.session.lock().await;

        let session = match guard.take() {
            Some(session) => session,
            None => Self::connect(&self.url).await?,
        };

        match Self::publish_on(&session.channel, queue, payload).await {
            Ok(()) => {
                *guard = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
                drop(session);
                let fresh = Self::connect(&self.url).await?;
                Self::publish_on(&fresh.channel, queue, payload).await?;
                *guard = Some(fresh);
                Ok(())
            }
        }
    }
}
