//! AMQP consumer plumbing for lifecycle notifications.
//!
//! Declares one non-durable, auto-delete queue and binds it to every
//! configured topic exchange under the notification routing key. Messages
//! are consumed without acknowledgement: a message that fails downstream is
//! never redelivered, by design.

use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::error::SyncError;

/// A connected consumer of lifecycle notifications.
pub struct BusListener {
    connection: Connection,
    consumer: Consumer,
}

impl BusListener {
    /// Connect to the broker and set up exchanges, queue, and bindings.
    pub async fn connect(config: &BusConfig) -> Result<Self, SyncError> {
        let connection =
            Connection::connect(&config.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        let queue_options = QueueDeclareOptions {
            durable: false,
            auto_delete: true,
            ..Default::default()
        };
        channel
            .queue_declare(&config.queue, queue_options, FieldTable::default())
            .await?;

        for exchange in &config.exchanges {
            let exchange_options = ExchangeDeclareOptions {
                durable: false,
                ..Default::default()
            };
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Topic,
                    exchange_options,
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_bind(
                    &config.queue,
                    exchange,
                    &config.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            debug!(exchange, routing_key = %config.routing_key, "bound notification queue");
        }

        let consume_options = BasicConsumeOptions {
            no_ack: true,
            ..Default::default()
        };
        let consumer = channel
            .basic_consume(
                &config.queue,
                "lifecycle-dns",
                consume_options,
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %config.queue,
            exchanges = config.exchanges.len(),
            "connected to message bus"
        );

        Ok(Self {
            connection,
            consumer,
        })
    }

    /// Next raw delivery payload. `None` when the stream ends.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>, lapin::Error>> {
        self.consumer
            .next()
            .await
            .map(|result| result.map(|delivery| delivery.data))
    }

    /// Close the underlying connection.
    pub async fn close(self) {
        if let Err(e) = self.connection.close(200, "shutdown").await {
            debug!("error closing bus connection: {e}");
        }
    }
}
