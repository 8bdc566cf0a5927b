//! Jetstream consumer.
//!
//! Subscribes to the JSON firehose for the configured collections and feeds
//! every frame to the [`RecordIndexer`]. Delivery is at-most-once: a frame
//! that fails to decode or index is logged and dropped, and the loop moves
//! on. When the connection closes the consumer waits a fixed delay and
//! reconnects, until shutdown is signalled.

use futures_util::StreamExt;
use skywell_index::{IndexError, Outcome, RecordIndexer};
use skywell_types::{DecodeError, Event};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite};

/// Errors raised while consuming the stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The WebSocket connection could not be established or broke.
    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// A frame was not a valid Jetstream event.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Applying the event to the index failed.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Long-running Jetstream subscription.
#[derive(Debug)]
pub struct StreamConsumer {
    indexer: RecordIndexer,
    url: String,
    wanted_collections: Vec<String>,
    reconnect_delay: Duration,
}

impl StreamConsumer {
    pub fn new(
        indexer: RecordIndexer,
        url: impl Into<String>,
        wanted_collections: Vec<String>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            indexer,
            url: url.into(),
            wanted_collections,
            reconnect_delay,
        }
    }

    /// The subscription URL with one `wantedCollections` parameter per
    /// collection.
    pub fn subscribe_url(&self) -> String {
        let mut url = self.url.clone();
        for (i, collection) in self.wanted_collections.iter().enumerate() {
            let sep = if i == 0 && !url.contains('?') { '?' } else { '&' };
            url.push(sep);
            url.push_str("wantedCollections=");
            url.push_str(collection);
        }
        url
    }

    /// Runs until `shutdown` turns `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let url = self.subscribe_url();
        tracing::info!(url = %url, "starting jetstream consumer");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.consume(&url) => match result {
                    Ok(()) => tracing::warn!("jetstream connection closed"),
                    Err(e) => tracing::error!(error = %e, "jetstream connection failed"),
                },
                _ = shutdown.changed() => break,
            }

            tracing::info!(
                delay_secs = self.reconnect_delay.as_secs(),
                "reconnecting to jetstream"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("jetstream consumer stopped");
    }

    /// Reads one connection until it closes.
    async fn consume(&self, url: &str) -> Result<(), StreamError> {
        let (mut socket, _) = connect_async(url).await?;
        tracing::info!("connected to jetstream");

        while let Some(message) = socket.next().await {
            let message = message?;
            if message.is_close() {
                return Ok(());
            }
            self.handle_message(message).await;
        }
        Ok(())
    }

    /// Indexes one WebSocket message, logging and dropping failures.
    pub async fn handle_message(&self, message: tungstenite::Message) {
        let text = match message {
            tungstenite::Message::Text(text) => text.as_str().to_owned(),
            tungstenite::Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(len = bytes.len(), "skipping undecodable binary frame");
                    return;
                }
            },
            _ => return,
        };

        match self.handle_text(&text).await {
            Ok(outcome) => tracing::debug!(?outcome, "event applied"),
            Err(StreamError::Decode(e)) => tracing::warn!(error = %e, "dropping malformed frame"),
            Err(e) => tracing::error!(error = %e, "failed to index event"),
        }
    }

    /// Decodes and applies one JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] for malformed frames and
    /// [`StreamError::Index`] when indexing fails.
    pub async fn handle_text(&self, frame: &str) -> Result<Outcome, StreamError> {
        let event = Event::decode(frame)?;
        tracing::debug!(did = %event.did(), kind = event.kind(), "event received");
        Ok(self.indexer.handle_event(&event).await?)
    }
}
