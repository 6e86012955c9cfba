//! HTTP and server-push primitives the channels are built on.
//!
//! Channels only see the two traits; the reqwest-backed implementations are the
//! production defaults and tests swap in in-memory doubles.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest_eventsource::retry::Constant;
use reqwest_eventsource::{Event, EventSource};
use tracing::trace;
use url::Url;

use crate::config::ChannelConfig;
use crate::error::TransportError;

/// One-shot asynchronous POST returning the response body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, url: &Url, body: String) -> Result<String, TransportError>;
}

/// Item delivered by a push subscription, in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushItem {
    Open,
    Message { event: String, data: String },
    /// The connection dropped or could not be established. The primitive keeps
    /// reconnecting on its own schedule until the stream is dropped.
    Error(String),
}

pub type PushStream = BoxStream<'static, PushItem>;

/// Long-lived server-push subscription. Dropping the stream releases it.
pub trait PushTransport: Send + Sync {
    fn subscribe(&self, url: &Url) -> Result<PushStream, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(config: &ChannelConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttp {
    async fn post(&self, url: &Url, body: String) -> Result<String, TransportError> {
        let mut request = self.client.post(url.clone());
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        trace!(target = "signaling", url = %url, status = %status, len = text.len(), "post completed");
        if !status.is_success() {
            return Err(TransportError::UnexpectedStatus { status, body: text });
        }
        Ok(text)
    }
}

/// Server-sent events subscription with a fixed reconnect interval.
#[derive(Debug, Clone)]
pub struct EventSourcePush {
    client: reqwest::Client,
    reconnect_interval: Duration,
}

impl EventSourcePush {
    pub fn new(config: &ChannelConfig) -> Self {
        // The stream is long-lived, so it must not inherit the per-request timeout.
        Self::with_client(reqwest::Client::new(), config.reconnect_interval)
    }

    pub fn with_client(client: reqwest::Client, reconnect_interval: Duration) -> Self {
        Self {
            client,
            reconnect_interval,
        }
    }
}

impl PushTransport for EventSourcePush {
    fn subscribe(&self, url: &Url) -> Result<PushStream, TransportError> {
        let mut source = EventSource::new(self.client.get(url.clone())).map_err(|err| {
            TransportError::Subscribe(format!("request cannot be replayed for reconnects: {err:?}"))
        })?;
        source.set_retry_policy(Box::new(Constant::new(self.reconnect_interval, None)));
        let stream = source.map(|item| match item {
            Ok(Event::Open) => PushItem::Open,
            Ok(Event::Message(message)) => PushItem::Message {
                event: message.event,
                data: message.data,
            },
            Err(err) => PushItem::Error(err.to_string()),
        });
        Ok(stream.boxed())
    }
}
