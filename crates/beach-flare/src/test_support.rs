//! In-memory transports for channel tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportError;
use crate::sink::SignalingEvent;
use crate::transport::{HttpTransport, PushItem, PushStream, PushTransport};

pub(crate) const WAIT: Duration = Duration::from_secs(2);

type Responder = dyn Fn(&Url, &str) -> Result<String, TransportError> + Send + Sync;

/// Records every POST and answers it with a configurable responder.
#[derive(Clone)]
pub(crate) struct FakeHttp {
    posts: Arc<Mutex<Vec<(Url, String)>>>,
    responder: Arc<Responder>,
    stalled: Option<&'static str>,
}

impl FakeHttp {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&Url, &str) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        Self {
            posts: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
            stalled: None,
        }
    }

    /// Posts whose path contains `fragment` are recorded but never answered.
    pub(crate) fn stalling(mut self, fragment: &'static str) -> Self {
        self.stalled = Some(fragment);
        self
    }

    pub(crate) fn posts(&self) -> Vec<(Url, String)> {
        self.posts.lock().unwrap().clone()
    }

    /// Waits until at least `count` posts were recorded.
    pub(crate) async fn wait_for_posts(&self, count: usize) -> Vec<(Url, String)> {
        tokio::time::timeout(WAIT, async {
            loop {
                let posts = self.posts();
                if posts.len() >= count {
                    return posts;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} posts, saw {:?}", self.posts()))
    }
}

#[async_trait]
impl HttpTransport for FakeHttp {
    async fn post(&self, url: &Url, body: String) -> Result<String, TransportError> {
        let response = (self.responder)(url, &body);
        self.posts.lock().unwrap().push((url.clone(), body));
        if self
            .stalled
            .is_some_and(|fragment| url.path().contains(fragment))
        {
            std::future::pending::<()>().await;
        }
        response
    }
}

/// Hands each subscription's feeding end to the test.
#[derive(Clone)]
pub(crate) struct FakePush {
    subscriptions: mpsc::UnboundedSender<(Url, mpsc::UnboundedSender<PushItem>)>,
    refuse: bool,
}

pub(crate) type Subscriptions = mpsc::UnboundedReceiver<(Url, mpsc::UnboundedSender<PushItem>)>;

impl FakePush {
    pub(crate) fn new() -> (Self, Subscriptions) {
        let (subscriptions, rx) = mpsc::unbounded_channel();
        (
            Self {
                subscriptions,
                refuse: false,
            },
            rx,
        )
    }

    /// Every `subscribe` call fails immediately.
    pub(crate) fn refusing() -> Self {
        let (push, _) = Self::new();
        Self {
            refuse: true,
            ..push
        }
    }
}

impl PushTransport for FakePush {
    fn subscribe(&self, url: &Url) -> Result<PushStream, TransportError> {
        if self.refuse {
            return Err(TransportError::Unavailable("push refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.subscriptions.send((url.clone(), tx));
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

pub(crate) async fn next_subscription(
    subscriptions: &mut Subscriptions,
) -> (Url, mpsc::UnboundedSender<PushItem>) {
    tokio::time::timeout(WAIT, subscriptions.recv())
        .await
        .expect("subscription before timeout")
        .expect("push transport alive")
}

pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<SignalingEvent>) -> SignalingEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event before timeout")
        .expect("event channel open")
}

/// Asserts no further notification arrives within a short grace period.
pub(crate) async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<SignalingEvent>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

pub(crate) fn message(event: &str, data: &str) -> PushItem {
    PushItem::Message {
        event: event.to_string(),
        data: data.to_string(),
    }
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
