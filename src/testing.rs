//! Stub backends shared by the unit tests.

use crate::backend::{ChatBackend, Completion, CompletionRequest};
use crate::models::TokenUsage;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ReplyFn = dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync;

#[derive(Default)]
struct StubState {
    requests: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Backend answering from a closure, recording requests and peak concurrency
#[derive(Clone)]
pub struct StubBackend {
    reply: Arc<ReplyFn>,
    delay: Duration,
    state: Arc<StubState>,
}

impl StubBackend {
    pub fn new(reply: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Arc::new(reply),
            delay: Duration::ZERO,
            state: Arc::new(StubState::default()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| Err(anyhow::anyhow!(message.clone())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn into_arc(self) -> Arc<dyn ChatBackend> {
        Arc::new(self)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for StubBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.state.requests.lock().unwrap().push(request.clone());
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = (self.reply)(request);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = reply?;
        Ok(Completion {
            text,
            usage: TokenUsage {
                input: 10,
                output: 5,
                total: 15,
            },
        })
    }
}
