//! Scripted transport shared by delivery and pipeline tests

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::payload::OutboundRequest;
use super::transport::Transport;
use super::types::DeliveryError;

#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Fail(DeliveryError),
    /// Never answers within any sane timeout
    Hang,
}

/// Replays queued replies in order, then answers with `fallback`
#[derive(Debug)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    sent: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn ok() -> Self {
        Self::with_fallback(Reply::Ok)
    }

    pub fn failing(status: u16) -> Self {
        Self::with_fallback(Reply::Fail(DeliveryError::Status(status)))
    }

    pub fn with_fallback(fallback: Reply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock() = reply;
    }

    /// Every request seen, including failed attempts
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, path: &str) -> Vec<OutboundRequest> {
        self.sent().into_iter().filter(|r| r.url.ends_with(path)).collect()
    }

    pub fn bodies(&self, path: &str) -> Vec<serde_json::Value> {
        self.sent_to(path)
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<(), DeliveryError> {
        self.sent.lock().push(request);
        let reply = {
            let next = self.replies.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.lock().clone())
        };
        match reply {
            Reply::Ok => Ok(()),
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}
