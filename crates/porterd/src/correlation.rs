//! Approval correlation channel.
//!
//! The reply webhook carries only a sender address and free text — no
//! application-level correlation id — so dispatch order is the only
//! available correlation strategy. Each recipient channel gets its own
//! FIFO of outstanding session ids, and an inbound reply from that
//! address resolves the queue head. The design assumes at most one
//! outstanding request per recipient at a time; replies that race out of
//! order within one recipient channel correlate incorrectly.

use crate::messaging::{GatewayError, MessageGateway};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct ChannelState {
    /// Outstanding session ids per recipient channel, in dispatch order.
    pending: HashMap<String, VecDeque<Uuid>>,
    /// Correlated replies awaiting a status poll.
    replies: HashMap<Uuid, String>,
}

/// Pairs outbound approval requests with inbound context-free replies.
pub struct ApprovalChannel {
    gateway: Arc<dyn MessageGateway>,
    state: Mutex<ChannelState>,
}

impl ApprovalChannel {
    pub fn new(gateway: Arc<dyn MessageGateway>) -> Self {
        Self {
            gateway,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Send an approval request and enqueue the session for correlation.
    ///
    /// The session is appended only after the gateway acknowledges the
    /// send, so a failed delivery leaves no dangling queue entry.
    pub async fn dispatch(
        &self,
        session_id: Uuid,
        channel: &str,
        body: &str,
    ) -> Result<String, GatewayError> {
        let delivery_id = self.gateway.send(channel, body).await?;

        let mut state = self.state.lock().expect("channel state poisoned");
        state
            .pending
            .entry(channel.to_string())
            .or_default()
            .push_back(session_id);
        tracing::debug!(%session_id, channel, "session enqueued for correlation");

        Ok(delivery_id)
    }

    /// Correlate an inbound reply to the oldest outstanding request for
    /// the sending channel.
    ///
    /// `None` means no pending request for this sender: the reply is
    /// discarded (logged by the caller), never retried.
    pub fn correlate_reply(&self, sender_channel: &str, body: &str) -> Option<Uuid> {
        let mut state = self.state.lock().expect("channel state poisoned");
        let session_id = state.pending.get_mut(sender_channel)?.pop_front()?;
        state.replies.insert(session_id, body.to_string());
        tracing::info!(%session_id, sender = sender_channel, "reply correlated");
        Some(session_id)
    }

    /// Non-blocking reply check; consumes the reply when present.
    pub fn poll(&self, session_id: Uuid) -> Option<String> {
        self.state
            .lock()
            .expect("channel state poisoned")
            .replies
            .remove(&session_id)
    }

    /// Put a consumed reply back, for callers that could not complete
    /// resolution and want the next poll to retry.
    pub fn restore_reply(&self, session_id: Uuid, body: String) {
        self.state
            .lock()
            .expect("channel state poisoned")
            .replies
            .insert(session_id, body);
    }

    /// Drop a session from every pending queue and the reply mailbox.
    /// Used when a session expires before its reply arrives.
    pub fn forget(&self, session_id: Uuid) {
        let mut state = self.state.lock().expect("channel state poisoned");
        for queue in state.pending.values_mut() {
            queue.retain(|id| *id != session_id);
        }
        state.pending.retain(|_, queue| !queue.is_empty());
        state.replies.remove(&session_id);
    }
}
