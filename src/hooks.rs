//! Extension points the runner calls back into.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::sink::OutputSink;

/// Callbacks for one run, invoked once when the process terminates
pub trait RunHooks: Send + Sync {
    /// Post-process the final output before the status is recorded
    fn on_render(&self, _sink: &mut OutputSink) {}

    /// Receive the terminal status string
    fn on_exit(&self, _status: &str) {}
}

/// Operator prompt used before killing a process that asked for confirmation
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Always answers yes
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl Confirm for AlwaysConfirm {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// Always answers no
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

#[async_trait]
impl Confirm for NeverConfirm {
    async fn confirm(&self, _message: &str) -> bool {
        false
    }
}

/// A question waiting for the operator
#[derive(Debug)]
pub struct PromptRequest {
    message: String,
    reply: oneshot::Sender<bool>,
}

impl PromptRequest {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn answer(self, yes: bool) {
        let _ = self.reply.send(yes);
    }
}

/// Forwards prompts to whoever owns the screen and waits for the answer.
/// A dropped request counts as "no".
#[derive(Debug, Clone)]
pub struct ChannelConfirm {
    tx: mpsc::UnboundedSender<PromptRequest>,
}

impl ChannelConfirm {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PromptRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Confirm for ChannelConfirm {
    async fn confirm(&self, message: &str) -> bool {
        let (reply, answer) = oneshot::channel();
        let request = PromptRequest {
            message: message.to_string(),
            reply,
        };

        if self.tx.send(request).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}
