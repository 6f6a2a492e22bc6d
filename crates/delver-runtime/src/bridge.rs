//! Worker-thread to scheduler bridge for provider streaming.
//!
//! The sole crossing point between the blocking provider call and the
//! async orchestrator: the provider runs in `spawn_blocking`, its token
//! callback pushes into an unbounded channel, and the final result
//! follows as the last item before the sender drops. The async side
//! drains the channel in strict FIFO order until it closes, so tokens are
//! observed exactly as the provider emitted them.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::provider::{Provider, ProviderError, ProviderRequest, StreamOutcome, StreamToken};

/// One item crossing the bridge.
#[derive(Debug)]
pub enum BridgeItem {
    /// An incremental token, in emission order.
    Token(StreamToken),
    /// The provider's final result; always the last item on the channel.
    Done(Result<StreamOutcome, ProviderError>),
}

/// Start one provider request on the blocking pool.
///
/// Tokens and the final result arrive on the returned channel in FIFO
/// order; the channel closes after `Done`.
pub fn stream_turn(
    provider: Arc<dyn Provider>,
    request: ProviderRequest,
) -> mpsc::UnboundedReceiver<BridgeItem> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tokio::task::spawn_blocking(move || {
        let mut forward = |token: StreamToken| {
            let _ = tx.send(BridgeItem::Token(token));
        };
        let result = provider.stream_turn(&request, &mut forward);
        let _ = tx.send(BridgeItem::Done(result));
    });
    rx
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
