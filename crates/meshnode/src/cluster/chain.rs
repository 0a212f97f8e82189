//! Node-wide chain counter.
//!
//! Every envelope carries the sender's counter in `_skynet_chain`; a sender
//! may also ask peers to adopt a value via `_skynet_chain_new`. The highest
//! value seen wins.

use mesh_common::ChainState;
use mesh_common::constants::fields;

use crate::diagnostics::Diagnostics;
use crate::envelope::Envelope;
use crate::storage::Backend;

const STATE_CODE: &str = "CHAIN";

pub struct ChainCounter<'a> {
    backend: &'a dyn Backend,
    diag: &'a Diagnostics,
}

impl<'a> ChainCounter<'a> {
    pub fn new(backend: &'a dyn Backend, diag: &'a Diagnostics) -> Self {
        Self { backend, diag }
    }

    /// Stored state, or 0/0 when storage is unavailable
    pub async fn load(&self) -> ChainState {
        self.backend.load_chain().await.unwrap_or_else(|e| {
            self.diag.failure("load chain", &e);
            ChainState::default()
        })
    }

    /// Adopt the envelope's chain if it is ahead of ours.
    ///
    /// Returns the state in effect afterwards.
    pub async fn reconcile(&self, envelope: &Envelope, now: i64) -> ChainState {
        let current = self.load().await;

        let number = |name: &str| envelope.get_text(name).and_then(|v| v.parse::<u64>().ok());
        let updated_at = envelope
            .get_text(fields::CHAIN_UPDATED_AT)
            .and_then(|v| v.parse::<i64>().ok());

        let incoming = match (number(fields::CHAIN_NEW), number(fields::CHAIN)) {
            (Some(new), _) => ChainState::new(new, now),
            (None, Some(chain)) => ChainState::new(chain, updated_at.unwrap_or(now)),
            (None, None) => return current,
        };

        if !current.is_superseded_by(&incoming) {
            return current;
        }

        match self.backend.save_chain(incoming).await {
            Ok(()) => {
                self.diag.state(
                    STATE_CODE,
                    format!("CHAIN UPDATED: {} -> {}", current.chain, incoming.chain),
                );
                incoming
            }
            Err(e) => {
                self.diag.failure("save chain", &e);
                current
            }
        }
    }

    /// Operator override
    pub async fn set(&self, chain: u64, now: i64) -> Option<ChainState> {
        let state = ChainState::new(chain, now);
        match self.backend.save_chain(state).await {
            Ok(()) => {
                tracing::info!(chain = chain, "Chain set by operator");
                Some(state)
            }
            Err(e) => {
                self.diag.failure("set chain", &e);
                None
            }
        }
    }
}
