//! The single pending injection and the rules for consuming it.

use crate::compressor::intercept::Endpoint;
use crate::compressor::wire::{
    ConversationTurn, Role, encode_list_body, encode_resolve_body, rewrite_create_prompt_body,
};
use crate::error::CompressorError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub const ACK_TURN_TEXT: &str = "Got it. Thanks for the additional context!";

/// Reconstructed conversation waiting to be delivered to the next new thread.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInjection {
    pub resolve_body: String,
    pub list_body: String,
    pub resolve_served: bool,
    pub list_served: bool,
    pub turns: Vec<ConversationTurn>,
}

impl PendingInjection {
    pub fn new(turns: Vec<ConversationTurn>) -> Self {
        Self {
            resolve_body: encode_resolve_body(&turns),
            list_body: encode_list_body(&turns),
            resolve_served: false,
            list_served: false,
            turns,
        }
    }

    fn fully_served(&self) -> bool {
        self.resolve_served && self.list_served
    }
}

/// `[user(summary), model(ack), ...tail]`
pub fn rebuild_turns(summary: &str, tail: Vec<ConversationTurn>) -> Vec<ConversationTurn> {
    let mut turns = Vec::with_capacity(tail.len() + 2);
    turns.push(ConversationTurn::synthetic(Role::User, summary));
    turns.push(ConversationTurn::synthetic(Role::Model, ACK_TURN_TEXT));
    turns.extend(tail);
    turns
}

/// A synthetic body handed out instead of a real network response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedBody {
    pub endpoint: Endpoint,
    pub body: String,
}

#[derive(Debug, Default)]
pub struct InjectionScheduler {
    pending: Mutex<Option<PendingInjection>>,
}

impl InjectionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingInjection>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build and install the pending injection, replacing any earlier one.
    pub fn prepare(&self, summary: &str, tail: Vec<ConversationTurn>) -> PendingInjection {
        let pending = PendingInjection::new(rebuild_turns(summary, tail));
        let mut slot = self.slot();
        if slot.is_some() {
            warn!(target: "compressor::net", "replacing an undelivered pending injection");
        }
        *slot = Some(pending.clone());
        info!(
            target: "compressor::net",
            turn_count = pending.turns.len(),
            "prepared injected history"
        );
        pending
    }

    pub fn has_pending(&self) -> bool {
        self.slot().is_some()
    }

    pub fn snapshot(&self) -> Option<PendingInjection> {
        self.slot().clone()
    }

    pub fn discard(&self) {
        if self.slot().take().is_some() {
            info!(target: "compressor::net", "pending injection discarded");
        }
    }

    /// Hand out the synthetic body for `endpoint`, at most once per kind.
    /// The pending injection is cleared once both kinds have been served.
    pub fn try_serve(&self, endpoint: Endpoint) -> Option<ServedBody> {
        let mut slot = self.slot();
        let pending = slot.as_mut()?;
        let body = match endpoint {
            Endpoint::ResolveDriveResource if !pending.resolve_served => {
                pending.resolve_served = true;
                info!(target: "compressor::net", "serving injected history via ResolveDriveResource");
                pending.resolve_body.clone()
            }
            Endpoint::ListPrompts if !pending.list_served => {
                pending.list_served = true;
                info!(target: "compressor::net", "serving injected metadata via ListPrompts");
                pending.list_body.clone()
            }
            _ => return None,
        };
        if pending.fully_served() {
            info!(target: "compressor::net", "injected history fulfilled for new chat");
            *slot = None;
        }
        Some(ServedBody { endpoint, body })
    }

    /// Replace the primary thread of a CreatePrompt body with the pending
    /// turns. Success consumes the injection; failure leaves it in place.
    pub fn try_rewrite(&self, body: &str) -> Option<String> {
        let mut slot = self.slot();
        let pending = slot.as_ref()?;
        match rewrite_create_prompt_body(body, &pending.turns) {
            Some(rewritten) => {
                info!(
                    target: "compressor::net",
                    turn_count = pending.turns.len(),
                    "CreatePrompt payload rewritten"
                );
                *slot = None;
                Some(rewritten)
            }
            None => {
                let err = CompressorError::RewriteFailure(
                    "CreatePrompt payload did not match expected shape".to_string(),
                );
                warn!(target: "compressor::net", code = err.code().as_str(), "{err}, passing through");
                None
            }
        }
    }
}
