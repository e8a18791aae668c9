//! Tail retention: which recent turns survive a compression.

use crate::compressor::fingerprint::Fingerprint;
use crate::compressor::wire::{ConversationTurn, Role};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TailRetention {
    pub percent: f64,
    pub min_chars: u64,
}

impl TailRetention {
    pub fn new(percent: f64, min_chars: u64) -> Self {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self { percent, min_chars }
    }
}

/// Drop the trailing compression-prompt turn, if the history ends with one.
pub fn strip_compression_prompt_turn(
    turns: Vec<ConversationTurn>,
    fingerprint: &Fingerprint,
) -> Vec<ConversationTurn> {
    let mut turns = turns;
    let is_prompt_turn = turns
        .last()
        .is_some_and(|last| last.role == Role::User && fingerprint.matches_text(&last.text));
    if is_prompt_turn {
        debug!(target: "compressor::net", "dropping compression prompt turn from preserved history");
        turns.pop();
    }
    turns
}

/// Pick the suffix of `turns` to keep verbatim after the summary.
///
/// The character budget counts the texts joined by newlines. The kept suffix
/// starts on a user turn so the rebuilt thread reads as a fresh exchange.
pub fn pick_tail_turns(turns: &[ConversationTurn], policy: TailRetention) -> Vec<ConversationTurn> {
    if turns.is_empty() {
        return Vec::new();
    }
    if policy.percent >= 100.0 {
        debug!(target: "compressor::net", "tail retention at 100%, preserving all turns");
        return turns.to_vec();
    }

    let total_chars = turns.iter().map(ConversationTurn::char_len).sum::<usize>() + turns.len() - 1;
    let computed = (total_chars as f64 * (policy.percent / 100.0)).floor() as u64;
    let target = policy.min_chars.max(computed).min(total_chars as u64);
    if target == 0 {
        debug!(target: "compressor::net", "tail retention target is zero, preserving nothing");
        return Vec::new();
    }

    let mut acc = 0u64;
    let mut start = None;
    for (idx, turn) in turns.iter().enumerate().rev() {
        acc += turn.char_len() as u64;
        if acc >= target && turn.role == Role::User {
            start = Some(idx);
            break;
        }
    }
    let start = realign_to_user_turn(turns, start.unwrap_or(0));
    debug!(target: "compressor::net", start, approx_chars = acc, "preserving tail turns");
    turns[start..].to_vec()
}

/// Walk forward from `idx` to the first user turn at or after it. Yields
/// `turns.len()` (an empty tail) when no user turn follows.
fn realign_to_user_turn(turns: &[ConversationTurn], idx: usize) -> usize {
    let mut idx = idx;
    while idx < turns.len() && turns[idx].role != Role::User {
        idx += 1;
    }
    idx
}
