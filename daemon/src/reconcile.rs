//! Streaming transcript reconciliation.
//!
//! Partial-decoding events arrive per audio window, and later events for the
//! same window may refine, extend or rewrite earlier text. The reconciler
//! folds that stream into a stable live preview plus two segment pools:
//! confirmed (append-only once written) and unconfirmed (replaced wholesale
//! each decoding step).
//!
//! Reconciliation rule, keyed by window id:
//! - unknown id: the event text becomes the sole partial for that chunk
//! - text at least as long as the last partial: refinement, overwrite it
//! - shorter text, unchanged fallback count, streaming mode: a new window
//!   started, append the text as a fresh partial
//! - otherwise: a temperature fallback rewrote the window, replace the last
//!   partial and record the new fallback count

use crate::config::DecodingConfig;
use crate::runtime::{DecodeControl, DecodeEvent, Segment};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Thresholds that stop decoding of a degenerate window early.
#[derive(Debug, Clone, Copy)]
pub struct EarlyStopPolicy {
    /// Number of trailing tokens the repetition ratio is computed over.
    pub compression_check_window: usize,
    /// Repetition ratio above which decoding stops.
    pub compression_ratio_threshold: f32,
    /// Average log-probability below which decoding stops.
    pub logprob_threshold: f32,
}

impl EarlyStopPolicy {
    pub fn from_config(decoding: &DecodingConfig) -> Self {
        Self {
            compression_check_window: decoding.compression_check_window,
            compression_ratio_threshold: decoding.compression_ratio_threshold,
            logprob_threshold: decoding.logprob_threshold,
        }
    }
}

/// Accumulated partials for one audio window.
#[derive(Debug)]
struct ChunkEntry {
    /// Partial texts in arrival order.
    partials: Vec<String>,
    /// Fallback count as of the last event applied.
    fallbacks: u32,
}

/// Folds partial-decoding events into stable transcript state.
///
/// All mutation goes through `&mut self`; callers that share a reconciler
/// across threads wrap it in a `Mutex` (decode callbacks run on a blocking
/// thread).
pub struct TranscriptReconciler {
    chunks: BTreeMap<usize, ChunkEntry>,
    policy: EarlyStopPolicy,
    /// Continuous-microphone mode: every event keys chunk 0 and shrinking
    /// text means a new window, not a rewrite.
    streaming: bool,
    confirmed: Vec<Segment>,
    unconfirmed: Vec<Segment>,
    total_fallbacks: u32,
    decode_steps: u64,
}

impl TranscriptReconciler {
    pub fn new(policy: EarlyStopPolicy, streaming: bool) -> Self {
        Self {
            chunks: BTreeMap::new(),
            policy,
            streaming,
            confirmed: Vec::new(),
            unconfirmed: Vec::new(),
            total_fallbacks: 0,
            decode_steps: 0,
        }
    }

    /// Clear per-run state: the chunk accumulator and both segment pools.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.confirmed.clear();
        self.unconfirmed.clear();
        self.total_fallbacks = 0;
        self.decode_steps = 0;
    }

    /// Apply one decoding event and answer whether decoding should stop.
    pub fn observe(&mut self, event: &DecodeEvent) -> DecodeControl {
        let chunk_id = if self.streaming { 0 } else { event.window_id };
        self.decode_steps += 1;

        match self.chunks.get_mut(&chunk_id) {
            None => {
                self.chunks.insert(
                    chunk_id,
                    ChunkEntry {
                        partials: vec![event.text.clone()],
                        fallbacks: event.fallbacks,
                    },
                );
            }
            Some(entry) => {
                // partials is never empty once an entry exists
                let last = entry.partials.last_mut().expect("chunk entry has a partial");
                if event.text.len() >= last.len() {
                    // Same window, refined or extended text
                    *last = event.text.clone();
                } else if event.fallbacks == entry.fallbacks && self.streaming {
                    // New window started (fallbacks unchanged)
                    entry.partials.push(event.text.clone());
                } else {
                    // Fallback rewrote the window, drop the bad text
                    debug!(fallbacks = event.fallbacks, "Fallback occurred");
                    *last = event.text.clone();
                    entry.fallbacks = event.fallbacks;
                }
            }
        }
        self.total_fallbacks = self.total_fallbacks.max(event.fallbacks);

        self.check_early_stop(event)
    }

    fn check_early_stop(&self, event: &DecodeEvent) -> DecodeControl {
        let window = self.policy.compression_check_window;
        if event.tokens.len() > window {
            let recent = &event.tokens[event.tokens.len() - window..];
            let ratio = compression_ratio(recent);
            if ratio > self.policy.compression_ratio_threshold {
                debug!(ratio = ratio, "Early stopping due to compression threshold");
                return DecodeControl::Stop;
            }
        }
        if event.avg_logprob < self.policy.logprob_threshold {
            debug!(
                avg_logprob = event.avg_logprob,
                "Early stopping due to logprob threshold"
            );
            return DecodeControl::Stop;
        }
        DecodeControl::Continue
    }

    /// Display text for one chunk: its partials joined in arrival order.
    pub fn chunk_text(&self, chunk_id: usize) -> Option<String> {
        self.chunks.get(&chunk_id).map(|e| e.partials.join(" "))
    }

    /// Live preview: chunks ascending by id, each chunk's partials joined,
    /// chunks joined by newlines.
    pub fn preview(&self) -> String {
        self.chunks
            .values()
            .map(|e| e.partials.join(" "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace the unconfirmed pool with this decoding step's segments.
    pub fn set_unconfirmed(&mut self, segments: Vec<Segment>) {
        self.unconfirmed = segments;
    }

    /// Append segments to the confirmed pool. Once written they are never
    /// modified or rolled back.
    pub fn confirm_segments(&mut self, segments: impl IntoIterator<Item = Segment>) {
        self.confirmed.extend(segments);
    }

    /// Move all still-unconfirmed segments into the confirmed pool in order.
    ///
    /// Idempotent: with an empty unconfirmed pool this is a no-op.
    pub fn finalize(&mut self) {
        if !self.unconfirmed.is_empty() {
            self.confirmed.append(&mut self.unconfirmed);
        }
    }

    pub fn confirmed(&self) -> &[Segment] {
        &self.confirmed
    }

    pub fn unconfirmed(&self) -> &[Segment] {
        &self.unconfirmed
    }

    /// End time of the last confirmed segment, in seconds.
    pub fn last_confirmed_end(&self) -> f32 {
        self.confirmed.last().map(|s| s.end).unwrap_or(0.0)
    }

    pub fn total_fallbacks(&self) -> u32 {
        self.total_fallbacks
    }

    pub fn decode_steps(&self) -> u64 {
        self.decode_steps
    }
}

/// Repetition metric over a token window.
///
/// An LZ78-style parse: the sequence is split into phrases, each the
/// shortest prefix not seen before. Degenerate, repetitive output re-uses
/// long phrases and yields few of them, so the ratio of tokens to phrases
/// grows; distinct tokens give a ratio of 1.
pub fn compression_ratio(tokens: &[i32]) -> f32 {
    if tokens.is_empty() {
        return 0.0;
    }

    let mut seen: HashSet<&[i32]> = HashSet::new();
    let mut phrases = 0usize;
    let mut start = 0usize;

    for end in 1..=tokens.len() {
        let phrase = &tokens[start..end];
        if !seen.contains(phrase) {
            seen.insert(phrase);
            phrases += 1;
            start = end;
        }
    }
    if start < tokens.len() {
        // Trailing run that matched an existing phrase
        phrases += 1;
    }

    tokens.len() as f32 / phrases as f32
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
