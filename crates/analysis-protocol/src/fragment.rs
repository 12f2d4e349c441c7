//! Splitting oversized envelopes and rebuilding them from fragments.
//!
//! A splittable envelope is serialised once, cut into base64 slices of at most
//! [`FRAGMENT_PAYLOAD_BYTES`] raw bytes, and each slice is sent as a
//! [`Message::Fragment`] carrying the group id, its index and the total count.
//! The receiving [`Reassembler`] keeps one slot array per group and yields the
//! original envelope once every slot is filled.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::analysis::{AnalysisComplete, AnalysisResult};
use crate::codec::CodecError;
use crate::message::{Envelope, Message};

/// Raw bytes of serialised envelope carried by one fragment.
pub const FRAGMENT_PAYLOAD_BYTES: usize = 16 * 1024;

/// Statistics responses with more samples than this are split.
pub const STATISTICS_SPLIT_THRESHOLD: usize = 30;

/// Flight damage results with at least this many flights are split.
pub const FLIGHT_DAMAGE_SPLIT_THRESHOLD: usize = 500;

/// Upper bound on the part count a peer may announce.
const MAX_FRAGMENT_COUNT: i32 = 1 << 16;

/// One slice of a split envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Identifier shared by all fragments of one envelope.
    pub group_id: String,
    /// Position of this slice, starting at zero.
    pub index: i32,
    /// Number of slices in the group.
    pub total: i32,
    /// Base64 slice of the serialised envelope.
    pub payload: String,
}

/// Protocol violations detected while reassembling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FragmentError {
    /// The announced part count is unusable.
    #[error("fragment group {group_id} announces invalid total {total}")]
    InvalidTotal {
        /// Group identifier.
        group_id: String,
        /// Announced count.
        total: i32,
    },
    /// The index lies outside `[0, total)`.
    #[error("fragment index {index} outside 0..{total} for group {group_id}")]
    IndexOutOfRange {
        /// Group identifier.
        group_id: String,
        /// Offending index.
        index: i32,
        /// Announced count.
        total: i32,
    },
    /// The count differs from the one announced by the first fragment.
    #[error("fragment group {group_id} announced {expected} parts, got {found}")]
    CountMismatch {
        /// Group identifier.
        group_id: String,
        /// Count fixed at first arrival.
        expected: i32,
        /// Count on the rejected fragment.
        found: i32,
    },
    /// The payload was not valid base64.
    #[error("fragment payload for group {group_id} is not base64")]
    BadPayload {
        /// Group identifier.
        group_id: String,
    },
    /// The completed group did not decode into an envelope.
    #[error("fragment group {group_id} did not rebuild an envelope: {reason}")]
    Undecodable {
        /// Group identifier.
        group_id: String,
        /// Decoder message.
        reason: String,
    },
}

/// Whether `message` is large enough to be sent as fragments.
#[must_use]
pub fn should_split(message: &Message) -> bool {
    match message {
        Message::StatisticsResponse(response) => {
            response.statistics.len() > STATISTICS_SPLIT_THRESHOLD
        }
        Message::AnalysisComplete(AnalysisComplete {
            result: AnalysisResult::FlightDamageContribution { damages, .. },
            ..
        }) => damages.len() >= FLIGHT_DAMAGE_SPLIT_THRESHOLD,
        _ => false,
    }
}

/// Cuts `envelope` into fragment envelopes carrying the same token.
///
/// The output is deterministic: splitting the same envelope twice yields the
/// same group id and slices.
pub fn split(envelope: &Envelope) -> Result<Vec<Envelope>, CodecError> {
    let bytes = serde_json::to_vec(envelope)?;
    let group_id = group_id_for(&bytes);
    let chunks: Vec<&[u8]> = bytes.chunks(FRAGMENT_PAYLOAD_BYTES).collect();
    let total = i32::try_from(chunks.len())
        .ok()
        .filter(|&count| count <= MAX_FRAGMENT_COUNT)
        .ok_or(CodecError::TooLarge { bytes: bytes.len() })?;

    Ok(chunks
        .into_iter()
        .zip(0..)
        .map(|(chunk, index)| {
            envelope.reply(Message::Fragment(Fragment {
                group_id: group_id.clone(),
                index,
                total,
                payload: STANDARD.encode(chunk),
            }))
        })
        .collect())
}

fn group_id_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[derive(Debug)]
struct PendingGroup {
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
    started: Instant,
}

/// Per-session table of partially received fragment groups.
#[derive(Debug, Default)]
pub struct Reassembler {
    groups: HashMap<String, PendingGroup>,
    ttl: Option<Duration>,
}

impl Reassembler {
    /// Table that keeps incomplete groups until they complete.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table that drops groups older than `ttl`, when set.
    #[must_use]
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            groups: HashMap::new(),
            ttl,
        }
    }

    /// Number of incomplete groups.
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Stores `fragment` and returns the rebuilt envelope once its group is
    /// complete.
    ///
    /// Rejected fragments leave the table untouched. A repeated index replaces
    /// the slice stored earlier.
    pub fn receive(&mut self, fragment: Fragment) -> Result<Option<Envelope>, FragmentError> {
        self.expire(Instant::now());
        let Fragment {
            group_id,
            index,
            total,
            payload,
        } = fragment;

        if total <= 0 || total > MAX_FRAGMENT_COUNT {
            return Err(FragmentError::InvalidTotal { group_id, total });
        }
        if let Some(existing) = self.groups.get(&group_id)
            && existing.slots.len() != slot_count(total)
        {
            return Err(FragmentError::CountMismatch {
                expected: i32::try_from(existing.slots.len()).unwrap_or(i32::MAX),
                group_id,
                found: total,
            });
        }
        let Some(slot_index) = usize::try_from(index).ok().filter(|&slot| slot < slot_count(total))
        else {
            return Err(FragmentError::IndexOutOfRange {
                group_id,
                index,
                total,
            });
        };
        let Ok(bytes) = STANDARD.decode(payload.as_bytes()) else {
            return Err(FragmentError::BadPayload { group_id });
        };

        let group = self
            .groups
            .entry(group_id.clone())
            .or_insert_with(|| PendingGroup {
                slots: vec![None; slot_count(total)],
                filled: 0,
                started: Instant::now(),
            });
        if let Some(slot) = group.slots.get_mut(slot_index) {
            if slot.is_none() {
                group.filled = group.filled.saturating_add(1);
            }
            *slot = Some(bytes);
        }
        if group.filled < group.slots.len() {
            return Ok(None);
        }

        let Some(complete) = self.groups.remove(&group_id) else {
            return Ok(None);
        };
        let joined: Vec<u8> = complete.slots.into_iter().flatten().flatten().collect();
        let envelope: Envelope =
            serde_json::from_slice(&joined).map_err(|error| FragmentError::Undecodable {
                group_id: group_id.clone(),
                reason: error.to_string(),
            })?;
        if matches!(envelope.message, Message::Fragment(_)) {
            return Err(FragmentError::Undecodable {
                group_id,
                reason: "nested fragment".to_owned(),
            });
        }
        Ok(Some(envelope))
    }

    fn expire(&mut self, now: Instant) {
        if let Some(ttl) = self.ttl {
            self.groups
                .retain(|_, group| now.saturating_duration_since(group.started) < ttl);
        }
    }
}

fn slot_count(total: i32) -> usize {
    usize::try_from(total).unwrap_or(0)
}
