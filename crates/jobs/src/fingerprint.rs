//! Request fingerprints and job ids.
//!
//! The fingerprint covers the channel, personality, acting user, a digest
//! of the text and the sorted image refs, so two deliveries of the same
//! inbound message collapse onto one key. Fields are joined with the ASCII
//! unit separator, which cannot appear in platform ids.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use ch_domain::request::GenerationRequest;

const SEP: &[u8] = b"\x1f";

/// Namespace for job ids derived from fingerprints.
const JOB_NAMESPACE: Uuid = Uuid::from_u128(0x63686f72_7573_4a6f_9b1d_6a6f62696473);

pub fn fingerprint(request: &GenerationRequest) -> String {
    let text_digest = hex::encode(Sha256::digest(request.text.as_bytes()));

    let mut images: Vec<&str> = request.image_refs.iter().map(String::as_str).collect();
    images.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(request.channel_id.as_bytes());
    hasher.update(SEP);
    hasher.update(request.personality_id.as_bytes());
    hasher.update(SEP);
    hasher.update(request.user_id.as_bytes());
    hasher.update(SEP);
    hasher.update(text_digest.as_bytes());
    hasher.update(SEP);
    hasher.update(images.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

/// Job id for a reservation made at `reserved_at`.
///
/// Duplicates inside one reservation share the id; a retry after the
/// reservation expired gets a fresh one.
pub fn job_id_for(fingerprint: &str, reserved_at: DateTime<Utc>) -> String {
    let name = format!("{fingerprint}@{}", reserved_at.timestamp_nanos_opt().unwrap_or_default());
    Uuid::new_v5(&JOB_NAMESPACE, name.as_bytes()).to_string()
}
