//! Acting-identity resolution.
//!
//! Relays (webhooks, proxy bridges) post on behalf of a real user. The
//! pipeline only ever sees the resolved user; this module decides who that
//! is from the raw sender and whatever metadata the platform attached.

use serde::{Deserialize, Serialize};

use crate::trace::TraceEvent;

/// Platform metadata attached to an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// The sender is an automated account.
    #[serde(default)]
    pub is_bot: bool,
    /// Set when the message arrived through a webhook relay.
    #[serde(default)]
    pub webhook_id: Option<String>,
    /// The real user behind a relay, as reported by the relay.
    #[serde(default)]
    pub proxied_user_id: Option<String>,
}

/// The user a request acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActingIdentity {
    pub user_id: String,
    /// True when `user_id` was recovered from behind a relay.
    pub proxied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unresolvable {
    EmptySender,
    /// Automated senders never act as a user.
    Bot,
    /// A relayed message that does not name the user behind it.
    UnattributedRelay { webhook_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityResolution {
    Resolved(ActingIdentity),
    Unresolvable(Unresolvable),
}

/// Resolve the acting user for an inbound message.
///
/// Pure apart from the trace line emitted on success.
pub fn resolve_acting_identity(raw_sender_id: &str, metadata: &MessageMetadata) -> IdentityResolution {
    let raw = raw_sender_id.trim();
    let proxied_user = metadata
        .proxied_user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let resolved = match (proxied_user, &metadata.webhook_id) {
        (Some(user), _) => ActingIdentity {
            user_id: user.to_owned(),
            proxied: true,
        },
        (None, Some(webhook_id)) => {
            return IdentityResolution::Unresolvable(Unresolvable::UnattributedRelay {
                webhook_id: webhook_id.clone(),
            })
        }
        (None, None) if metadata.is_bot => return IdentityResolution::Unresolvable(Unresolvable::Bot),
        (None, None) if raw.is_empty() => {
            return IdentityResolution::Unresolvable(Unresolvable::EmptySender)
        }
        (None, None) => ActingIdentity {
            user_id: raw.to_owned(),
            proxied: false,
        },
    };

    TraceEvent::IdentityResolved {
        raw_sender_id: raw.to_owned(),
        user_id: resolved.user_id.clone(),
        proxied: resolved.proxied,
    }
    .emit();

    IdentityResolution::Resolved(resolved)
}
