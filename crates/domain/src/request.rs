use serde::{Deserialize, Serialize};

/// One inbound generation request, as handed over by the chat adapter.
///
/// The user id is the already-resolved acting identity; relay indirection
/// is settled before a request is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub channel_id: String,
    pub personality_id: String,
    pub user_id: String,
    pub text: String,
    #[serde(default)]
    pub image_refs: Vec<String>,
}

impl GenerationRequest {
    pub fn new(
        channel_id: impl Into<String>,
        personality_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            personality_id: personality_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            image_refs: Vec::new(),
        }
    }

    pub fn with_images(mut self, image_refs: Vec<String>) -> Self {
        self.image_refs = image_refs;
        self
    }
}

/// What a completed job hands back to every waiter on its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub result_text: String,
    pub model_used: String,
}
