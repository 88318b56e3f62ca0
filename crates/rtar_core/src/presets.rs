//! Template replies for join/like/follow/gift events.

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const USERNAME_PLACEHOLDER: &str = "{username}";

/// Templates for one event kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetSet {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub replies: Vec<String>,
}

/// All preset sets keyed by kind (`join`, `like`, `follow`, `gift`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetStore {
    sets: BTreeMap<String, PresetSet>,
}

fn set(description: &str, replies: &[&str]) -> PresetSet {
    PresetSet {
        description: description.to_string(),
        replies: replies.iter().map(|r| r.to_string()).collect(),
    }
}

impl PresetStore {
    pub fn from_sets(sets: impl IntoIterator<Item = (String, PresetSet)>) -> Self {
        Self {
            sets: sets.into_iter().collect(),
        }
    }

    /// Built-in templates written when no preset file exists
    pub fn defaults() -> Self {
        Self::from_sets([
            (
                "join".to_string(),
                set(
                    "Reply when someone joins the stream",
                    &[
                        "Welcome {username} to the livestream!",
                        "Hello {username}, welcome to the stream!",
                        "{username} is here, welcome welcome!",
                        "Hi {username}, let's watch the stream together!",
                    ],
                ),
            ),
            (
                "like".to_string(),
                set(
                    "Reply when someone likes the stream",
                    &[
                        "Thank you {username} for the like!",
                        "{username} liked it, thanks for the support!",
                        "Got {username}'s like, so happy!",
                    ],
                ),
            ),
            (
                "follow".to_string(),
                set(
                    "Reply when someone follows",
                    &[
                        "Thank you {username} for following!",
                        "Welcome new follower {username}!",
                        "Thanks {username} for becoming a new fan!",
                    ],
                ),
            ),
            (
                "gift".to_string(),
                set(
                    "Reply when someone sends a gift",
                    &[
                        "Thank you {username} for the gift!",
                        "Wow, {username}'s gift is amazing!",
                        "Thank you {username} for the generous support!",
                    ],
                ),
            ),
        ])
    }

    /// Load presets from `path`, writing the defaults there if it is missing
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            let store = Self::defaults();
            store.save(path).await?;
            tracing::info!("Created default presets at {}", path.display());
            return Ok(store);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::file_io(path.display().to_string(), e))?;
        serde_json::from_str(&content).map_err(|e| CoreError::SerializationError {
            data_type: format!("presets ({})", path.display()),
            cause: e,
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| CoreError::SerializationError {
                data_type: "presets".to_string(),
                cause: e,
            })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::file_io(parent.display().to_string(), e))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| CoreError::file_io(path.display().to_string(), e))
    }

    /// Whether `kind` has at least one template
    pub fn has_templates(&self, kind: &str) -> bool {
        self.sets.get(kind).is_some_and(|s| !s.replies.is_empty())
    }

    /// Pick a template for `kind` uniformly at random and fill in the name
    pub fn render<R: Rng + ?Sized>(
        &self,
        kind: &str,
        username: &str,
        rng: &mut R,
    ) -> Option<String> {
        let template = self.sets.get(kind)?.replies.choose(rng)?;
        Some(template.replace(USERNAME_PLACEHOLDER, username))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PresetSet)> {
        self.sets.iter()
    }
}
