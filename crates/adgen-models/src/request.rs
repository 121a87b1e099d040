//! Request-level options.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What narrates the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Synthesized voice over the product still
    #[default]
    Voiceover,
    /// Talking-head avatar inset next to the product
    Avatar,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Voiceover => "voiceover",
            GenerationMode::Avatar => "avatar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "voiceover" | "voice" => Some(GenerationMode::Voiceover),
            "avatar" => Some(GenerationMode::Avatar),
            _ => None,
        }
    }
}

/// What to do with a background image in a disallowed format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundFallback {
    /// Fail validation
    #[default]
    Reject,
    /// Drop the image and use the background color instead
    Color,
}

impl BackgroundFallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundFallback::Reject => "reject",
            BackgroundFallback::Color => "color",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(BackgroundFallback::Reject),
            "color" => Some(BackgroundFallback::Color),
            _ => None,
        }
    }
}
