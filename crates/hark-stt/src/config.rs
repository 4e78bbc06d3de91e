//! Recognizer configuration sent as the opening message of a remote stream.

use hark_core::AudioFormat;
use serde::{Deserialize, Serialize};

use crate::error::SttError;

/// Default BCP-47 language tag.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Short-utterance model, tuned for command-length speech.
pub const MODEL_SHORT: &str = "latest_short";

/// Long-form model for dictation-length audio.
pub const MODEL_LONG: &str = "latest_long";

/// Default recognition model.
pub const DEFAULT_MODEL: &str = MODEL_SHORT;

/// Bias weight applied to phrase hints.
pub const DEFAULT_PHRASE_BOOST: f32 = 20.0;

/// A set of phrases the recognizer should favor, with a bias weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechContext {
    /// Phrases to bias toward.
    pub phrases: Vec<String>,
    /// Bias strength. Higher means stronger preference.
    #[serde(default = "default_boost")]
    pub boost: f32,
}

fn default_boost() -> f32 {
    DEFAULT_PHRASE_BOOST
}

impl SpeechContext {
    /// A context with the default boost weight.
    #[must_use]
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases,
            boost: DEFAULT_PHRASE_BOOST,
        }
    }

    /// A context with an explicit boost weight.
    #[must_use]
    pub fn with_boost(phrases: Vec<String>, boost: f32) -> Self {
        Self { phrases, boost }
    }
}

/// Configuration for one recognition stream.
///
/// Serialized as the payload of the `start` message; the audio format
/// fields are flattened alongside the recognizer options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizerConfig {
    /// BCP-47 language tag for recognition.
    pub language: String,
    /// Additional candidate languages the recognizer may detect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_languages: Vec<String>,
    /// Recognition model name.
    pub model: String,
    /// PCM format of the audio that will follow.
    #[serde(flatten)]
    pub format: AudioFormat,
    /// Phrase-bias hints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<SpeechContext>,
    /// Whether the service should insert punctuation.
    #[serde(default = "default_punctuation")]
    pub punctuation: bool,
    /// End the stream after the first final result. Tied to the short
    /// model; a hot swap re-sends whatever value the session started with.
    #[serde(default)]
    pub single_utterance: bool,
}

fn default_punctuation() -> bool {
    true
}

impl RecognizerConfig {
    /// Config with defaults for everything except the audio format.
    #[must_use]
    pub fn new(format: AudioFormat) -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            alternative_languages: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            format,
            contexts: Vec::new(),
            punctuation: true,
            single_utterance: DEFAULT_MODEL == MODEL_SHORT,
        }
    }

    /// Set the recognition language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set candidate alternative languages.
    #[must_use]
    pub fn with_alternative_languages(mut self, languages: Vec<String>) -> Self {
        self.alternative_languages = languages;
        self
    }

    /// Select the recognition model. Switching to or away from the short
    /// model updates the single-utterance flag to match.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.single_utterance = self.model == MODEL_SHORT;
        self
    }

    /// Add phrase hints at the default boost.
    #[must_use]
    pub fn with_phrases(mut self, phrases: Vec<String>) -> Self {
        if !phrases.is_empty() {
            self.contexts.push(SpeechContext::new(phrases));
        }
        self
    }

    /// Toggle automatic punctuation.
    #[must_use]
    pub fn with_punctuation(mut self, punctuation: bool) -> Self {
        self.punctuation = punctuation;
        self
    }

    /// Check that the negotiated parameters are usable.
    pub fn validate(&self) -> Result<(), SttError> {
        if self.language.trim().is_empty() {
            return Err(SttError::Config("language must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(SttError::Config("model must not be empty".into()));
        }
        self.format
            .validate()
            .map_err(|e| SttError::Config(e.to_string()))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
