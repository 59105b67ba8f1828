use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    /// Information unrelated to an action the user took
    Info,
    /// Positive confirmation of a user action
    Success,
    /// Nothing failed, but the outcome needs the user's attention
    Warning,
    Error,
}

impl FlashKind {
    pub fn css_class(&self) -> &'static str {
        match self {
            FlashKind::Info => "alert-info",
            FlashKind::Success => "alert-success",
            FlashKind::Warning => "",
            FlashKind::Error => "alert-error",
        }
    }
}

/// Transient notification shown once after a redirect or redisplay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub message: String,
    pub kind: FlashKind,
}

impl FlashMessage {
    pub fn new(message: impl Into<String>, kind: FlashKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, FlashKind::Success)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, FlashKind::Error)
    }

    pub fn css_class(&self) -> &'static str {
        self.kind.css_class()
    }
}
