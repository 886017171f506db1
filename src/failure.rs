//! Failure taxonomy and classification for every external call in the workflow.
//!
//! Collaborator errors are reduced to a [`FailureSignal`], which [`classify`] maps to an
//! [`ErrorClassification`]. The classification decides whether the retry engine may try
//! again and what the UI should offer the user (retry, skip or abort).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Patterns that identify throttling or temporary unavailability of a remote service.
pub const TRANSIENT_ERROR_PATTERN: &str = r"(?i)throttl|rate.?limit|too\s+many\s+requests|\b429\b|\b503\b|service\s+unavailable|temporarily|overloaded|try\s+again|ECONNRESET|connection\s+reset";

/// Patterns that identify broken credentials or missing configuration.
pub const CREDENTIAL_ERROR_PATTERN: &str = r"(?i)credential|unauthori[sz]ed|forbidden|access\s+denied|invalid\s+api\s+key|expired\s+token|\b401\b|\b403\b|not\s+configured|missing\s+config";

/// The three failure kinds that govern retry and advancement policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retry with backoff, bounded attempts, then surface.
    Transient,
    /// Fail fast, never retried.
    Permanent,
    /// The step may produce a partial or empty result and the workflow continues.
    Degraded,
}

impl ErrorKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "Transient",
            ErrorKind::Permanent => "Permanent",
            ErrorKind::Degraded => "Degraded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Action the UI should offer for a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Retry,
    Skip,
    Abort,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SuggestedAction::Retry => "retry",
            SuggestedAction::Skip => "skip",
            SuggestedAction::Abort => "abort",
        };
        write!(f, "{}", label)
    }
}

/// Result of classifying a single failure. Derived fresh from each failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub user_message: String,
    pub suggested_action: SuggestedAction,
}

impl ErrorClassification {
    fn new(kind: ErrorKind, retryable: bool, message: &str, action: SuggestedAction) -> Self {
        Self {
            kind,
            retryable,
            user_message: message.to_string(),
            suggested_action: action,
        }
    }
}

/// What a collaborator reported when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    /// The LLM endpoint is unavailable or overloaded.
    ServiceUnavailable(String),
    /// The LLM endpoint throttled the request.
    Throttled(String),
    /// Credentials were rejected or are malformed.
    InvalidCredentials(String),
    /// A required configuration value is missing or invalid.
    MissingConfiguration(String),
    /// The diagram tool could not be reached (spawn, handshake or transport failure).
    ToolUnreachable(String),
    /// The diagram tool did not answer in time.
    ToolTimeout(Duration),
    /// The diagram tool answered but reported a rendering failure.
    ToolFailure(String),
    /// A call reported success but left no usable artifact behind.
    NoArtifacts(String),
    /// The document serializer is missing or misconfigured.
    SerializerUnavailable(String),
    /// A step exceeded its hard timeout. Only optional steps can be skipped past it.
    StepTimeout { after: Duration, optional: bool },
    /// The caller asked for something the workflow cannot do in its current state.
    InvalidRequest(String),
    /// Anything not covered above.
    Uncategorized(String),
}

impl FailureSignal {
    /// Builds a signal from free-form error text using the known message patterns.
    ///
    /// Text matching neither pattern stays uncategorized, which classifies as permanent.
    pub fn from_message(message: &str) -> Self {
        if is_credential_error(message) {
            FailureSignal::InvalidCredentials(message.to_string())
        } else if is_transient_error(message) {
            if message.to_lowercase().contains("throttl") {
                FailureSignal::Throttled(message.to_string())
            } else {
                FailureSignal::ServiceUnavailable(message.to_string())
            }
        } else {
            FailureSignal::Uncategorized(message.to_string())
        }
    }

    /// Human-readable detail carried by the signal.
    pub fn detail(&self) -> String {
        match self {
            FailureSignal::ServiceUnavailable(d)
            | FailureSignal::Throttled(d)
            | FailureSignal::InvalidCredentials(d)
            | FailureSignal::MissingConfiguration(d)
            | FailureSignal::ToolUnreachable(d)
            | FailureSignal::ToolFailure(d)
            | FailureSignal::NoArtifacts(d)
            | FailureSignal::SerializerUnavailable(d)
            | FailureSignal::InvalidRequest(d)
            | FailureSignal::Uncategorized(d) => d.clone(),
            FailureSignal::ToolTimeout(after) => {
                format!("diagram tool timed out after {}s", after.as_secs())
            }
            FailureSignal::StepTimeout { after, .. } => {
                format!("step timed out after {}s", after.as_secs())
            }
        }
    }
}

/// Checks if error text looks like throttling or temporary unavailability.
pub fn is_transient_error(text: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    match RE.get_or_init(|| Regex::new(TRANSIENT_ERROR_PATTERN).ok()) {
        Some(re) => re.is_match(text),
        None => {
            let lower = text.to_lowercase();
            lower.contains("throttl")
                || lower.contains("rate limit")
                || lower.contains("unavailable")
                || lower.contains("try again")
        }
    }
}

/// Checks if error text looks like rejected credentials or missing configuration.
pub fn is_credential_error(text: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    match RE.get_or_init(|| Regex::new(CREDENTIAL_ERROR_PATTERN).ok()) {
        Some(re) => re.is_match(text),
        None => {
            let lower = text.to_lowercase();
            lower.contains("credential")
                || lower.contains("unauthorized")
                || lower.contains("access denied")
        }
    }
}

/// Maps a failure signal to its classification.
///
/// Unknown failures are permanent: silent infinite retry on unclassified errors is not
/// allowed.
pub fn classify(signal: &FailureSignal) -> ErrorClassification {
    use ErrorKind::*;
    use SuggestedAction::*;

    match signal {
        FailureSignal::ServiceUnavailable(_) => ErrorClassification::new(
            Transient,
            true,
            "The analysis service is temporarily unavailable",
            Retry,
        ),
        FailureSignal::Throttled(_) => ErrorClassification::new(
            Transient,
            true,
            "The analysis service is throttling requests",
            Retry,
        ),
        FailureSignal::ToolFailure(_) => ErrorClassification::new(
            Transient,
            true,
            "The diagram tool failed to render the diagram",
            Retry,
        ),
        FailureSignal::InvalidCredentials(_) => ErrorClassification::new(
            Permanent,
            false,
            "Credentials were rejected; check the service credentials",
            Abort,
        ),
        FailureSignal::MissingConfiguration(_) => ErrorClassification::new(
            Permanent,
            false,
            "Required configuration is missing or invalid",
            Abort,
        ),
        FailureSignal::ToolUnreachable(_) => ErrorClassification::new(
            Degraded,
            false,
            "The diagram tool is unreachable; diagrams can be skipped",
            Skip,
        ),
        FailureSignal::ToolTimeout(_) => ErrorClassification::new(
            Degraded,
            false,
            "The diagram tool timed out; diagrams can be skipped",
            Skip,
        ),
        FailureSignal::NoArtifacts(_) => ErrorClassification::new(
            Degraded,
            false,
            "No diagrams were produced; diagrams can be skipped",
            Skip,
        ),
        FailureSignal::StepTimeout { optional: true, .. } => ErrorClassification::new(
            Degraded,
            false,
            "The step took too long and was stopped; it can be skipped",
            Skip,
        ),
        FailureSignal::StepTimeout { optional: false, .. } => ErrorClassification::new(
            Transient,
            true,
            "The step took too long and was stopped; run it again",
            Retry,
        ),
        FailureSignal::SerializerUnavailable(_) => ErrorClassification::new(
            Permanent,
            false,
            "Report export is unavailable; use the structured data export instead",
            Abort,
        ),
        FailureSignal::InvalidRequest(_) => {
            ErrorClassification::new(Permanent, false, "The request is not valid now", Abort)
        }
        FailureSignal::Uncategorized(_) => ErrorClassification::new(
            Permanent,
            false,
            "An unexpected error occurred",
            Abort,
        ),
    }
}

/// Collaborator errors that can describe themselves as a [`FailureSignal`].
pub trait Classify {
    fn signal(&self) -> FailureSignal;
}

impl Classify for FailureSignal {
    fn signal(&self) -> FailureSignal {
        self.clone()
    }
}

/// A failure that has been classified, carrying the number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{} ({} failure after {} attempt(s)): {}", .classification.user_message, .classification.kind, .attempts, .detail)]
pub struct ClassifiedError {
    pub classification: ErrorClassification,
    pub detail: String,
    pub attempts: u32,
}

impl ClassifiedError {
    pub fn from_signal(signal: FailureSignal) -> Self {
        Self {
            classification: classify(&signal),
            detail: signal.detail(),
            attempts: 1,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.classification.kind
    }

    /// Reclassifies as Degraded for failures inside an optional step, keeping the message.
    pub fn degrade(mut self) -> Self {
        self.classification.kind = ErrorKind::Degraded;
        self.classification.retryable = false;
        self.classification.suggested_action = SuggestedAction::Skip;
        self
    }

    pub fn suggested_action(&self) -> SuggestedAction {
        self.classification.suggested_action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_llm_throttling_is_transient_and_retryable() {
        let c = classify(&FailureSignal::Throttled("ThrottlingException".into()));
        assert_eq!(c.kind, ErrorKind::Transient);
        assert!(c.retryable);
        assert_eq!(c.suggested_action, SuggestedAction::Retry);
    }

    #[test]
    fn test_credentials_are_permanent_abort() {
        let c = classify(&FailureSignal::InvalidCredentials("bad key".into()));
        assert_eq!(c.kind, ErrorKind::Permanent);
        assert!(!c.retryable);
        assert_eq!(c.suggested_action, SuggestedAction::Abort);
    }

    #[test]
    fn test_diagram_tool_timeout_is_degraded_skip() {
        let c = classify(&FailureSignal::ToolTimeout(Duration::from_secs(180)));
        assert_eq!(c.kind, ErrorKind::Degraded);
        assert!(!c.retryable);
        assert_eq!(c.suggested_action, SuggestedAction::Skip);
    }

    #[test]
    fn test_step_timeout_action_depends_on_optionality() {
        let after = Duration::from_secs(900);
        let optional = classify(&FailureSignal::StepTimeout {
            after,
            optional: true,
        });
        assert_eq!(optional.kind, ErrorKind::Degraded);
        assert_eq!(optional.suggested_action, SuggestedAction::Skip);

        let mandatory = classify(&FailureSignal::StepTimeout {
            after,
            optional: false,
        });
        assert_eq!(mandatory.kind, ErrorKind::Transient);
        assert!(mandatory.retryable);
        assert_eq!(mandatory.suggested_action, SuggestedAction::Retry);
    }

    #[test]
    fn test_serializer_unavailable_is_permanent() {
        let c = classify(&FailureSignal::SerializerUnavailable("no backend".into()));
        assert_eq!(c.kind, ErrorKind::Permanent);
        assert_eq!(c.suggested_action, SuggestedAction::Abort);
    }

    #[test]
    fn test_degrade_keeps_message_and_attempts() {
        let err = ClassifiedError::from_signal(FailureSignal::ToolFailure("boom".into()))
            .with_attempts(3)
            .degrade();
        assert_eq!(err.kind(), ErrorKind::Degraded);
        assert!(!err.classification.retryable);
        assert_eq!(err.suggested_action(), SuggestedAction::Skip);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.detail, "boom");
    }

    #[test]
    fn test_from_message_recognizes_patterns() {
        assert!(matches!(
            FailureSignal::from_message("ThrottlingException: Rate exceeded"),
            FailureSignal::Throttled(_)
        ));
        assert!(matches!(
            FailureSignal::from_message("HTTP 503 Service Unavailable"),
            FailureSignal::ServiceUnavailable(_)
        ));
        assert!(matches!(
            FailureSignal::from_message("UnrecognizedClientException: invalid api key"),
            FailureSignal::InvalidCredentials(_)
        ));
        assert!(matches!(
            FailureSignal::from_message("segfault in renderer"),
            FailureSignal::Uncategorized(_)
        ));
    }

    #[test]
    fn test_classified_error_display_includes_message_and_detail() {
        let err = ClassifiedError::from_signal(FailureSignal::Throttled("slow down".into()))
            .with_attempts(3);
        let text = err.to_string();
        assert!(text.contains("throttling"), "got: {}", text);
        assert!(text.contains("3 attempt"), "got: {}", text);
        assert!(text.contains("slow down"), "got: {}", text);
    }

    proptest! {
        #[test]
        fn uncategorized_text_never_retries(msg in "[a-z ]{0,40}") {
            let signal = FailureSignal::Uncategorized(msg);
            let c = classify(&signal);
            prop_assert!(!c.retryable);
            prop_assert_eq!(c.kind, ErrorKind::Permanent);
        }

        #[test]
        fn only_transient_kinds_are_retryable(msg in ".{0,40}") {
            let c = classify(&FailureSignal::from_message(&msg));
            prop_assert_eq!(c.retryable, c.kind == ErrorKind::Transient);
        }
    }
}
