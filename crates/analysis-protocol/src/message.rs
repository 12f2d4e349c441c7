//! Envelope and message variants.

use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;
use crate::analysis::{AnalysisComplete, AnalysisRequest};
use crate::fragment::Fragment;
use crate::statistics::StatisticSample;

/// Opaque value chosen by the sender and echoed on every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(pub i64);

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Unit of transmission: one JSON line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version of the sender.
    pub version: u16,
    /// Correlation token echoed by responses.
    pub token: CorrelationToken,
    /// Payload.
    pub message: Message,
}

impl Envelope {
    /// Wraps `message` with the current protocol version.
    #[must_use]
    pub const fn new(token: CorrelationToken, message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token,
            message,
        }
    }

    /// Builds a response carrying this envelope's token.
    #[must_use]
    pub const fn reply(&self, message: Message) -> Self {
        Self::new(self.token, message)
    }
}

/// Closed set of messages exchanged between clients and the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Identity claim from a client, echoed back with `succeeded` set.
    Handshake(Handshake),
    /// Request to run one analysis.
    AnalysisRequest(AnalysisRequest),
    /// Free-text progress of a running analysis.
    AnalysisProgress(AnalysisProgress),
    /// Successful analysis outcome.
    AnalysisComplete(AnalysisComplete),
    /// Failed analysis outcome.
    AnalysisFailed(AnalysisFailed),
    /// Query of the statistics series.
    StatisticsRequest(StatisticsRequest),
    /// Samples matching a statistics query.
    StatisticsResponse(StatisticsResponse),
    /// Statistics query that could not be served.
    StatisticsFailed(RequestFailed),
    /// Remote stop request.
    StopServerRequest(AdminRequest),
    /// Outcome of a remote stop request.
    StopServerResponse(AdminResponse),
    /// Remote stop request that could not be processed.
    StopServerFailed(RequestFailed),
    /// Remote restart request.
    RestartServerRequest(AdminRequest),
    /// Outcome of a remote restart request.
    RestartServerResponse(AdminResponse),
    /// Remote restart request that could not be processed.
    RestartServerFailed(RequestFailed),
    /// Slice of a message too large to send in one piece.
    Fragment(Fragment),
    /// Client heartbeat keeping an idle connection open. Never answered.
    KeepAlive,
}

impl Message {
    /// Stable wire tag of the variant, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::AnalysisRequest(_) => "analysis_request",
            Self::AnalysisProgress(_) => "analysis_progress",
            Self::AnalysisComplete(_) => "analysis_complete",
            Self::AnalysisFailed(_) => "analysis_failed",
            Self::StatisticsRequest(_) => "statistics_request",
            Self::StatisticsResponse(_) => "statistics_response",
            Self::StatisticsFailed(_) => "statistics_failed",
            Self::StopServerRequest(_) => "stop_server_request",
            Self::StopServerResponse(_) => "stop_server_response",
            Self::StopServerFailed(_) => "stop_server_failed",
            Self::RestartServerRequest(_) => "restart_server_request",
            Self::RestartServerResponse(_) => "restart_server_response",
            Self::RestartServerFailed(_) => "restart_server_failed",
            Self::Fragment(_) => "fragment",
            Self::KeepAlive => "keep_alive",
        }
    }
}

/// Identity claim. Clients send `succeeded = false`; the server echoes the
/// alias with the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Requested alias, compared case-sensitively.
    pub alias: String,
    /// Whether the server accepted the alias.
    #[serde(default)]
    pub succeeded: bool,
}

impl Handshake {
    /// Client-side handshake for `alias`.
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            succeeded: false,
        }
    }

    /// Server reply carrying `succeeded`.
    #[must_use]
    pub fn answered(&self, succeeded: bool) -> Self {
        Self {
            alias: self.alias.clone(),
            succeeded,
        }
    }
}

/// Progress text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    /// Human-readable step description.
    pub text: String,
}

/// Failure report for an analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFailed {
    /// Error chain rendered as text.
    pub description: String,
    /// Location of uploaded partial outputs, when any were uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// Statistics query over the half-open window `[from_ms, to_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRequest {
    /// Inclusive lower bound, Unix milliseconds.
    pub from_ms: u64,
    /// Exclusive upper bound, Unix milliseconds.
    pub to_ms: u64,
}

/// Samples recorded inside the requested window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsResponse {
    /// Samples ordered by recording time.
    pub statistics: Vec<StatisticSample>,
}

/// Administrative request authenticated by an encrypted password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    /// Password cipher text.
    pub password: String,
}

/// Administrative outcome. `succeeded = false` means the password was wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    /// Whether the request was accepted.
    pub succeeded: bool,
}

/// Non-analysis request that failed with an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailed {
    /// Error chain rendered as text.
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_the_token() {
        let request = Envelope::new(
            CorrelationToken(-7),
            Message::Handshake(Handshake::new("bench-3")),
        );
        let reply = request.reply(Message::Handshake(Handshake::new("bench-3").answered(true)));
        assert_eq!(reply.token, CorrelationToken(-7));
    }

    #[test]
    fn handshake_uses_kind_tag() {
        let envelope = Envelope::new(
            CorrelationToken(1),
            Message::Handshake(Handshake::new("alpha")),
        );
        let value = serde_json::to_value(&envelope).expect("serialise envelope");
        assert_eq!(value["message"]["kind"], "handshake");
        assert_eq!(value["message"]["alias"], "alpha");
        assert_eq!(value["token"], 1);
    }

    #[test]
    fn missing_succeeded_defaults_to_false() {
        let parsed: Message =
            serde_json::from_str(r#"{"kind":"handshake","alias":"x"}"#).expect("parse handshake");
        assert_eq!(parsed, Message::Handshake(Handshake::new("x")));
    }

    #[test]
    fn keep_alive_is_a_bare_kind() {
        let parsed: Message =
            serde_json::from_str(r#"{"kind":"keep_alive"}"#).expect("parse keep-alive");
        assert_eq!(parsed, Message::KeepAlive);
        assert_eq!(parsed.kind(), "keep_alive");
    }
}
