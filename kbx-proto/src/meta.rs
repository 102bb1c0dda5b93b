//! Shared object envelope and the `Status` error body.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Time;

/// Longest raw body kept in a synthesized status message.
const MAX_SYNTHESIZED_MESSAGE: usize = 1024;

crate::wire_enum! {
    /// Outcome recorded in a [`Status`].
    pub enum StatusPhase {
        /// The operation succeeded.
        Success => "Success",
        /// The operation failed.
        Failure => "Failure",
    }
}

/// `apiVersion` and `kind` of a serialized object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// Group/version, e.g. `apps/v1`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// Object kind, e.g. `Deployment`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

/// Metadata common to every persisted object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within its namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Server-side name generation prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    /// Namespace of a namespaced object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Server-assigned unique id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Opaque version used for optimistic concurrency and watch resumption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Spec generation counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    /// Creation instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<Time>,
    /// Graceful deletion deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<Time>,
    /// Identifying labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Non-identifying annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Deletion blockers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

/// Metadata of a list response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// Version of the collection; resume point for a follow-up watch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Continuation token for the next page.
    #[serde(
        default,
        rename = "continue",
        skip_serializing_if = "Option::is_none"
    )]
    pub continue_token: Option<String>,
    /// Items not yet returned when paginating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<i64>,
}

/// A list response of `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList<T> {
    /// Wire type of the list.
    #[serde(flatten)]
    pub types: TypeMeta,
    /// List metadata.
    #[serde(default)]
    pub metadata: ListMeta,
    /// The listed objects.
    pub items: Vec<T>,
}

/// Server-reported outcome of an operation, returned as an error body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// `Success` or `Failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusPhase>,
    /// HTTP-equivalent status code.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub code: u16,
    /// Machine-readable reason, e.g. `NotFound`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Extended data about the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

/// Extended data attached to a [`Status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    /// Name of the affected resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// API group of the affected resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Kind of the affected resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// UID of the affected resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Individual causes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StatusCause>,
    /// Suggested client back-off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u32>,
}

/// A single cause inside [`StatusDetails`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCause {
    /// Machine-readable cause, e.g. `FieldValueInvalid` or `ExitCode`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Offending field path.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(code: &u16) -> bool {
    *code == 0
}

impl Status {
    /// A `Success` status.
    pub fn success() -> Self {
        Self {
            status: Some(StatusPhase::Success),
            ..Self::default()
        }
    }

    /// A `Failure` status with the given code, reason and message.
    pub fn failure(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(StatusPhase::Failure),
            code,
            reason: reason.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Builds a failure from an HTTP code and an undecodable body.
    pub fn synthesize(code: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let trimmed = text.trim();
        let message = if trimmed.is_empty() {
            format!("unexpected response status {code}")
        } else {
            trimmed.chars().take(MAX_SYNTHESIZED_MESSAGE).collect()
        };
        Self::failure(code, reason_for_code(code), message)
    }

    /// Whether the status reports success.
    pub fn is_success(&self) -> bool {
        self.status == Some(StatusPhase::Success)
    }

    /// Remote process exit code carried by an exec session's final status.
    ///
    /// `Success` maps to `0`; a `NonZeroExitCode` failure yields the code
    /// from its `ExitCode` cause. Other failures yield `None`.
    pub fn exit_code(&self) -> Option<i32> {
        if self.is_success() {
            return Some(0);
        }
        if self.reason != "NonZeroExitCode" {
            return None;
        }
        self.details
            .as_ref()?
            .causes
            .iter()
            .find(|c| c.reason == "ExitCode")
            .and_then(|c| c.message.parse().ok())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reason.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{} ({}): {}", self.reason, self.code, self.message),
            (false, true) => write!(f, "{} ({})", self.reason, self.code),
            (true, false) => write!(f, "{} ({})", self.message, self.code),
            (true, true) => write!(f, "status {}", self.code),
        }
    }
}

/// Reason string conventionally paired with an HTTP code.
pub const fn reason_for_code(code: u16) -> &'static str {
    match code {
        400 => "BadRequest",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        405 => "MethodNotAllowed",
        406 => "NotAcceptable",
        409 => "Conflict",
        410 => "Expired",
        413 => "RequestEntityTooLarge",
        415 => "UnsupportedMediaType",
        422 => "Invalid",
        429 => "TooManyRequests",
        500 => "InternalError",
        503 => "ServiceUnavailable",
        504 => "Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_status() {
        let body = br#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Failure",
            "message":"pods \"web\" not found","reason":"NotFound",
            "details":{"name":"web","kind":"pods"},"code":404}"#;
        let status: Status = serde_json::from_slice(body).unwrap();
        assert_eq!(status.code, 404);
        assert_eq!(status.reason, "NotFound");
        assert_eq!(status.status, Some(StatusPhase::Failure));
        assert_eq!(status.details.unwrap().name, "web");
    }

    #[test]
    fn synthesized_status_keeps_code_and_body() {
        let s = Status::synthesize(502, b"<html>bad gateway</html>");
        assert_eq!(s.code, 502);
        assert_eq!(s.reason, "Unknown");
        assert_eq!(s.message, "<html>bad gateway</html>");

        let s = Status::synthesize(503, b"");
        assert_eq!(s.reason, "ServiceUnavailable");
        assert_eq!(s.message, "unexpected response status 503");
    }

    #[test]
    fn exit_codes() {
        let ok: Status = serde_json::from_str(r#"{"metadata":{},"status":"Success"}"#).unwrap();
        assert_eq!(ok.exit_code(), Some(0));

        let failed: Status = serde_json::from_str(
            r#"{"status":"Failure","reason":"NonZeroExitCode",
                "message":"command terminated with non-zero exit code: error executing command [sh -c exit 3], exit code 3",
                "details":{"causes":[{"reason":"ExitCode","message":"3"}]}}"#,
        )
        .unwrap();
        assert_eq!(failed.exit_code(), Some(3));

        assert_eq!(Status::failure(500, "InternalError", "boom").exit_code(), None);
    }

    #[test]
    fn list_meta_continue_key() {
        let list: ObjectList<ObjectMeta> = serde_json::from_str(
            r#"{"apiVersion":"v1","kind":"List","metadata":{"resourceVersion":"42","continue":"abc"},"items":[{"name":"a"}]}"#,
        )
        .unwrap();
        assert_eq!(list.types.kind, "List");
        assert_eq!(list.metadata.continue_token.as_deref(), Some("abc"));
        assert_eq!(list.items[0].name.as_deref(), Some("a"));
    }

    #[test]
    fn empty_meta_encodes_as_empty_object() {
        assert_eq!(serde_json::to_string(&ObjectMeta::default()).unwrap(), "{}");
    }
}
