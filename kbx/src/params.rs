//! Query parameters of the typed API calls.

use kbx_proto::{APPLY_PATCH, CodecRegistry, Document, JSON_PATCH, MERGE_PATCH, STRATEGIC_MERGE_PATCH};
use serde::Serialize;

use crate::client::ApiRequest;
use crate::error::{Error, Result};

kbx_proto::wire_enum! {
    /// How dependents are handled when an owner is deleted.
    pub enum PropagationPolicy {
        /// Leave dependents in place.
        Orphan => "Orphan",
        /// Delete dependents in the background.
        Background => "Background",
        /// Delete dependents before the owner.
        Foreground => "Foreground",
    }
}

/// Filters and paging for `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ListParams {
    /// `labelSelector`, e.g. `app=web,tier!=db`.
    pub label_selector: Option<String>,
    /// `fieldSelector`, e.g. `status.phase=Running`.
    pub field_selector: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
    /// Continuation token from a previous page.
    pub continue_token: Option<String>,
    /// Server-side timeout.
    pub timeout_seconds: Option<u32>,
}

impl ListParams {
    /// Restricts to objects matching the label selector.
    #[must_use]
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_owned());
        self
    }

    /// Restricts to objects matching the field selector.
    #[must_use]
    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_owned());
        self
    }

    /// Limits the page size.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continues from a previous page.
    #[must_use]
    pub fn continue_token(mut self, token: &str) -> Self {
        self.continue_token = Some(token.to_owned());
        self
    }

    pub(crate) fn apply(&self, request: ApiRequest) -> ApiRequest {
        request
            .query_opt("labelSelector", self.label_selector.as_deref())
            .query_opt("fieldSelector", self.field_selector.as_deref())
            .query_opt("limit", self.limit)
            .query_opt("continue", self.continue_token.as_deref())
            .query_opt("timeoutSeconds", self.timeout_seconds)
    }
}

/// Filters for `watch`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct WatchParams {
    /// `labelSelector`.
    pub label_selector: Option<String>,
    /// `fieldSelector`.
    pub field_selector: Option<String>,
    /// Server-side watch duration.
    pub timeout_seconds: Option<u32>,
    /// Ask for `BOOKMARK` events.
    pub bookmarks: bool,
}

impl Default for WatchParams {
    fn default() -> Self {
        Self {
            label_selector: None,
            field_selector: None,
            timeout_seconds: None,
            bookmarks: true,
        }
    }
}

impl WatchParams {
    /// Restricts to objects matching the label selector.
    #[must_use]
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_owned());
        self
    }

    /// Restricts to objects matching the field selector.
    #[must_use]
    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_owned());
        self
    }

    /// Server-side watch duration.
    #[must_use]
    pub const fn timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Turns bookmark events off.
    #[must_use]
    pub const fn disable_bookmarks(mut self) -> Self {
        self.bookmarks = false;
        self
    }

    pub(crate) fn apply(&self, request: ApiRequest) -> ApiRequest {
        let request = request
            .query_opt("labelSelector", self.label_selector.as_deref())
            .query_opt("fieldSelector", self.field_selector.as_deref())
            .query_opt("timeoutSeconds", self.timeout_seconds);
        if self.bookmarks {
            request.query("allowWatchBookmarks", "true")
        } else {
            request
        }
    }
}

/// Options for `create` and `replace`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct PostParams {
    /// Validate without persisting.
    pub dry_run: bool,
    /// Manager name recorded in managed fields.
    pub field_manager: Option<String>,
}

impl PostParams {
    /// Validate without persisting.
    #[must_use]
    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Sets the field manager.
    #[must_use]
    pub fn field_manager(mut self, manager: &str) -> Self {
        self.field_manager = Some(manager.to_owned());
        self
    }

    pub(crate) fn apply(&self, request: ApiRequest) -> ApiRequest {
        dry_run(request, self.dry_run).query_opt("fieldManager", self.field_manager.as_deref())
    }
}

/// Options for `patch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct PatchParams {
    /// Validate without persisting.
    pub dry_run: bool,
    /// Manager name; required for server-side apply.
    pub field_manager: Option<String>,
    /// Take ownership of conflicting fields (apply only).
    pub force: bool,
}

impl PatchParams {
    /// Server-side apply as `manager`.
    pub fn apply(manager: &str) -> Self {
        Self {
            field_manager: Some(manager.to_owned()),
            ..Self::default()
        }
    }

    /// Validate without persisting.
    #[must_use]
    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Take ownership of conflicting fields.
    #[must_use]
    pub const fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub(crate) fn populate<P>(&self, patch: &Patch<P>, request: ApiRequest) -> Result<ApiRequest> {
        if matches!(patch, Patch::Apply(_)) && self.field_manager.is_none() {
            return Err(Error::Config(
                "server-side apply requires a field manager".into(),
            ));
        }
        if self.force && !matches!(patch, Patch::Apply(_)) {
            return Err(Error::Config("force is only valid for server-side apply".into()));
        }
        let request = dry_run(request, self.dry_run)
            .query_opt("fieldManager", self.field_manager.as_deref());
        Ok(if self.force {
            request.query("force", "true")
        } else {
            request
        })
    }
}

/// Options for `delete`, sent as query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct DeleteParams {
    /// Validate without persisting.
    pub dry_run: bool,
    /// Grace period before forced termination.
    pub grace_period_seconds: Option<u32>,
    /// Dependent handling.
    pub propagation_policy: Option<PropagationPolicy>,
}

impl DeleteParams {
    /// Deletes dependents before the owner.
    pub fn foreground() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Self::default()
        }
    }

    /// Deletes dependents in the background.
    pub fn background() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Self::default()
        }
    }

    /// Leaves dependents in place.
    pub fn orphan() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Orphan),
            ..Self::default()
        }
    }

    /// Sets the grace period.
    #[must_use]
    pub const fn grace_period(mut self, seconds: u32) -> Self {
        self.grace_period_seconds = Some(seconds);
        self
    }

    /// Validate without persisting.
    #[must_use]
    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub(crate) fn apply(&self, request: ApiRequest) -> ApiRequest {
        dry_run(request, self.dry_run)
            .query_opt("gracePeriodSeconds", self.grace_period_seconds)
            .query_opt("propagationPolicy", self.propagation_policy)
    }
}

/// Process selection for `exec` and `attach`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ExecParams {
    /// Target container; the server picks the only one when unset.
    pub container: Option<String>,
    /// Attach stdin.
    pub stdin: bool,
    /// Attach stdout.
    pub stdout: bool,
    /// Attach stderr.
    pub stderr: bool,
    /// Allocate a terminal.
    pub tty: bool,
}

impl Default for ExecParams {
    fn default() -> Self {
        Self {
            container: None,
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
        }
    }
}

impl ExecParams {
    /// Selects the container.
    #[must_use]
    pub fn container(mut self, name: &str) -> Self {
        self.container = Some(name.to_owned());
        self
    }

    /// Attaches stdin.
    #[must_use]
    pub const fn stdin(mut self, enabled: bool) -> Self {
        self.stdin = enabled;
        self
    }

    /// Attaches stdout.
    #[must_use]
    pub const fn stdout(mut self, enabled: bool) -> Self {
        self.stdout = enabled;
        self
    }

    /// Attaches stderr. Ignored by the server when a terminal is allocated.
    #[must_use]
    pub const fn stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }

    /// Allocates a terminal.
    #[must_use]
    pub const fn tty(mut self, enabled: bool) -> Self {
        self.tty = enabled;
        self
    }

    pub(crate) fn apply(&self, request: ApiRequest) -> Result<ApiRequest> {
        if !(self.stdin || self.stdout || self.stderr) {
            return Err(Error::Config(
                "at least one of stdin, stdout or stderr must be attached".into(),
            ));
        }
        let mut request = request.query_opt("container", self.container.as_deref());
        for (key, enabled) in [
            ("stdin", self.stdin),
            ("stdout", self.stdout),
            ("stderr", self.stderr && !self.tty),
            ("tty", self.tty),
        ] {
            if enabled {
                request = request.query(key, "true");
            }
        }
        Ok(request)
    }
}

/// Options for reading container logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct LogParams {
    /// Container; required when the pod has more than one.
    pub container: Option<String>,
    /// Lines from the end of the log.
    pub tail_lines: Option<i64>,
    /// Only entries newer than this many seconds.
    pub since_seconds: Option<i64>,
    /// Cap on returned bytes.
    pub limit_bytes: Option<i64>,
    /// Prefix each line with its timestamp.
    pub timestamps: bool,
    /// Logs of the previous, terminated instance.
    pub previous: bool,
}

impl LogParams {
    /// Selects the container.
    #[must_use]
    pub fn container(mut self, name: &str) -> Self {
        self.container = Some(name.to_owned());
        self
    }

    /// Returns only the last `lines` lines.
    #[must_use]
    pub const fn tail(mut self, lines: i64) -> Self {
        self.tail_lines = Some(lines);
        self
    }

    /// Reads the previous container instance.
    #[must_use]
    pub const fn previous(mut self) -> Self {
        self.previous = true;
        self
    }

    pub(crate) fn apply(&self, request: ApiRequest) -> ApiRequest {
        let mut request = request
            .query_opt("container", self.container.as_deref())
            .query_opt("tailLines", self.tail_lines)
            .query_opt("sinceSeconds", self.since_seconds)
            .query_opt("limitBytes", self.limit_bytes);
        for (key, enabled) in [("timestamps", self.timestamps), ("previous", self.previous)] {
            if enabled {
                request = request.query(key, "true");
            }
        }
        request
    }
}

fn dry_run(request: ApiRequest, enabled: bool) -> ApiRequest {
    if enabled {
        request.query("dryRun", "All")
    } else {
        request
    }
}

/// A patch body and the strategy that interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Patch<P> {
    /// Server-side apply of a partial object.
    Apply(P),
    /// RFC 6902 operations; `P` serializes to the operation array.
    Json(P),
    /// RFC 7386 merge patch.
    Merge(P),
    /// Kubernetes strategic merge patch.
    Strategic(P),
}

impl<P> Patch<P> {
    /// Media type selecting the strategy.
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Apply(_) => APPLY_PATCH,
            Self::Json(_) => JSON_PATCH,
            Self::Merge(_) => MERGE_PATCH,
            Self::Strategic(_) => STRATEGIC_MERGE_PATCH,
        }
    }

    const fn payload(&self) -> &P {
        match self {
            Self::Apply(p) | Self::Json(p) | Self::Merge(p) | Self::Strategic(p) => p,
        }
    }
}

impl<P: Serialize> Patch<P> {
    /// Encodes the payload with the serializer registered for its media type.
    pub fn document(&self, codecs: &CodecRegistry) -> Result<Document> {
        let serializer = codecs.serializer_for(self.content_type())?;
        Ok(serializer.document(self.payload())?)
    }
}
