//! 📡 Wire types: the shapes the query service speaks in.
//!
//! Everything that crosses the Transport as JSON gets a typed home here: job handles, job
//! details, result pages, error items, and the two request descriptors that need validating
//! before they are allowed anywhere near a socket (`JobListFilter`, `ResultsRequest`).
//!
//! 🧠 Knowledge graph:
//! - Decoding is plain serde. A body that does not fit is a `QueryError::Parse`, because a
//!   wrong shape is a contract violation between us and the service, not a transient hiccup.
//! - `JobState` travels upper case on responses (`"DONE"`) but lower case in the job-list
//!   filter (`state=done`). The service has two opinions and we respect both. 🦆

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, Result};

// ============================================================
//  🚦 JobState
// ============================================================

/// 🚦 Where a remote job is in its life.
///
/// Only `Done` unlocks the results. `Pending`/`Running` mean "ask again later".
/// `Failed`, `TimedOut` and `Cancelled` are the three flavors of "it's over".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    /// 🔄 Still cooking? Then the poll loop keeps waiting.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobState::Pending | JobState::Running)
    }

    /// 🏷️ The upper-case name used on responses.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
            JobState::TimedOut => "TIMEDOUT",
            JobState::Cancelled => "CANCELLED",
        }
    }

    /// 🏷️ The lower-case name the job-list filter wants.
    pub fn as_filter_value(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::TimedOut => "timedout",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
//  📝 QueryParams - what we ask the service to run
// ============================================================

/// 🏎️ Scheduling priority hint for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Immediate,
    Foreground,
    Background,
}

/// 🔧 Optional job properties. Sent only when at least one of them is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_page_size: Option<u32>,
}

impl QueryProperties {
    fn is_empty(&self) -> bool {
        self.priority.is_none()
            && self.timeout_ms.is_none()
            && self.max_wait.is_none()
            && self.default_page_size.is_none()
    }
}

fn no_properties(properties: &Option<QueryProperties>) -> bool {
    properties.as_ref().is_none_or(QueryProperties::is_empty)
}

/// 📝 The `params` object of a job: the query text plus optional knobs.
///
/// Numeric knobs of zero are dropped on the floor, same as "not set". The service would
/// reject them anyway, and we'd rather not make a round trip to hear it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(default, skip_serializing_if = "no_properties")]
    pub properties: Option<QueryProperties>,
}

impl QueryParams {
    /// 🚀 Params for `query`. An empty query is a `Validation` error.
    pub fn new(query: impl Into<String>) -> Result<Self> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(QueryError::Validation(
                "mandatory property 'query' can't be empty".into(),
            ));
        }
        Ok(Self {
            query,
            dialect: None,
            properties: None,
        })
    }

    pub fn with_dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = Some(dialect.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.properties_mut().priority = Some(priority);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        if timeout_ms > 0 {
            self.properties_mut().timeout_ms = Some(timeout_ms);
        }
        self
    }

    pub fn with_max_wait(mut self, max_wait: u32) -> Self {
        if max_wait > 0 {
            self.properties_mut().max_wait = Some(max_wait);
        }
        self
    }

    pub fn with_default_page_size(mut self, page_size: u32) -> Self {
        if page_size > 0 {
            self.properties_mut().default_page_size = Some(page_size);
        }
        self
    }

    fn properties_mut(&mut self) -> &mut QueryProperties {
        self.properties.get_or_insert_with(QueryProperties::default)
    }
}

// ============================================================
//  🎫 Job handles and details
// ============================================================

/// 🎫 What `POST /jobs` hands back. The `uri` is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJob {
    pub job_id: String,
    #[serde(default)]
    pub uri: Option<String>,
}

/// 📊 How far along a job is, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub completion_pct: i32,
}

/// ⏱️ Runtime statistics, all optional because the service is shy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatistics {
    #[serde(default)]
    pub run_time_ms: Option<i64>,
    #[serde(default)]
    pub cache_pct: Option<i32>,
    #[serde(default)]
    pub eta_ms: Option<i64>,
}

/// 🔍 Job status as returned by `GET`/`DELETE /jobs/{id}` and the job list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJobDetail {
    pub job_id: String,
    pub state: JobState,
    pub submit_time: i64,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub progress: Option<JobProgress>,
    #[serde(default)]
    pub params: Option<QueryParams>,
    #[serde(default)]
    pub statistics: Option<JobStatistics>,
}

// ============================================================
//  📄 Result pages
// ============================================================

/// 🗂️ Row layout of a result page.
///
/// `ValuesDictionary` rows are self-describing objects; cursors only ever ask for those.
/// `ValuesArray` rows are positional and only make sense next to the page `schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultFormat {
    ValuesArray,
    ValuesDictionary,
}

impl ResultFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultFormat::ValuesArray => "valuesArray",
            ResultFormat::ValuesDictionary => "valuesDictionary",
        }
    }
}

/// 🧬 Column metadata, kept opaque.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<Value>,
}

/// 📦 The rows of one page. `data: null` is legal on the wire but unusable for iteration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageResult {
    #[serde(default)]
    pub data: Option<Vec<Value>>,
}

/// 📄 One page plus the opaque cursor to the next one (`None` means last page).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub page_cursor: Option<String>,
    pub result: PageResult,
}

/// 📄 `GET /jobResults/{id}` response: a page plus job-level row accounting.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJobResult {
    pub job_id: String,
    pub state: JobState,
    pub result_format: ResultFormat,
    #[serde(default)]
    pub rows_in_job: Option<u64>,
    #[serde(default)]
    pub rows_in_page: Option<u64>,
    #[serde(default)]
    pub schema: Option<Schema>,
    pub page: Page,
}

// ============================================================
//  💀 Error items
// ============================================================

/// 💀 One entry of an error response body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorItem {
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

impl ApiErrorItem {
    /// 🔍 Array of error objects, or a single object promoted to a one-item list.
    pub(crate) fn parse_list(body: Option<&Value>) -> Result<Vec<ApiErrorItem>> {
        match body {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(_) => Ok(serde_json::from_value(item.clone())?),
                    _ => Err(QueryError::Parse("error item is not an object".into())),
                })
                .collect(),
            Some(single @ Value::Object(_)) => Ok(vec![serde_json::from_value(single.clone())?]),
            Some(_) => Err(QueryError::Parse(
                "response is neither an error array nor an error object".into(),
            )),
            None => Err(QueryError::Parse("error response body is null".into())),
        }
    }
}

impl fmt::Display for ApiErrorItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ErrorCode: {}, Message: {}, Context: {}",
            self.error_code.map_or_else(|| "-".to_string(), |c| c.to_string()),
            self.message.as_deref().unwrap_or("-"),
            self.context.as_deref().unwrap_or("-"),
        )
    }
}

// ============================================================
//  🧾 Request descriptors
// ============================================================

/// 🧾 Filter for the job list. `tenant_id` is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobListFilter {
    pub tenant_id: String,
    pub created_after: Option<i64>,
    pub max_jobs: Option<u32>,
    pub state: Option<JobState>,
}

impl JobListFilter {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn to_query(&self) -> Result<Vec<(String, String)>> {
        if self.tenant_id.is_empty() {
            return Err(QueryError::Validation(
                "'tenantId' parameter is mandatory".into(),
            ));
        }
        let mut query = vec![("tenantId".to_string(), self.tenant_id.clone())];
        if let Some(created_after) = self.created_after {
            query.push(("createdAfter".into(), created_after.to_string()));
        }
        if let Some(max_jobs) = self.max_jobs {
            query.push(("maxJobs".into(), max_jobs.to_string()));
        }
        if let Some(state) = self.state {
            query.push(("state".into(), state.as_filter_value().into()));
        }
        Ok(query)
    }
}

/// 🧾 Everything `GET /jobResults/{id}` accepts.
///
/// `page_cursor` and `page_number` are two ways to say "which page" and the service only
/// listens to one of them. Setting both is an `InvalidArgument`, raised by [`Self::to_query`]
/// before the request is ever built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsRequest {
    pub job_id: String,
    pub max_wait: Option<u32>,
    pub result_format: Option<ResultFormat>,
    pub page_size: Option<u32>,
    pub page_cursor: Option<String>,
    pub page_number: Option<u64>,
    pub offset: Option<u64>,
}

impl ResultsRequest {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: ResultFormat) -> Self {
        self.result_format = Some(format);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_page_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.page_cursor = Some(cursor.into());
        self
    }

    pub fn with_page_number(mut self, page_number: u64) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_max_wait(mut self, max_wait: u32) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn to_query(&self) -> Result<Vec<(String, String)>> {
        if self.job_id.is_empty() {
            return Err(QueryError::Validation("'jobId' parameter is mandatory".into()));
        }
        if self.page_cursor.is_some() && self.page_number.is_some() {
            return Err(QueryError::InvalidArgument(
                "use either 'pageCursor' or 'pageNumber', not both".into(),
            ));
        }
        let mut query = Vec::new();
        if let Some(max_wait) = self.max_wait {
            query.push(("maxWait".to_string(), max_wait.to_string()));
        }
        if let Some(format) = self.result_format {
            query.push(("resultFormat".into(), format.as_str().into()));
        }
        if let Some(page_size) = self.page_size {
            query.push(("pageSize".into(), page_size.to_string()));
        }
        if let Some(cursor) = &self.page_cursor {
            query.push(("pageCursor".into(), cursor.clone()));
        }
        if let Some(page_number) = self.page_number {
            query.push(("pageNumber".into(), page_number.to_string()));
        }
        if let Some(offset) = self.offset {
            query.push(("offset".into(), offset.to_string()));
        }
        Ok(query)
    }
}

/// 🧩 Decode a response body into `T`, or explain which shape we expected.
pub(crate) fn decode_body<T: DeserializeOwned>(body: Option<Value>, expected: &str) -> Result<T> {
    let body = body.ok_or_else(|| QueryError::Parse(format!("'null' response, expected {expected}")))?;
    serde_json::from_value(body)
        .map_err(|err| QueryError::Parse(format!("response is not a valid {expected}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_properties_stay_home_when_empty() {
        let params = QueryParams::new("SELECT 1")
            .expect("valid query")
            .with_timeout_ms(0)
            .with_max_wait(0);
        let wire = serde_json::to_value(&params).expect("serializes");
        assert_eq!(wire, json!({"query": "SELECT 1"}));
    }

    #[test]
    fn the_one_where_properties_come_out_in_camel_case() {
        let params = QueryParams::new("SELECT * FROM firewall.traffic")
            .expect("valid query")
            .with_dialect("Csql")
            .with_priority(Priority::Foreground)
            .with_timeout_ms(5000)
            .with_default_page_size(400);
        let wire = serde_json::to_value(&params).expect("serializes");
        assert_eq!(
            wire,
            json!({
                "query": "SELECT * FROM firewall.traffic",
                "dialect": "Csql",
                "properties": {"priority": "foreground", "timeoutMs": 5000, "defaultPageSize": 400}
            })
        );
    }

    #[test]
    fn the_one_where_an_empty_query_is_refused() {
        assert!(matches!(QueryParams::new("   "), Err(QueryError::Validation(_))));
    }

    #[test]
    fn the_one_where_a_full_job_detail_parses() {
        let detail: QueryJobDetail = decode_body(
            Some(json!({
                "jobId": "str1", "state": "DONE", "submitTime": 10, "startTime": 11, "endTime": 12,
                "progress": {"completionPct": 13},
                "params": {"query": "SELECT 1", "properties": {"priority": "background"}},
                "statistics": {"runTimeMs": 14, "cachePct": 15, "etaMs": 16}
            })),
            "job detail",
        )
        .expect("parses");
        assert_eq!(detail.state, JobState::Done);
        assert_eq!(detail.end_time, Some(12));
        assert_eq!(detail.progress.map(|p| p.completion_pct), Some(13));
        assert_eq!(detail.statistics.and_then(|s| s.eta_ms), Some(16));
        assert_eq!(
            detail.params.and_then(|p| p.properties).and_then(|p| p.priority),
            Some(Priority::Background)
        );
    }

    #[test]
    fn the_one_where_submit_time_as_a_string_is_a_parse_error() {
        let parsed: Result<QueryJobDetail> = decode_body(
            Some(json!({"jobId": "str1", "state": "DONE", "submitTime": "10"})),
            "job detail",
        );
        assert!(matches!(parsed, Err(QueryError::Parse(_))));
    }

    #[test]
    fn the_one_where_a_minimal_result_page_has_nulls_everywhere() {
        let result: QueryJobResult = decode_body(
            Some(json!({
                "jobId": "86d0d782", "state": "DONE", "resultFormat": "valuesArray",
                "page": {"pageCursor": null, "result": {"data": null}}
            })),
            "job result",
        )
        .expect("parses");
        assert_eq!(result.result_format, ResultFormat::ValuesArray);
        assert_eq!(result.rows_in_job, None);
        assert_eq!(result.page.page_cursor, None);
        assert_eq!(result.page.result.data, None);
    }

    #[test]
    fn the_one_where_timedout_speaks_both_dialects() {
        let state: JobState = serde_json::from_value(json!("TIMEDOUT")).expect("parses");
        assert_eq!(state, JobState::TimedOut);
        assert_eq!(state.as_filter_value(), "timedout");
        assert!(!state.is_in_flight());
        assert!(JobState::Pending.is_in_flight());
    }

    #[test]
    fn the_one_where_cursor_and_page_number_refuse_to_share() {
        let request = ResultsRequest::new("job-1")
            .with_page_cursor("abc")
            .with_page_number(3);
        assert!(matches!(request.to_query(), Err(QueryError::InvalidArgument(_))));
    }

    #[test]
    fn the_one_where_results_query_is_built_in_order() {
        let query = ResultsRequest::new("job-1")
            .with_format(ResultFormat::ValuesDictionary)
            .with_page_size(100)
            .with_page_number(2)
            .to_query()
            .expect("valid");
        assert_eq!(
            query,
            vec![
                ("resultFormat".to_string(), "valuesDictionary".to_string()),
                ("pageSize".to_string(), "100".to_string()),
                ("pageNumber".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn the_one_where_job_list_needs_a_tenant() {
        assert!(matches!(
            JobListFilter::default().to_query(),
            Err(QueryError::Validation(_))
        ));
        let mut filter = JobListFilter::new("tenant-7");
        filter.state = Some(JobState::Running);
        filter.max_jobs = Some(5);
        let query = filter.to_query().expect("valid");
        assert!(query.contains(&("state".to_string(), "running".to_string())));
        assert!(query.contains(&("maxJobs".to_string(), "5".to_string())));
    }
}
