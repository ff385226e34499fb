//! # Previously, on the query service...
//!
//! 🎬 The real service lives behind a gateway, a TLS handshake and a bearer token. Tests
//! don't need any of that. They need a service that answers instantly, counts every call,
//! and can be told to misbehave on cue.
//!
//! [`InMemoryQueryService`] is that service. It speaks the `/query/v2` API out of RAM:
//!
//! - jobs are created by `POST /jobs` (409 on a duplicate id, 400 without params),
//! - `GET /jobs/{id}` reports `RUNNING` for the first `polls_before_done` checks and then the
//!   configured final state (`DONE` unless told otherwise),
//! - `GET /jobResults/{id}` serves rows `0..rows` in pages of `pageSize`, by `page-{n}`
//!   cursor or by `pageNumber`,
//! - `DELETE /jobs/{id}` forgets the job, `GET /jobs?tenantId=..` lists what's left.
//!
//! Rows are `{"row": i}` in `valuesDictionary` form and `[i]` in `valuesArray` form, so tests
//! can check coverage by collecting the `i`s.
//!
//! ⚠️ Not for production. If you're pointing prod at this, please also deploy a therapist. 🦆

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::api::JobState;
use crate::error::Result;

const PREFIX: &str = "/query/v2/";
const DEFAULT_PAGE_SIZE: u64 = 400;

/// 🔢 How many times each endpoint was hit. Snapshot via [`InMemoryQueryService::calls`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCalls {
    pub creates: u64,
    pub status_checks: u64,
    pub results: u64,
    pub deletes: u64,
    pub lists: u64,
}

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU64,
    status_checks: AtomicU64,
    results: AtomicU64,
    deletes: AtomicU64,
    lists: AtomicU64,
}

#[derive(Debug, Clone)]
struct FakeJob {
    params: Value,
    status_checks: u32,
    submit_time: i64,
}

#[derive(Debug, Clone)]
struct Behavior {
    rows: u64,
    polls_before_done: u32,
    final_state: JobState,
    report_rows_in_job: bool,
    failing_page: Option<u64>,
    null_data_page: Option<u64>,
    latency: Duration,
}

/// 🧪 An in-memory stand-in for the query service. Clones share state and counters.
#[derive(Debug, Clone)]
pub struct InMemoryQueryService {
    behavior: Behavior,
    jobs: Arc<Mutex<HashMap<String, FakeJob>>>,
    counters: Arc<Counters>,
}

impl InMemoryQueryService {
    /// 🚀 A service whose every job finishes immediately with `rows` rows.
    pub fn new(rows: u64) -> Self {
        Self {
            behavior: Behavior {
                rows,
                polls_before_done: 0,
                final_state: JobState::Done,
                report_rows_in_job: true,
                failing_page: None,
                null_data_page: None,
                latency: Duration::ZERO,
            },
            jobs: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Status checks that answer `RUNNING` before the final state shows up.
    pub fn with_polls_before_done(mut self, polls: u32) -> Self {
        self.behavior.polls_before_done = polls;
        self
    }

    /// State reported once the job stops running. `RUNNING` here means "never finishes".
    pub fn with_final_state(mut self, state: JobState) -> Self {
        self.behavior.final_state = state;
        self
    }

    /// Leave `rowsInJob` out of result pages.
    pub fn without_rows_in_job(mut self) -> Self {
        self.behavior.report_rows_in_job = false;
        self
    }

    /// Answer 500 when this page number is requested.
    pub fn with_failing_page(mut self, page: u64) -> Self {
        self.behavior.failing_page = Some(page);
        self
    }

    /// Answer `"data": null` for this page number.
    pub fn with_null_data_page(mut self, page: u64) -> Self {
        self.behavior.null_data_page = Some(page);
        self
    }

    /// Sleep this long before answering anything.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.behavior.latency = latency;
        self
    }

    pub fn calls(&self) -> ServiceCalls {
        ServiceCalls {
            creates: self.counters.creates.load(Ordering::SeqCst),
            status_checks: self.counters.status_checks.load(Ordering::SeqCst),
            results: self.counters.results.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            lists: self.counters.lists.load(Ordering::SeqCst),
        }
    }

    /// 🔍 Ids of jobs that exist right now (created and not yet deleted).
    pub async fn live_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn create(&self, body: Option<Value>) -> ApiResponse {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        let Some(body) = body else {
            return error_response(400, "request body is mandatory");
        };
        let Some(params) = body.get("params").cloned() else {
            return error_response(400, "'params' is mandatory");
        };
        if params.get("query").and_then(Value::as_str).is_none_or(str::is_empty) {
            return error_response(400, "'params.query' is mandatory");
        }
        let job_id = body
            .get("jobId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job_id) {
            return error_response(409, &format!("job {job_id} already exists"));
        }
        let submit_time = jobs.len() as i64 + 1;
        jobs.insert(
            job_id.clone(),
            FakeJob {
                params,
                status_checks: 0,
                submit_time,
            },
        );
        ApiResponse::new(
            200,
            Some(json!({"jobId": job_id, "uri": format!("{PREFIX}jobs/{job_id}")})),
        )
    }

    fn state_of(&self, job: &FakeJob) -> JobState {
        if job.status_checks <= self.behavior.polls_before_done {
            JobState::Running
        } else {
            self.behavior.final_state
        }
    }

    fn detail(&self, job_id: &str, job: &FakeJob, state: JobState) -> Value {
        json!({
            "jobId": job_id,
            "state": state,
            "submitTime": job.submit_time,
            "progress": {"completionPct": if state == JobState::Done { 100 } else { 50 }},
            "params": job.params,
        })
    }

    async fn status(&self, job_id: &str) -> ApiResponse {
        self.counters.status_checks.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return error_response(404, &format!("job {job_id} not found"));
        };
        job.status_checks += 1;
        let state = self.state_of(job);
        ApiResponse::new(200, Some(self.detail(job_id, job, state)))
    }

    async fn delete(&self, job_id: &str) -> ApiResponse {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        match self.jobs.lock().await.remove(job_id) {
            Some(job) => ApiResponse::new(
                200,
                Some(self.detail(job_id, &job, JobState::Cancelled)),
            ),
            None => error_response(404, &format!("job {job_id} not found")),
        }
    }

    async fn list(&self, query: &[(String, String)]) -> ApiResponse {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        if param(query, "tenantId").is_none() {
            return error_response(400, "'tenantId' is mandatory");
        }
        let state_filter = param(query, "state");
        let max_jobs = param(query, "maxJobs")
            .and_then(|m| m.parse::<usize>().ok())
            .unwrap_or(usize::MAX);

        let jobs = self.jobs.lock().await;
        let mut listed: Vec<(&String, &FakeJob)> = jobs.iter().collect();
        // 📅 most recent first
        listed.sort_by(|a, b| b.1.submit_time.cmp(&a.1.submit_time));
        let details: Vec<Value> = listed
            .into_iter()
            .map(|(id, job)| (id, job, self.state_of(job)))
            .filter(|(_, _, state)| state_filter.is_none_or(|s| s == state.as_filter_value()))
            .take(max_jobs)
            .map(|(id, job, state)| self.detail(id, job, state))
            .collect();
        ApiResponse::new(200, Some(Value::Array(details)))
    }

    async fn results(&self, job_id: &str, query: &[(String, String)]) -> ApiResponse {
        self.counters.results.fetch_add(1, Ordering::SeqCst);
        let default_page_size = {
            let jobs = self.jobs.lock().await;
            let Some(job) = jobs.get(job_id) else {
                return error_response(404, &format!("job {job_id} not found"));
            };
            job.params
                .pointer("/properties/defaultPageSize")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_PAGE_SIZE)
        };

        let page_size = param(query, "pageSize")
            .and_then(|p| p.parse::<u64>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(default_page_size);
        let page_number = match (param(query, "pageCursor"), param(query, "pageNumber")) {
            (Some(_), Some(_)) => {
                return error_response(400, "'pageCursor' and 'pageNumber' are exclusive");
            }
            (Some(cursor), None) => match cursor.strip_prefix("page-").and_then(|n| n.parse().ok()) {
                Some(n) => n,
                None => return error_response(400, &format!("unknown page cursor {cursor}")),
            },
            (None, Some(number)) => match number.parse::<u64>() {
                Ok(n) => n,
                Err(_) => return error_response(400, "'pageNumber' must be a number"),
            },
            (None, None) => 0,
        };
        let offset = param(query, "offset")
            .and_then(|o| o.parse::<u64>().ok())
            .unwrap_or(0);
        let as_arrays = param(query, "resultFormat") == Some("valuesArray");

        if self.behavior.failing_page == Some(page_number) {
            return error_response(500, &format!("page {page_number} exploded"));
        }

        let rows = self.behavior.rows;
        let start = (offset + page_number * page_size).min(rows);
        let end = (start + page_size).min(rows);
        let data = if self.behavior.null_data_page == Some(page_number) {
            Value::Null
        } else {
            Value::Array(
                (start..end)
                    .map(|i| if as_arrays { json!([i]) } else { json!({"row": i}) })
                    .collect(),
            )
        };
        let next_cursor = (end < rows).then(|| format!("page-{}", page_number + 1));

        let mut body = json!({
            "jobId": job_id,
            "state": JobState::Done,
            "resultFormat": if as_arrays { "valuesArray" } else { "valuesDictionary" },
            "rowsInPage": end - start,
            "schema": {"fields": [{"name": "row", "type": "integer"}]},
            "page": {"pageCursor": next_cursor, "result": {"data": data}},
        });
        if self.behavior.report_rows_in_job {
            body["rowsInJob"] = json!(rows);
        }
        ApiResponse::new(200, Some(body))
    }
}

fn param<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn error_response(status: u16, message: &str) -> ApiResponse {
    ApiResponse::new(
        status,
        Some(json!([{"errorCode": status, "message": message}])),
    )
}

#[async_trait]
impl Transport for InMemoryQueryService {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        if !self.behavior.latency.is_zero() {
            tokio::time::sleep(self.behavior.latency).await;
        }
        let Some(route) = request.path.strip_prefix(PREFIX) else {
            return Ok(error_response(404, &format!("no route for {}", request.path)));
        };
        let mut segments: Vec<&str> = route.split('/').collect();
        if let Some(resource_id) = request.resource_id.as_deref() {
            segments.push(resource_id);
        }
        let response = match (request.method, segments.as_slice()) {
            (Method::Post, ["jobs"]) => self.create(request.body).await,
            (Method::Get, ["jobs"]) => self.list(&request.query).await,
            (Method::Get, ["jobs", job_id]) => self.status(job_id).await,
            (Method::Delete, ["jobs", job_id]) => self.delete(job_id).await,
            (Method::Get, ["jobResults", job_id]) => self.results(job_id, &request.query).await,
            _ => error_response(404, &format!("no route for {} {}", request.method, request.path)),
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(job_id: &str) -> ApiRequest {
        ApiRequest::new(Method::Post, "/query/v2/jobs")
            .with_body(json!({"jobId": job_id, "params": {"query": "SELECT 1"}}))
    }

    #[tokio::test]
    async fn the_one_where_the_same_job_id_gets_a_409() {
        let service = InMemoryQueryService::new(10);
        let first = service.send(create_request("j1")).await.expect("sent");
        assert_eq!(first.status, 200);
        let second = service.send(create_request("j1")).await.expect("sent");
        assert_eq!(second.status, 409);
        assert_eq!(service.calls().creates, 2);
    }

    #[tokio::test]
    async fn the_one_where_the_job_runs_for_a_while_then_finishes() {
        let service = InMemoryQueryService::new(10).with_polls_before_done(2);
        service.send(create_request("j1")).await.expect("sent");
        let mut states = Vec::new();
        for _ in 0..3 {
            let response = service
                .send(ApiRequest::new(Method::Get, "/query/v2/jobs").with_resource_id("j1"))
                .await
                .expect("sent");
            states.push(response.body.expect("body")["state"].clone());
        }
        assert_eq!(states, vec![json!("RUNNING"), json!("RUNNING"), json!("DONE")]);
    }

    #[tokio::test]
    async fn the_one_where_pages_chain_by_cursor_until_the_end() {
        let service = InMemoryQueryService::new(250);
        service.send(create_request("j1")).await.expect("sent");
        let page = |cursor: Option<&str>| {
            let mut query = vec![("pageSize".to_string(), "100".to_string())];
            if let Some(cursor) = cursor {
                query.push(("pageCursor".to_string(), cursor.to_string()));
            }
            ApiRequest::new(Method::Get, "/query/v2/jobResults")
                .with_resource_id("j1")
                .with_query(query)
        };
        let first = service.send(page(None)).await.expect("sent").body.expect("body");
        assert_eq!(first["rowsInJob"], json!(250));
        assert_eq!(first["page"]["pageCursor"], json!("page-1"));
        let last = service.send(page(Some("page-2"))).await.expect("sent").body.expect("body");
        assert_eq!(last["rowsInPage"], json!(50));
        assert_eq!(last["page"]["pageCursor"], Value::Null);
        assert_eq!(last["page"]["result"]["data"][0], json!({"row": 200}));
    }

    #[tokio::test]
    async fn the_one_where_deleted_jobs_are_gone_for_good() {
        let service = InMemoryQueryService::new(1);
        service.send(create_request("j1")).await.expect("sent");
        let deleted = service
            .send(ApiRequest::new(Method::Delete, "/query/v2/jobs").with_resource_id("j1"))
            .await
            .expect("sent");
        assert_eq!(deleted.status, 200);
        assert!(service.live_jobs().await.is_empty());
        let again = service
            .send(ApiRequest::new(Method::Delete, "/query/v2/jobs").with_resource_id("j1"))
            .await
            .expect("sent");
        assert_eq!(again.status, 404);
    }

    #[tokio::test]
    async fn the_one_where_a_slash_in_the_job_id_is_just_a_character() {
        let service = InMemoryQueryService::new(5);
        service.send(create_request("team/a?b#c")).await.expect("sent");
        let status = service
            .send(ApiRequest::new(Method::Get, "/query/v2/jobs").with_resource_id("team/a?b#c"))
            .await
            .expect("sent");
        assert_eq!(status.status, 200);
        assert_eq!(status.body.expect("body")["jobId"], json!("team/a?b#c"));
        let deleted = service
            .send(ApiRequest::new(Method::Delete, "/query/v2/jobs").with_resource_id("team/a?b#c"))
            .await
            .expect("sent");
        assert_eq!(deleted.status, 200);
        assert!(service.live_jobs().await.is_empty());
    }
}
