//! 🧾 QueryService: typed calls over the raw Transport.
//!
//! One method per endpoint. Each one builds an [`ApiRequest`], sends it, turns a 4xx/5xx into
//! `QueryError::Api`, and decodes the body into its wire type. No retries, no polling, no
//! state. The interesting choreography lives in [`crate::job_driver`] and [`crate::session`].

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use crate::api::{
    JobListFilter, QueryJob, QueryJobDetail, QueryJobResult, QueryParams, ResultsRequest,
    decode_body,
};
use crate::auth::DataLakeCredential;
use crate::error::{QueryError, Result};
use crate::transport::{ApiRequest, Method, Transport};

const QUERY_PREFIX: &str = "/query/v2/";

/// 📡 Low-level query API client, bound to one credential identity (or the transport default).
#[derive(Debug, Clone)]
pub struct QueryService {
    transport: Arc<dyn Transport>,
    credential: Option<DataLakeCredential>,
}

impl QueryService {
    pub fn new(transport: Arc<dyn Transport>, credential: Option<DataLakeCredential>) -> Self {
        Self {
            transport,
            credential,
        }
    }

    pub fn credential(&self) -> Option<&DataLakeCredential> {
        self.credential.as_ref()
    }

    async fn call(&self, request: ApiRequest) -> Result<Option<Value>> {
        let request = request.with_credential(self.credential.clone());
        self.transport.send(request).await?.into_success()
    }

    /// 🚀 `POST /jobs`. Without `job_id` the service picks one.
    pub async fn create_job(
        &self,
        job_id: Option<&str>,
        params: Option<&QueryParams>,
    ) -> Result<QueryJob> {
        let params =
            params.ok_or_else(|| QueryError::Validation("'params' parameter is mandatory".into()))?;
        let mut body = Map::new();
        if let Some(job_id) = job_id {
            body.insert("jobId".into(), Value::String(job_id.to_string()));
        }
        body.insert("params".into(), serde_json::to_value(params)?);
        trace!(job_id = ?job_id, "🚀 create job request");

        let response = self
            .call(ApiRequest::new(Method::Post, format!("{QUERY_PREFIX}jobs")).with_body(Value::Object(body)))
            .await?;
        decode_body(response, "query job")
    }

    /// 🔍 `GET /jobs/{id}`.
    pub async fn get_job_status(&self, job_id: &str) -> Result<QueryJobDetail> {
        let request = job_request(Method::Get, job_id)?;
        let response = self.call(request).await?;
        decode_body(response, "job detail")
    }

    /// 🗑️ `DELETE /jobs/{id}`.
    pub async fn delete_job(&self, job_id: &str) -> Result<QueryJobDetail> {
        let request = job_request(Method::Delete, job_id)?;
        let response = self.call(request).await?;
        decode_body(response, "job detail")
    }

    /// 📋 `GET /jobs?tenantId=..`, most recent first.
    pub async fn list_jobs(&self, filter: &JobListFilter) -> Result<Vec<QueryJobDetail>> {
        let query = filter.to_query()?;
        let response = self
            .call(ApiRequest::new(Method::Get, format!("{QUERY_PREFIX}jobs")).with_query(query))
            .await?;
        decode_body(response, "job detail array")
    }

    /// 📄 `GET /jobResults/{id}`. Cursor plus page number is refused before anything is sent.
    pub async fn get_job_results(&self, request: &ResultsRequest) -> Result<QueryJobResult> {
        let query = request.to_query()?;
        let response = self
            .call(
                ApiRequest::new(Method::Get, format!("{QUERY_PREFIX}jobResults"))
                    .with_resource_id(&request.job_id)
                    .with_query(query),
            )
            .await?;
        decode_body(response, "job result")
    }
}

/// 🆔 `/jobs/{id}`, with the id carried as one path segment so the transport can escape it.
fn job_request(method: Method, job_id: &str) -> Result<ApiRequest> {
    if job_id.is_empty() {
        return Err(QueryError::Validation("'jobId' parameter is mandatory".into()));
    }
    Ok(ApiRequest::new(method, format!("{QUERY_PREFIX}jobs")).with_resource_id(job_id))
}
