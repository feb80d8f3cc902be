//! The two-phase report protocol.
//!
//! 1. POST the identifier to the report page and scrape three render handles.
//! 2. GET the servlet with those handles to download the rendered spreadsheet.
//!
//! Each phase runs under its own [`RetryPolicy`] budget.

use reportharvest_shared::{HarvestError, HarvestSettings, ReportConfig, Result, WorkItem};
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::client::build_client;
use crate::error::{FetchFailure, Phase};
use crate::handles::{ReportHandles, extract_handles};
use crate::retry::{AttemptError, RetryPolicy};
use crate::ArtifactSource;

/// Report page that renders an identifier and embeds the handles.
const HANDLE_PATH: &str = "reportJsp/showReport.jsp";

/// Servlet that exports a rendered report.
const ARTIFACT_PATH: &str = "reportServlet";

/// HTTP implementation of [`ArtifactSource`].
pub struct TwoPhaseFetcher {
    client: Client,
    handle_url: Url,
    artifact_url: Url,
    report: ReportConfig,
    policy: RetryPolicy,
}

impl TwoPhaseFetcher {
    /// Build a fetcher with its own client from resolved settings.
    pub fn new(settings: &HarvestSettings) -> Result<Self> {
        let client = build_client(settings)?;
        Self::with_client(
            client,
            &settings.base_url,
            settings.report.clone(),
            RetryPolicy::from(settings),
        )
    }

    /// Build a fetcher around an existing client.
    pub fn with_client(
        client: Client,
        base_url: &Url,
        report: ReportConfig,
        policy: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            client,
            handle_url: endpoint(base_url, HANDLE_PATH)?,
            artifact_url: endpoint(base_url, ARTIFACT_PATH)?,
            report,
            policy,
        })
    }

    /// Phase 1: render the report for `item` and extract its handles.
    #[instrument(skip_all, fields(item = %item))]
    pub async fn acquire_handles(&self, item: &WorkItem) -> std::result::Result<ReportHandles, FetchFailure> {
        let mut form: Vec<(&str, &str)> = self
            .report
            .form_fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        form.push((self.report.id_field.as_str(), item.as_str()));

        let body = self
            .policy
            .run(Phase::Handles, || {
                let request = self
                    .client
                    .post(self.handle_url.clone())
                    .query(&[("rpx", self.report.report_file.as_str())])
                    .form(&form);
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(AttemptError::Status(status));
                    }
                    Ok(response.text().await?)
                }
            })
            .await?;

        extract_handles(&body)
    }

    /// Phase 2: download the rendered artifact addressed by `handles`.
    #[instrument(skip_all, fields(cached_id = %handles.cached_id))]
    pub async fn download_artifact(
        &self,
        handles: &ReportHandles,
    ) -> std::result::Result<Vec<u8>, FetchFailure> {
        let mut query: Vec<(&str, &str)> = self
            .report
            .render_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        query.extend([
            ("file", self.report.report_file.as_str()),
            ("cachedId", handles.cached_id.as_str()),
            ("reportParamsId", handles.params_id.as_str()),
            ("t_i_m_e", handles.timestamp.as_str()),
        ]);

        self.policy
            .run(Phase::Artifact, || {
                let request = self.client.get(self.artifact_url.clone()).query(&query);
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(AttemptError::Status(status));
                    }
                    Ok(response.bytes().await?.to_vec())
                }
            })
            .await
    }
}

impl ArtifactSource for TwoPhaseFetcher {
    async fn fetch(&self, item: &WorkItem) -> std::result::Result<Vec<u8>, FetchFailure> {
        let handles = self.acquire_handles(item).await?;
        debug!(%item, params_id = %handles.params_id, "handles acquired");
        let bytes = self.download_artifact(&handles).await?;
        debug!(%item, size = bytes.len(), "artifact downloaded");
        Ok(bytes)
    }
}

/// Append `path` to `base`, keeping every segment of `base`.
fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let joined = format!("{}/{path}", base.as_str().trim_end_matches('/'));
    Url::parse(&joined)
        .map_err(|e| HarvestError::config(format!("invalid endpoint '{joined}': {e}")))
}
