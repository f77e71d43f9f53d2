//! REST client for remote workstations and dashboards
//!
//! Implements `DispatchBackend` over HTTP. Only the duplicate-check read is
//! retried on network failure; a commit is sent exactly once, and a network
//! failure during commit surfaces as `TransientNetworkFailure` so the
//! workstation discards the scan.

use crate::domain::error::{DispatchError, Result};
use crate::domain::types::{CommitReceipt, PackageRegistration};
use crate::io::http_api::{ErrorBody, OPERATOR_HEADER};
use crate::services::aggregator::ProductivitySnapshot;
use crate::services::day_boundary::DayStatus;
use crate::services::dispatch::{DayClosedReport, RegisterRequest};
use crate::services::station::DispatchBackend;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts for the duplicate-check read
pub const DUPLICATE_CHECK_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct DuplicateCheckBody {
    exists: bool,
    #[serde(default)]
    registration: Option<PackageRegistration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    order_id: &'a str,
    station_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seller_type: Option<crate::domain::types::SellerType>,
}

pub struct HttpDispatchClient {
    base_url: String,
    http: reqwest::Client,
    retry_backoff: Duration,
}

impl HttpDispatchClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).http1_only().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            retry_backoff: Duration::from_millis(200),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decode a success body or rebuild the engine error from the error body
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(network_error);
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(body.into_error()),
            Err(_) => Err(DispatchError::TransientNetworkFailure(format!("server returned {status}"))),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).send().await.map_err(network_error)?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, operator: Option<&str>) -> Result<T> {
        let mut request = self.http.post(self.url(path));
        if let Some(operator) = operator {
            request = request.header(OPERATOR_HEADER, operator);
        }
        let response = request.send().await.map_err(network_error)?;
        Self::decode(response).await
    }

    pub async fn day_status(&self) -> Result<DayStatus> {
        self.get("/day-status").await
    }

    pub async fn close_day(&self, operator: Option<&str>) -> Result<DayClosedReport> {
        self.post("/close-day", operator).await
    }

    pub async fn productivity(&self, date: Option<NaiveDate>) -> Result<ProductivitySnapshot> {
        match date {
            Some(date) => self.get(&format!("/productivity?date={date}")).await,
            None => self.get("/productivity").await,
        }
    }

    async fn check_duplicate_once(&self, order_id: &str) -> Result<Option<PackageRegistration>> {
        let body: DuplicateCheckBody = self.get(&format!("/duplicate-check/{order_id}")).await?;
        Ok(if body.exists { body.registration } else { None })
    }
}

fn network_error(e: reqwest::Error) -> DispatchError {
    DispatchError::TransientNetworkFailure(e.to_string())
}

#[async_trait]
impl DispatchBackend for HttpDispatchClient {
    async fn check_duplicate(&self, order_id: &str) -> Result<Option<PackageRegistration>> {
        let mut attempt = 1;
        loop {
            match self.check_duplicate_once(order_id).await {
                Err(DispatchError::TransientNetworkFailure(reason)) if attempt < DUPLICATE_CHECK_ATTEMPTS => {
                    warn!(attempt = %attempt, error = %reason, "duplicate_check_retry");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn commit(&self, request: RegisterRequest) -> Result<CommitReceipt> {
        let body = RegisterBody {
            order_id: &request.order_id,
            station_id: &request.station_id,
            seller_type: request.seller_type,
        };
        let mut http_request = self.http.post(self.url("/register")).json(&body);
        if let Some(ref operator) = request.operator {
            http_request = http_request.header(OPERATOR_HEADER, operator);
        }

        debug!(order_id = %request.order_id, station = %request.station_id, "commit_sent");
        let response = http_request.send().await.map_err(network_error)?;
        Self::decode(response).await
    }
}
