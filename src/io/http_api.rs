//! REST API for workstations, dashboards and report views
//!
//! Hand-routed hyper 1 server. Every error kind of the dispatch engine maps
//! to one HTTP status and a JSON body carrying its stable `error` code.
//!
//! Routes:
//! - `GET  /duplicate-check/{orderId}`
//! - `POST /register`
//! - `GET  /day-status`, `POST /close-day`, `POST /reopen-day`
//! - `GET  /goal?date=`, `POST /goal`
//! - `GET  /productivity?date=`, `GET /registrations?date=`
//! - `GET  /metrics` (Prometheus text), `GET /health`

use crate::domain::error::DispatchError;
use crate::domain::types::{DailyGoal, PackageRegistration};
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::dispatch::{DispatchService, RegisterRequest};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{HeaderMap, AUTHORIZATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Header naming the acting operator (audit only)
pub const OPERATOR_HEADER: &str = "x-operator";

/// JSON error body shared by the server and `HttpDispatchClient`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    /// Variant payload (rejection reason, offending input, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Original registration on a duplicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<PackageRegistration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_business_date: Option<NaiveDate>,
}

impl ErrorBody {
    fn plain(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            detail: None,
            conflict: None,
            closed_date: None,
            next_business_date: None,
        }
    }

    pub fn from_error(err: &DispatchError) -> Self {
        let mut body = Self::plain(err.code(), err.to_string());
        match err {
            DispatchError::InvalidBarcodeFormat { code, .. } => body.detail = Some(code.clone()),
            DispatchError::DuplicateScan { existing } => body.conflict = Some((**existing).clone()),
            DispatchError::InvalidStation { input } => body.detail = Some(input.clone()),
            DispatchError::InvalidOrderId { reason } => body.detail = Some(reason.clone()),
            DispatchError::DayAlreadyClosed { date, next_business_date } => {
                body.closed_date = Some(*date);
                body.next_business_date = Some(*next_business_date);
            }
            DispatchError::InvalidGoal(reason) | DispatchError::TransientNetworkFailure(reason) => {
                body.detail = Some(reason.clone())
            }
            DispatchError::DayNotClosed | DispatchError::Storage(_) => {}
        }
        body
    }

    /// Rebuild the engine error on the client side
    ///
    /// Anything not recognized is a server-side failure, hence transient.
    pub fn into_error(self) -> DispatchError {
        let detail = self.detail.unwrap_or_else(|| self.message.clone());
        match (self.error.as_str(), self.conflict, self.closed_date, self.next_business_date) {
            ("duplicateScan", Some(existing), _, _) => DispatchError::duplicate(existing),
            ("invalidStation", ..) => DispatchError::InvalidStation { input: detail },
            ("invalidOrderId", ..) => DispatchError::InvalidOrderId { reason: detail },
            ("invalidBarcodeFormat", ..) => {
                DispatchError::InvalidBarcodeFormat { code: detail, reason: self.message }
            }
            ("dayAlreadyClosed", _, Some(date), Some(next_business_date)) => {
                DispatchError::DayAlreadyClosed { date, next_business_date }
            }
            ("dayNotClosed", ..) => DispatchError::DayNotClosed,
            ("invalidGoal", ..) => DispatchError::InvalidGoal(detail),
            _ => DispatchError::TransientNetworkFailure(format!("{}: {}", self.error, self.message)),
        }
    }
}

/// HTTP status for an engine error
pub fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::InvalidBarcodeFormat { .. }
        | DispatchError::InvalidStation { .. }
        | DispatchError::InvalidOrderId { .. }
        | DispatchError::InvalidGoal(_) => StatusCode::BAD_REQUEST,
        DispatchError::DuplicateScan { .. }
        | DispatchError::DayAlreadyClosed { .. }
        | DispatchError::DayNotClosed => StatusCode::CONFLICT,
        DispatchError::TransientNetworkFailure(_) | DispatchError::Storage(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DuplicateCheckResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    registration: Option<PackageRegistration>,
}

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    site: &'a str,
    version: &'a str,
}

/// Shared state of the API handlers
pub struct ApiState {
    service: Arc<DispatchService>,
    site_id: String,
}

impl ApiState {
    pub fn new(service: Arc<DispatchService>, site_id: impl Into<String>) -> Self {
        Self { service, site_id: site_id.into() }
    }
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!(error = %e, "api_response_serialize_failed");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "application/json", r#"{"error":"internal"}"#)
        }
    }
}

fn error_response(err: &DispatchError) -> Response<Full<Bytes>> {
    json(status_for(err), &ErrorBody::from_error(err))
}

fn bad_request(message: impl Into<String>) -> Response<Full<Bytes>> {
    json(StatusCode::BAD_REQUEST, &ErrorBody::plain("invalidRequest", message))
}

/// Value of a query parameter
fn query_param<'a>(uri: &'a Uri, name: &str) -> Option<&'a str> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Optional `?date=YYYY-MM-DD`
fn date_param(uri: &Uri) -> Result<Option<NaiveDate>, Response<Full<Bytes>>> {
    match query_param(uri, "date") {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| bad_request(format!("invalid date '{raw}', expected YYYY-MM-DD"))),
    }
}

/// Acting operator from `X-Operator` or HTTP Basic credentials
pub fn operator_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(name) = headers.get(OPERATOR_HEADER).and_then(|v| v.to_str().ok()) {
        let name = name.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    let auth = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = auth.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let username = credentials.split(':').next()?.trim();
    (!username.is_empty()).then(|| username.to_string())
}

async fn read_json<B, T>(body: B) -> Result<T, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    T: for<'de> Deserialize<'de>,
{
    let bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "api_body_read_failed");
            return Err(bad_request(format!("unreadable body: {e}")));
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| bad_request(format!("invalid JSON body: {e}")))
}

/// Route one request
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, "api_request");

    let service = &state.service;
    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => json(
            StatusCode::OK,
            &HealthResponse { status: "ok", site: &state.site_id, version: env!("GIT_HASH") },
        ),
        (&Method::GET, "/metrics") => {
            let snapshot = service.productivity(None).ok();
            let body = format_prometheus_metrics(service.metrics(), snapshot.as_ref(), &state.site_id);
            respond(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, p) if p.starts_with("/duplicate-check/") => {
            let raw = &p["/duplicate-check/".len()..];
            match service.check_duplicate(raw) {
                Ok(existing) => json(
                    StatusCode::OK,
                    &DuplicateCheckResponse { exists: existing.is_some(), registration: existing },
                ),
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, "/register") => {
            let operator = operator_from_headers(req.headers());
            match read_json::<_, RegisterRequest>(req.into_body()).await {
                Ok(mut request) => {
                    request.operator = operator;
                    match service.register(request) {
                        Ok(receipt) => json(StatusCode::CREATED, &receipt),
                        Err(e) => error_response(&e),
                    }
                }
                Err(response) => response,
            }
        }
        (&Method::GET, "/day-status") => match service.day_status() {
            Ok(status) => json(StatusCode::OK, &status),
            Err(e) => error_response(&e),
        },
        (&Method::POST, "/close-day") => {
            let operator = operator_from_headers(req.headers());
            match service.close_day() {
                Ok(report) => {
                    info!(operator = %operator.as_deref().unwrap_or("-"), "close_day_requested");
                    json(StatusCode::OK, &report)
                }
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, "/reopen-day") => {
            let operator = operator_from_headers(req.headers());
            match service.reopen_day() {
                Ok(status) => {
                    info!(operator = %operator.as_deref().unwrap_or("-"), "reopen_day_requested");
                    json(StatusCode::OK, &status)
                }
                Err(e) => error_response(&e),
            }
        }
        (&Method::GET, "/goal") => match date_param(req.uri()) {
            Ok(date) => {
                let date = match date.map(Ok).unwrap_or_else(|| service.live_business_date()) {
                    Ok(date) => date,
                    Err(e) => return Ok(error_response(&e)),
                };
                match service.goal(date) {
                    Some(goal) => json(StatusCode::OK, &goal),
                    None => json(
                        StatusCode::NOT_FOUND,
                        &ErrorBody::plain("goalNotFound", format!("no goal for {date}")),
                    ),
                }
            }
            Err(response) => response,
        },
        (&Method::POST, "/goal") => match read_json::<_, DailyGoal>(req.into_body()).await {
            Ok(goal) => match service.set_goal(goal) {
                Ok(goal) => json(StatusCode::OK, &goal),
                Err(e) => error_response(&e),
            },
            Err(response) => response,
        },
        (&Method::GET, "/productivity") => match date_param(req.uri()) {
            Ok(date) => match service.productivity(date) {
                Ok(snapshot) => json(StatusCode::OK, &snapshot),
                Err(e) => error_response(&e),
            },
            Err(response) => response,
        },
        (&Method::GET, "/registrations") => match date_param(req.uri()) {
            Ok(date) => match date.map(Ok).unwrap_or_else(|| service.live_business_date()) {
                Ok(date) => json(StatusCode::OK, &service.registrations(date)),
                Err(e) => error_response(&e),
            },
            Err(response) => response,
        },
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type, Authorization, X-Operator")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        _ => json(StatusCode::NOT_FOUND, &ErrorBody::plain("notFound", format!("no route for {method} {path}"))),
    };

    Ok(response)
}

/// Serve the REST API until shutdown
pub async fn start_api_server(
    port: u16,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{SellerType, StationId};
    use crate::infra::clock::MockClock;
    use crate::infra::config::Config;
    use chrono::{TimeZone, Utc};
    use hyper::header::HeaderValue;

    fn state() -> Arc<ApiState> {
        let at = chrono_tz::America::Sao_Paulo
            .with_ymd_and_hms(2026, 10, 19, 11, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let service = DispatchService::in_memory(&Config::default(), Arc::new(MockClock::new(at)));
        Arc::new(ApiState::new(Arc::new(service), "cd-sp"))
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn call(state: &Arc<ApiState>, req: Request<Full<Bytes>>) -> (StatusCode, serde_json::Value) {
        let response = handle_request(req, state.clone()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_register_then_duplicate() {
        let state = state();
        let mut req = request(Method::POST, "/register", r#"{"orderId":"BR123456789012A","stationId":"m2"}"#);
        req.headers_mut().insert(OPERATOR_HEADER, HeaderValue::from_static("joana"));

        let (status, body) = call(&state, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["registration"]["stationId"], "M2");
        assert_eq!(body["registration"]["sellerType"], "shopee");
        assert_eq!(body["registration"]["operator"], "joana");
        assert!(body.get("businessDayRollover").is_none());

        let (status, body) = call(&state, request(Method::GET, "/duplicate-check/BR123456789012A", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exists"], true);
        assert_eq!(body["registration"]["stationId"], "M2");

        let req = request(Method::POST, "/register", r#"{"orderId":"BR123456789012A","stationId":"M1"}"#);
        let (status, body) = call(&state, req).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "duplicateScan");
        assert_eq!(body["conflict"]["stationId"], "M2");
    }

    #[tokio::test]
    async fn test_register_validation_errors() {
        let state = state();
        let (status, body) =
            call(&state, request(Method::POST, "/register", r#"{"orderId":"12345678901","stationId":"M9"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalidStation");

        let (status, body) =
            call(&state, request(Method::POST, "/register", r#"{"orderId":"  ","stationId":"M1"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalidOrderId");

        let (status, body) = call(&state, request(Method::POST, "/register", "not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalidRequest");
    }

    #[tokio::test]
    async fn test_close_day_flow() {
        let state = state();
        call(&state, request(Method::POST, "/register", r#"{"orderId":"12345678901","stationId":"M1"}"#)).await;

        let (status, body) = call(&state, request(Method::POST, "/close-day", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["closedDate"], "2026-10-19");
        assert_eq!(body["nextBusinessDate"], "2026-10-20");
        assert_eq!(body["totalPackages"], 1);

        let (status, body) = call(&state, request(Method::POST, "/close-day", "")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "dayAlreadyClosed");

        let (_, body) = call(&state, request(Method::GET, "/day-status", "")).await;
        assert_eq!(body["closed"], true);
        assert_eq!(body["nextBusinessDate"], "2026-10-20");

        let req = request(Method::POST, "/register", r#"{"orderId":"12345678902","stationId":"M1"}"#);
        let (status, body) = call(&state, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["businessDayRollover"]["nextBusinessDate"], "2026-10-20");

        let (status, body) = call(&state, request(Method::POST, "/reopen-day", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["closed"], false);
        assert!(body.get("nextBusinessDate").is_none());
    }

    #[tokio::test]
    async fn test_goal_and_productivity() {
        let state = state();
        let (status, body) = call(&state, request(Method::GET, "/goal?date=2026-10-19", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "goalNotFound");

        let goal = r#"{"date":"2026-10-19","target":{"mode":"per_seller","targets":{"mercado_livre":10}},"collectionTimes":{"mercado_livre":"14:00"}}"#;
        let (status, _) = call(&state, request(Method::POST, "/goal", goal)).await;
        assert_eq!(status, StatusCode::OK);

        let bad = r#"{"date":"2026-10-19","target":{"mode":"aggregate","total":0}}"#;
        let (status, body) = call(&state, request(Method::POST, "/goal", bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalidGoal");

        call(&state, request(Method::POST, "/register", r#"{"orderId":"12345678901","stationId":"M3"}"#)).await;

        let (status, body) = call(&state, request(Method::GET, "/productivity?date=2026-10-19", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalPackages"], 1);
        assert_eq!(body["totalByStation"]["M3"], 1);
        assert_eq!(body["leadingStation"], "M3");
        assert_eq!(body["goalProgress"]["sellers"]["mercado_livre"]["percent"], 10.0);
        assert!(body["paceByStation"].is_object());

        let (status, body) = call(&state, request(Method::GET, "/productivity?date=2026-10-16", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalPackages"], 0);
        assert!(body["paceByStation"].is_null());

        let (status, _) = call(&state, request(Method::GET, "/productivity?date=19/10/2026", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(&state, request(Method::GET, "/registrations?date=2026-10-19", "")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let state = state();
        let (status, body) = call(&state, request(Method::GET, "/nope", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "notFound");
    }

    #[test]
    fn test_operator_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(operator_from_headers(&headers), None);

        // "maria:segredo"
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic bWFyaWE6c2VncmVkbw=="));
        assert_eq!(operator_from_headers(&headers).as_deref(), Some("maria"));

        headers.insert(OPERATOR_HEADER, HeaderValue::from_static("joao"));
        assert_eq!(operator_from_headers(&headers).as_deref(), Some("joao"));
    }

    #[test]
    fn test_error_body_round_trip_for_duplicate() {
        let existing = PackageRegistration::new(
            crate::domain::types::OrderId::parse("12345678901").unwrap(),
            StationId::M4,
            Some(SellerType::MercadoLivre),
            Utc::now(),
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            None,
        );
        let body = ErrorBody::from_error(&DispatchError::duplicate(existing));
        let json = serde_json::to_string(&body).unwrap();
        let back: ErrorBody = serde_json::from_str(&json).unwrap();
        let err = back.into_error();
        assert_eq!(err.existing_registration().unwrap().station_id, StationId::M4);

        let unknown = ErrorBody::plain("internal", "boom").into_error();
        assert!(unknown.discards_scan());
    }
}
