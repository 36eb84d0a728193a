//! Payee account endpoints. Every route requires a principal authorized for
//! the payee in the path.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{body_error, tag};
use crate::database::payee_account_repository::PayeeAccount;
use crate::error::{AppError, ValidationError};
use crate::middleware::auth::Principal;
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::AccountProfile;
use crate::services::account_onboarding::{AccountStatusView, OnboardingResult};
use crate::services::earnings::EarningsSummary;
use crate::services::fee_calculation::FeePolicy;
use crate::SettlementServices;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardRequest {
    #[serde(default)]
    pub profile: AccountProfile,
    /// Issue a fresh link for an already-connected payee instead of failing
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EarningsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePolicyRequest {
    /// `null` clears the override
    pub fee_policy: Option<FeePolicy>,
}

/// Accepts RFC 3339 timestamps or plain dates. A plain `to` date covers the
/// whole day.
fn parse_bound(field: &str, value: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .zip(time)
        .map(|(date, time)| date.and_time(time).and_utc())
        .ok_or_else(|| {
            AppError::validation(ValidationError::InvalidField {
                field: field.to_string(),
                reason: "expected RFC 3339 timestamp or YYYY-MM-DD".to_string(),
            })
        })
}

/// POST /accounts/{payee_id}/onboard
pub async fn onboard(
    State(services): State<SettlementServices>,
    principal: Principal,
    headers: HeaderMap,
    Path(payee_id): Path<String>,
    body: Bytes,
) -> Result<Json<OnboardingResult>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    principal.authorize(&payee_id).map_err(tag(&request_id))?;

    let request: OnboardRequest = if body.iter().all(u8::is_ascii_whitespace) {
        OnboardRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            tag(&request_id)(AppError::validation(ValidationError::InvalidField {
                field: "body".to_string(),
                reason: e.to_string(),
            }))
        })?
    };

    info!(payee_id = %payee_id, principal_id = %principal.id, refresh = request.refresh, "onboarding requested");
    let result = services
        .onboarding
        .begin_onboarding(&payee_id, &request.profile, request.refresh)
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(result))
}

/// GET /accounts/{payee_id}/status
pub async fn status(
    State(services): State<SettlementServices>,
    principal: Principal,
    headers: HeaderMap,
    Path(payee_id): Path<String>,
) -> Result<Json<AccountStatusView>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    principal.authorize(&payee_id).map_err(tag(&request_id))?;

    let view = services
        .onboarding
        .check_status(&payee_id)
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(view))
}

/// POST /accounts/{payee_id}/refresh-link
pub async fn refresh_link(
    State(services): State<SettlementServices>,
    principal: Principal,
    headers: HeaderMap,
    Path(payee_id): Path<String>,
) -> Result<Json<OnboardingResult>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    principal.authorize(&payee_id).map_err(tag(&request_id))?;

    let result = services
        .onboarding
        .refresh_onboarding_link(&payee_id)
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(result))
}

/// POST /accounts/{payee_id}/dashboard-link
pub async fn dashboard_link(
    State(services): State<SettlementServices>,
    principal: Principal,
    headers: HeaderMap,
    Path(payee_id): Path<String>,
) -> Result<Json<LinkResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    principal.authorize(&payee_id).map_err(tag(&request_id))?;

    let url = services
        .onboarding
        .create_dashboard_link(&payee_id)
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(LinkResponse { url }))
}

/// GET /accounts/{payee_id}/earnings?from=&to=
pub async fn earnings(
    State(services): State<SettlementServices>,
    principal: Principal,
    headers: HeaderMap,
    Path(payee_id): Path<String>,
    Query(query): Query<EarningsQuery>,
) -> Result<Json<EarningsSummary>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    principal.authorize(&payee_id).map_err(tag(&request_id))?;

    let from = query
        .from
        .as_deref()
        .map(|v| parse_bound("from", v, false))
        .transpose()
        .map_err(tag(&request_id))?;
    let to = query
        .to
        .as_deref()
        .map(|v| parse_bound("to", v, true))
        .transpose()
        .map_err(tag(&request_id))?;

    let summary = services
        .earnings
        .get_earnings(&payee_id, from, to)
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(summary))
}

/// PUT /accounts/{payee_id}/fee-policy (admin only)
pub async fn set_fee_policy(
    State(services): State<SettlementServices>,
    principal: Principal,
    headers: HeaderMap,
    Path(payee_id): Path<String>,
    body: Result<Json<FeePolicyRequest>, JsonRejection>,
) -> Result<Json<PayeeAccount>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    principal.require_admin(&payee_id).map_err(tag(&request_id))?;
    let Json(request) = body.map_err(body_error).map_err(tag(&request_id))?;

    info!(payee_id = %payee_id, principal_id = %principal.id, policy = ?request.fee_policy, "fee policy change");
    let account = services
        .onboarding
        .set_fee_policy(&payee_id, request.fee_policy)
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(account))
}
