// handlers.rs - HTTP Route Handlers
//
// This file defines the HTTP API layer using axum.
// Handlers are thin - they just:
// 1. Extract request data
// 2. Call into the channel manager / payments repository
// 3. Return JSON responses

use std::sync::Arc;

use alloy::primitives::U256;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use paychan_core::{ChannelManager, Payment, SharedPaymentsRepository};
use rand::RngCore;
use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::model::{CloseChannelRequest, PaymentChallenge, TokenResponse, TxResultView, VerifyResponse};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChannelManager>,
    pub payments: SharedPaymentsRepository,
    pub config: Arc<Config>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/channels/open", get(open_channels))
        .route("/resource/:meta", get(protected_resource))
        .route("/pay", post(pay))
        .route("/validate", post(validate))
        .route("/channel/close", post(close_channel))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn open_channels(State(state): State<AppState>) -> Result<Json<Vec<paychan_core::PaymentChannel>>, AppError> {
    let channels = state.manager.open_channels().await?;
    Ok(Json(channels))
}

/// Demo protected resource gated behind the micropayment challenge: any
/// request without a valid `X-Payment-Token` header is answered with `402`
/// and a [`PaymentChallenge`] naming this gateway, this receiver, and the
/// per-request price.
async fn protected_resource(
    Path(meta): Path<String>,
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<(StatusCode, String), AppError> {
    if let Some(token) = headers.get("x-payment-token").and_then(|v| v.to_str().ok()) {
        if state.payments.find_by_token(token).await?.is_some() {
            return Ok((StatusCode::OK, format!("resource:{meta}")));
        }
    }

    let challenge = PaymentChallenge {
        receiver: state.manager.address(),
        price: U256::from(1u64),
        gateway: "/pay".to_string(),
        meta: Some(meta),
        contract_address: state.config.channel_manager,
    };
    let body = serde_json::to_string(&challenge).map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok((StatusCode::PAYMENT_REQUIRED, body))
}

/// Accept a signed payment, mint an opaque token, and record it.
async fn pay(State(state): State<AppState>, Json(mut payment): Json<Payment>) -> Result<Json<TokenResponse>, AppError> {
    info!(channel_id = %payment.channel_id, cumulative = %payment.cumulative, "incoming payment");

    state.manager.accept_payment(&payment).await?;

    let token = generate_token();
    payment.token = Some(token.clone());
    state.payments.save(payment).await?;

    Ok(Json(TokenResponse { token }))
}

/// Read-only preflight check: would `pay` accept this payment?
async fn validate(State(state): State<AppState>, Json(payment): Json<Payment>) -> Result<Json<VerifyResponse>, AppError> {
    let valid = state.manager.verify_payment(&payment).await?;
    Ok(Json(VerifyResponse { valid }))
}

async fn close_channel(
    State(state): State<AppState>,
    Json(payload): Json<CloseChannelRequest>,
) -> Result<Json<TxResultView>, AppError> {
    info!(channel_id = %payload.channel_id, "close channel request");
    let tx = state.manager.close_channel(payload.channel_id).await?;
    Ok(Json(tx.into()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
