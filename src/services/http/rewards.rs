use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tokio::sync::oneshot;

use super::{bad_request, error_response, internal_error, AppState};
use crate::models::rewards::{RedeemRequest, ReferralOutcome, TaskOutcome, TaskRequest};
use crate::services::rewards::RewardRequest;

pub async fn redeem_referral(
    State(state): State<AppState>,
    body: Result<Json<RedeemRequest>, JsonRejection>,
) -> impl IntoResponse {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let (outcome_tx, outcome_rx) = oneshot::channel();

    let sent = state
        .reward_channel
        .send(RewardRequest::Redeem {
            referrer_code: body.referrer_code,
            new_user_address: body.new_user_address,
            reward_amount: body.reward_amount,
            response: outcome_tx,
        })
        .await;
    if let Err(e) = sent {
        return internal_error(e.to_string());
    }

    match outcome_rx.await {
        Ok(Ok(ReferralOutcome::Granted { referrer, new_user })) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "referrerData": referrer,
                "newUserData": new_user,
                "message": "Referral reward granted",
            })),
        ),
        Ok(Ok(ReferralOutcome::Rejected(rejection))) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": rejection.message()})),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => internal_error(e.to_string()),
    }
}

pub async fn complete_task(
    State(state): State<AppState>,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> impl IntoResponse {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let (outcome_tx, outcome_rx) = oneshot::channel();

    let sent = state
        .reward_channel
        .send(RewardRequest::CompleteTask {
            address: body.wallet_address,
            task: body.task_type,
            response: outcome_tx,
        })
        .await;
    if let Err(e) = sent {
        return internal_error(e.to_string());
    }

    match outcome_rx.await {
        Ok(Ok(TaskOutcome::Granted { user, reward })) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "userData": user,
                "reward": reward,
                "message": "Task completed",
            })),
        ),
        Ok(Ok(TaskOutcome::Rejected(rejection))) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": rejection.message()})),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => internal_error(e.to_string()),
    }
}
