use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;

use super::{bad_request, error_response, internal_error, AppState};
use crate::models::users::UserRecord;
use crate::services::users::UserRequest;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateBody {
    wallet_address: String,
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let (user_tx, user_rx) = oneshot::channel();

    let sent = state
        .user_channel
        .send(UserRequest::GetUser {
            address,
            response: user_tx,
        })
        .await;
    if let Err(e) = sent {
        return internal_error(e.to_string());
    }

    match user_rx.await {
        Ok(Ok(user)) => (StatusCode::OK, Json(json!(user))),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => internal_error(e.to_string()),
    }
}

pub async fn put_user(
    State(state): State<AppState>,
    Path(address): Path<String>,
    body: Result<Json<UserRecord>, JsonRejection>,
) -> impl IntoResponse {
    let record = match body {
        Ok(Json(record)) => record,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let (user_tx, user_rx) = oneshot::channel();

    let sent = state
        .user_channel
        .send(UserRequest::PutUser {
            address,
            record,
            response: user_tx,
        })
        .await;
    if let Err(e) = sent {
        return internal_error(e.to_string());
    }

    match user_rx.await {
        Ok(Ok(user)) => (StatusCode::OK, Json(json!(user))),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => internal_error(e.to_string()),
    }
}

pub async fn all_users(State(state): State<AppState>) -> impl IntoResponse {
    let (users_tx, users_rx) = oneshot::channel();

    let sent = state
        .user_channel
        .send(UserRequest::AllUsers { response: users_tx })
        .await;
    if let Err(e) = sent {
        return internal_error(e.to_string());
    }

    match users_rx.await {
        Ok(Ok(users)) => (StatusCode::OK, Json(json!(users))),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => internal_error(e.to_string()),
    }
}

pub async fn migrate_user(
    State(state): State<AppState>,
    body: Result<Json<MigrateBody>, JsonRejection>,
) -> impl IntoResponse {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let (report_tx, report_rx) = oneshot::channel();

    let sent = state
        .user_channel
        .send(UserRequest::MigrateUser {
            address: body.wallet_address,
            response: report_tx,
        })
        .await;
    if let Err(e) = sent {
        return internal_error(e.to_string());
    }

    match report_rx.await {
        Ok(Ok(report)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "currentVersion": report.previous_version,
                "latestVersion": report.current_version,
            })),
        ),
        Ok(Err(service_error)) => error_response(service_error),
        Err(e) => internal_error(e.to_string()),
    }
}
