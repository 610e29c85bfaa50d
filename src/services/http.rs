use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::rewards::RewardRequest;
use super::users::UserRequest;
use super::ServiceError;
use crate::schema;

mod rewards;
mod users;

#[derive(Clone)]
struct AppState {
    user_channel: mpsc::Sender<UserRequest>,
    reward_channel: mpsc::Sender<RewardRequest>,
    initial_grant: u64,
}

fn error_response(error: ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    match error {
        ServiceError::NotFound(address) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User not found", "message": address})),
        ),
        ServiceError::Storage(reason) => {
            log::error!("storage failure: {}", reason);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error"})),
            )
        }
        ServiceError::Internal(reason) => {
            log::error!("internal failure: {}", reason);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error"})),
            )
        }
    }
}

fn internal_error(details: String) -> (StatusCode, Json<serde_json::Value>) {
    log::error!("request plumbing failure: {}", details);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
}

/// Bodies the Json extractor rejects still get the documented error shape.
fn bad_request(message: String) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "Invalid request body", "message": message})),
    )
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

async fn schema_info(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(schema::describe(state.initial_grant)))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "No such endpoint"})),
    )
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/user/{address}",
            get(users::get_user).put(users::put_user),
        )
        .route("/api/users", get(users::all_users))
        .route("/api/migrate", post(users::migrate_user))
        .route("/api/referral", post(rewards::redeem_referral))
        .route("/api/task", post(rewards::complete_task))
        .route("/api/schema", get(schema_info))
        .route("/api/health", get(health))
        .fallback(not_found)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn start_http_server(
    listen: &str,
    initial_grant: u64,
    user_channel: mpsc::Sender<UserRequest>,
    reward_channel: mpsc::Sender<RewardRequest>,
) -> Result<(), anyhow::Error> {
    let app = router(AppState {
        user_channel,
        reward_channel,
        initial_grant,
    });

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::repositories::storage::LocalStore;
    use crate::repositories::users::UserRepository;
    use crate::services::rewards::{RewardRequestHandler, RewardService};
    use crate::services::users::{UserRequestHandler, UserService};
    use crate::services::Service;
    use crate::settings::Rewards;

    fn test_router() -> Router {
        let store = Arc::new(LocalStore::in_memory());
        let repository = UserRepository::new(store, 2000);

        let (user_tx, mut user_rx) = mpsc::channel(16);
        let (reward_tx, mut reward_rx) = mpsc::channel(16);

        let user_handler = UserRequestHandler::new(repository.clone());
        tokio::spawn(async move {
            let mut service = UserService::new();
            service.run(user_handler, &mut user_rx).await;
        });

        let reward_handler = RewardRequestHandler::new(
            repository,
            Rewards {
                initial_grant: 2000,
                referral_reward: 200,
                global_referral_check: true,
            },
        );
        tokio::spawn(async move {
            let mut service = RewardService::new();
            service.run(reward_handler, &mut reward_rx).await;
        });

        router(AppState {
            user_channel: user_tx,
            reward_channel: reward_tx,
            initial_grant: 2000,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn incomplete_put_body_gets_the_json_error_shape() {
        let request = Request::builder()
            .method("PUT")
            .uri("/api/user/0xabc123456789")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"walletAddress": "0xabc123456789"}"#))
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], json!("Invalid request body"));
        assert!(body.get("message").is_some());
    }

    #[tokio::test]
    async fn malformed_referral_body_gets_the_json_error_shape() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/referral")
            .header("content-type", "application/json")
            .body(Body::from("not json"))
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], json!("Invalid request body"));
    }
}
