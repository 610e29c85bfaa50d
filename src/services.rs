use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::storage::{StorageBackend, StoreError};
use crate::repositories::users::UserRepository;
use crate::settings::Settings;

mod http;
pub mod rewards;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(reason) => ServiceError::Storage(reason),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(
    store: Arc<dyn StorageBackend>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (reward_tx, mut reward_rx) = mpsc::channel(512);

    let repository = UserRepository::new(store, settings.rewards.initial_grant);

    log::info!("Starting user service.");
    let mut user_service = users::UserService::new();
    let user_repository = repository.clone();
    tokio::spawn(async move {
        user_service
            .run(users::UserRequestHandler::new(user_repository), &mut user_rx)
            .await;
    });

    log::info!("Starting reward service.");
    let mut reward_service = rewards::RewardService::new();
    let reward_settings = settings.rewards.clone();
    tokio::spawn(async move {
        reward_service
            .run(
                rewards::RewardRequestHandler::new(repository, reward_settings),
                &mut reward_rx,
            )
            .await;
    });

    log::info!("Starting HTTP server.");
    http::start_http_server(
        &settings.server.listen,
        settings.rewards.initial_grant,
        user_tx,
        reward_tx,
    )
    .await
}
