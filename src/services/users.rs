use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::users::UserRecord;
use crate::repositories::users::{MigrationReport, UserRepository};

pub enum UserRequest {
    GetUser {
        address: String,
        response: oneshot::Sender<Result<UserRecord, ServiceError>>,
    },
    PutUser {
        address: String,
        record: UserRecord,
        response: oneshot::Sender<Result<UserRecord, ServiceError>>,
    },
    AllUsers {
        response: oneshot::Sender<Result<BTreeMap<String, UserRecord>, ServiceError>>,
    },
    MigrateUser {
        address: String,
        response: oneshot::Sender<Result<MigrationReport, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    repository: UserRepository,
}

impl UserRequestHandler {
    pub fn new(repository: UserRepository) -> Self {
        UserRequestHandler { repository }
    }

    async fn get_user(&self, address: &str) -> Result<UserRecord, ServiceError> {
        self.repository
            .get_user(address)
            .await
            .map_err(ServiceError::from)
    }

    async fn put_user(&self, address: &str, record: UserRecord) -> Result<UserRecord, ServiceError> {
        self.repository
            .put_user(address, record)
            .await
            .map_err(ServiceError::from)
    }

    async fn all_users(&self) -> Result<BTreeMap<String, UserRecord>, ServiceError> {
        self.repository.all_users().await.map_err(ServiceError::from)
    }

    async fn migrate_user(&self, address: &str) -> Result<MigrationReport, ServiceError> {
        match self.repository.migrate_user(address).await {
            Ok(Some(report)) => Ok(report),
            Ok(None) => Err(ServiceError::NotFound(address.to_lowercase())),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::GetUser { address, response } => {
                let user = self.get_user(&address).await;
                let _ = response.send(user);
            }
            UserRequest::PutUser {
                address,
                record,
                response,
            } => {
                let user = self.put_user(&address, record).await;
                let _ = response.send(user);
            }
            UserRequest::AllUsers { response } => {
                let users = self.all_users().await;
                let _ = response.send(users);
            }
            UserRequest::MigrateUser { address, response } => {
                let report = self.migrate_user(&address).await;
                let _ = response.send(report);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
