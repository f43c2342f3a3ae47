use crate::{
    db::DbPool,
    entities::{lesson, user},
    errors::ServiceError,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
}

/// Price is `None` when the lesson exists but is not for sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonRecord {
    pub id: Uuid,
    pub title: String,
    pub price: Option<Decimal>,
}

/// Existence check against the platform's account service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, ServiceError>;
}

/// Read-only price lookup against the lesson catalog.
#[async_trait]
pub trait LessonCatalog: Send + Sync {
    async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<LessonRecord>, ServiceError>;
}

/// Both collaborators backed by the shared `users` and `lessons` tables.
#[derive(Clone)]
pub struct DbCatalog {
    db_pool: Arc<DbPool>,
}

impl DbCatalog {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserDirectory for DbCatalog {
    #[instrument(skip(self))]
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, ServiceError> {
        let found = user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, user_id = %user_id, "Failed to look up user");
                ServiceError::DatabaseError(e)
            })?;

        Ok(found.map(|u| UserRecord {
            id: u.id,
            username: u.username,
        }))
    }
}

#[async_trait]
impl LessonCatalog for DbCatalog {
    #[instrument(skip(self))]
    async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<LessonRecord>, ServiceError> {
        let found = lesson::Entity::find_by_id(lesson_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, lesson_id = %lesson_id, "Failed to look up lesson");
                ServiceError::DatabaseError(e)
            })?;

        Ok(found.map(|l| LessonRecord {
            id: l.id,
            title: l.title,
            price: l.price,
        }))
    }
}

#[cfg(test)]
pub(crate) mod mocks {
    use super::*;
    use mockall::mock;

    mock! {
        pub Users {}
        #[async_trait]
        impl UserDirectory for Users {
            async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, ServiceError>;
        }
    }

    mock! {
        pub Lessons {}
        #[async_trait]
        impl LessonCatalog for Lessons {
            async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<LessonRecord>, ServiceError>;
        }
    }
}
