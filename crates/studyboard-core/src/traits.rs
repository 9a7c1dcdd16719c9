//! Resource operation traits
//!
//! These traits are the seam between the query layer and whatever talks to
//! the API: the reqwest-backed clients in `studyboard-client` and the
//! in-memory fake used by tests and offline mode both implement them.

use async_trait::async_trait;
use std::sync::Arc;

use studyboard_api::{
    FieldValidation, Fields, OrderPosition, Page, PageQuery, QueryKeys, Resource, ResourceSummary,
    Result,
};

/// CRUD operations available for every resource kind
#[async_trait]
pub trait ResourceOperations<R>: Send + Sync
where
    R: Resource,
{
    /// Cache key scheme for this resource's tag
    fn query_keys(&self) -> QueryKeys;

    async fn get_one(&self, id: &str) -> Result<R>;

    async fn get_paginated(&self, query: &PageQuery) -> Result<Page<R>>;

    async fn get_one_preview(&self, id: &str) -> Result<ResourceSummary>;

    /// Partial update; only the given fields change
    async fn update(&self, id: &str, fields: &Fields) -> Result<R>;

    async fn create(&self, data: &R::Create) -> Result<R>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Operations on resources addressed under a parent
#[async_trait]
pub trait DependentOperations<R>: ResourceOperations<R>
where
    R: Resource,
{
    /// Every child of `parent_id`, unpaginated
    async fn get_list(&self, parent_id: &str) -> Result<Vec<R>>;

    async fn create_in(&self, parent_id: &str, data: &R::Create) -> Result<R>;

    /// Writes the order positions of several siblings in one request
    async fn reorder(&self, parent_id: &str, positions: &[OrderPosition]) -> Result<()>;

    /// Server-side uniqueness/validity check scoped to the parent.
    /// `exclude_id` keeps a resource being edited from conflicting with itself.
    async fn validate_field(
        &self,
        parent_id: &str,
        field: &str,
        value: &str,
        exclude_id: Option<&str>,
    ) -> Result<FieldValidation>;
}

/// How a creation form submits, fixed when the form is built
pub enum Creator<R: Resource> {
    Base(Arc<dyn ResourceOperations<R>>),
    Dependent {
        ops: Arc<dyn DependentOperations<R>>,
        parent_id: String,
    },
}

impl<R: Resource> Clone for Creator<R> {
    fn clone(&self) -> Self {
        match self {
            Creator::Base(ops) => Creator::Base(Arc::clone(ops)),
            Creator::Dependent { ops, parent_id } => Creator::Dependent {
                ops: Arc::clone(ops),
                parent_id: parent_id.clone(),
            },
        }
    }
}

impl<R: Resource> Creator<R> {
    pub async fn create(&self, data: &R::Create) -> Result<R> {
        match self {
            Creator::Base(ops) => ops.create(data).await,
            Creator::Dependent { ops, parent_id } => ops.create_in(parent_id, data).await,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Creator::Base(_) => None,
            Creator::Dependent { parent_id, .. } => Some(parent_id),
        }
    }
}
