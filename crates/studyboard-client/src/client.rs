//! Uniform CRUD clients for every resource kind
//!
//! Paths follow the API's conventions:
//!
//! | operation | request |
//! |-----------|---------|
//! | get_one | `GET {tag}/{id}` |
//! | get_paginated | `GET {tag}/?page_index=..&page_size=..` |
//! | get_one_preview | `GET {tag}/{id}/summary` |
//! | update | `PATCH {tag}/{id}` |
//! | create | `POST {tag}/` |
//! | delete | `DELETE {tag}/{id}` |
//! | get_list / create_in | `GET` / `POST {parentTag}/{parentId}/{tag}` |
//! | reorder | `PATCH {parentTag}/{parentId}/{tag}/reorder` |
//! | validate_field | `GET {parentTag}/{parentId}/{tag}/validate?{field}={value}` |
//!
//! Ids are percent-encoded as single path segments.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

use crate::http::ApiClient;
use studyboard_api::{
    DependentResource, FieldValidation, Fields, OrderPosition, Page, PageEnvelope, PageQuery,
    QueryKeys, Resource, ResourceSummary, Result,
};
use studyboard_core::resources::{resource_config, ResourceConfig};
use studyboard_core::traits::{Creator, DependentOperations, ResourceOperations};

/// Client for a resource addressed directly under its own tag
pub struct ResourceClient<R> {
    api: ApiClient,
    config: &'static ResourceConfig,
    _resource: PhantomData<fn() -> R>,
}

impl<R> Clone for ResourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            config: self.config,
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> ResourceClient<R> {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            config: resource_config(R::KIND),
            _resource: PhantomData,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.config.tag
    }

    fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.config.tag, urlencoding::encode(id))
    }

    fn collection_path(&self) -> String {
        format!("{}/", self.config.tag)
    }
}

#[async_trait]
impl<R: Resource> ResourceOperations<R> for ResourceClient<R> {
    fn query_keys(&self) -> QueryKeys {
        self.config.query_keys()
    }

    async fn get_one(&self, id: &str) -> Result<R> {
        self.api.get(&self.item_path(id), &[]).await
    }

    async fn get_paginated(&self, query: &PageQuery) -> Result<Page<R>> {
        let envelope: PageEnvelope<R> = self
            .api
            .get(&self.collection_path(), &query.to_query_pairs())
            .await?;
        Ok(envelope.into_page(query.page_size))
    }

    async fn get_one_preview(&self, id: &str) -> Result<ResourceSummary> {
        self.api
            .get(&format!("{}/summary", self.item_path(id)), &[])
            .await
    }

    async fn update(&self, id: &str, fields: &Fields) -> Result<R> {
        debug!(
            "[ResourceClient] PATCH {} with fields {:?}",
            self.item_path(id),
            fields.keys().collect::<Vec<_>>()
        );
        self.api.patch(&self.item_path(id), fields).await
    }

    async fn create(&self, data: &R::Create) -> Result<R> {
        let created: R = self.api.post(&self.collection_path(), data).await?;
        info!("[ResourceClient] created {} {}", self.config.tag, created.id());
        Ok(created)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.api.delete(&self.item_path(id)).await
    }
}

/// Client for a resource that lives under a parent resource
pub struct DependentResourceClient<R> {
    inner: ResourceClient<R>,
    parent: &'static ResourceConfig,
}

impl<R> Clone for DependentResourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            parent: self.parent,
        }
    }
}

impl<R: DependentResource> DependentResourceClient<R> {
    pub fn new(api: ApiClient) -> Self {
        Self {
            inner: ResourceClient::new(api),
            parent: resource_config(R::PARENT),
        }
    }

    /// `{parentTag}/{parentId}/{tag}`
    pub fn children_path(&self, parent_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.parent.tag,
            urlencoding::encode(parent_id),
            self.inner.tag()
        )
    }
}

#[async_trait]
impl<R: DependentResource> ResourceOperations<R> for DependentResourceClient<R> {
    fn query_keys(&self) -> QueryKeys {
        self.inner.query_keys()
    }

    async fn get_one(&self, id: &str) -> Result<R> {
        self.inner.get_one(id).await
    }

    async fn get_paginated(&self, query: &PageQuery) -> Result<Page<R>> {
        self.inner.get_paginated(query).await
    }

    async fn get_one_preview(&self, id: &str) -> Result<ResourceSummary> {
        self.inner.get_one_preview(id).await
    }

    async fn update(&self, id: &str, fields: &Fields) -> Result<R> {
        self.inner.update(id, fields).await
    }

    async fn create(&self, data: &R::Create) -> Result<R> {
        self.inner.create(data).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await
    }
}

#[async_trait]
impl<R: DependentResource> DependentOperations<R> for DependentResourceClient<R> {
    async fn get_list(&self, parent_id: &str) -> Result<Vec<R>> {
        self.inner.api.get(&self.children_path(parent_id), &[]).await
    }

    async fn create_in(&self, parent_id: &str, data: &R::Create) -> Result<R> {
        let created: R = self
            .inner
            .api
            .post(&self.children_path(parent_id), data)
            .await?;
        info!(
            "[DependentResourceClient] created {} {} under {} {}",
            self.inner.tag(),
            created.id(),
            self.parent.tag,
            parent_id
        );
        Ok(created)
    }

    async fn reorder(&self, parent_id: &str, positions: &[OrderPosition]) -> Result<()> {
        let path = format!("{}/reorder", self.children_path(parent_id));
        debug!(
            "[DependentResourceClient] PATCH {} with {} positions",
            path,
            positions.len()
        );
        // The reorder endpoint may answer with the list or with nothing
        let _: serde_json::Value = self.inner.api.patch(&path, positions).await?;
        Ok(())
    }

    async fn validate_field(
        &self,
        parent_id: &str,
        field: &str,
        value: &str,
        exclude_id: Option<&str>,
    ) -> Result<FieldValidation> {
        let mut query = vec![(field, value.to_string())];
        if let Some(id) = exclude_id {
            query.push(("exclude_id", id.to_string()));
        }
        let path = format!("{}/validate", self.children_path(parent_id));
        self.inner.api.get(&path, &query).await
    }
}

/// Factory methods so callers never spell out client types
impl ApiClient {
    pub fn resource<R: Resource>(&self) -> Arc<dyn ResourceOperations<R>> {
        Arc::new(ResourceClient::<R>::new(self.clone()))
    }

    pub fn dependent<R: DependentResource>(&self) -> Arc<dyn DependentOperations<R>> {
        Arc::new(DependentResourceClient::<R>::new(self.clone()))
    }

    /// Creation flavor for a form over an independent resource
    pub fn base_creator<R: Resource>(&self) -> Creator<R> {
        Creator::Base(self.resource::<R>())
    }

    /// Creation flavor for a form scoped to `parent_id`
    pub fn dependent_creator<R: DependentResource>(
        &self,
        parent_id: impl Into<String>,
    ) -> Creator<R> {
        Creator::Dependent {
            ops: self.dependent::<R>(),
            parent_id: parent_id.into(),
        }
    }
}
