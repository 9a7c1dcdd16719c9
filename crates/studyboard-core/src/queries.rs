//! Cached reads and optimistic mutations for one resource kind
//!
//! [`ResourceQueries`] covers every kind; [`DependentQueries`] adds the
//! parent-scoped child list, creation under a parent, reordering and field
//! validation. Every mutation follows the same protocol:
//!
//! 1. cancel in-flight reads of the affected keys and snapshot them
//! 2. patch the cached values to the expected outcome
//! 3. send the request
//! 4. on failure restore the snapshots and emit a [`Notice::Error`]
//! 5. on settle invalidate the affected keys and wait for their refetch

use serde_json::{json, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};

use crate::cache::{fetcher, QueryCache};
use crate::reorder::ReorderList;
use crate::resources::{resource_config, ResourceConfig};
use crate::retry::RetryPolicy;
use crate::traits::{DependentOperations, ResourceOperations};
use studyboard_api::{
    DependentResource, FieldValidation, Fields, OrderPosition, Ordered, Page, PageQuery,
    QueryKey, QueryKeys, Resource, ResourceSummary, Result,
};

/// User-facing message about a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Info(m) | Notice::Error(m) => m,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notice::Error(_))
    }
}

/// Broadcast channel of [`Notice`]s shared by every query object
#[derive(Debug, Clone)]
pub struct Notices {
    sender: broadcast::Sender<Notice>,
}

impl Default for Notices {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notices {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    pub fn stream(&self) -> BroadcastStream<Notice> {
        BroadcastStream::new(self.subscribe())
    }

    pub fn info(&self, message: impl Into<String>) {
        let _ = self.sender.send(Notice::Info(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        let _ = self.sender.send(Notice::Error(message.into()));
    }
}

/// Reads and mutations for resource kind `R` through operations `O`
pub struct ResourceQueries<R, O: ?Sized = dyn ResourceOperations<R>>
where
    R: Resource,
{
    ops: Arc<O>,
    cache: QueryCache,
    notices: Notices,
    keys: QueryKeys,
    config: &'static ResourceConfig,
    _resource: PhantomData<fn() -> R>,
}

impl<R, O> Clone for ResourceQueries<R, O>
where
    R: Resource,
    O: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            ops: Arc::clone(&self.ops),
            cache: self.cache.clone(),
            notices: self.notices.clone(),
            keys: self.keys,
            config: self.config,
            _resource: PhantomData,
        }
    }
}

impl<R, O> ResourceQueries<R, O>
where
    R: Resource,
    O: ResourceOperations<R> + ?Sized + 'static,
{
    pub fn new(ops: Arc<O>, cache: QueryCache, notices: Notices) -> Self {
        let keys = ops.query_keys();
        Self {
            ops,
            cache,
            notices,
            keys,
            config: resource_config(R::KIND),
            _resource: PhantomData,
        }
    }

    pub fn keys(&self) -> QueryKeys {
        self.keys
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn config(&self) -> &'static ResourceConfig {
        self.config
    }

    pub fn operations(&self) -> &Arc<O> {
        &self.ops
    }

    pub async fn detail(&self, id: &str) -> Result<R> {
        let ops = Arc::clone(&self.ops);
        let owned = id.to_string();
        let fetch = fetcher(move || {
            let ops = Arc::clone(&ops);
            let id = owned.clone();
            async move { ops.get_one(&id).await }
        });
        self.cache.query(&self.keys.detail(id), fetch).await
    }

    pub async fn summary(&self, id: &str) -> Result<ResourceSummary> {
        let ops = Arc::clone(&self.ops);
        let owned = id.to_string();
        let fetch = fetcher(move || {
            let ops = Arc::clone(&ops);
            let id = owned.clone();
            async move { ops.get_one_preview(&id).await }
        });
        self.cache.query(&self.keys.summary(id), fetch).await
    }

    /// One page of the paginated table, keeping the previous page visible
    /// while a new one loads
    pub async fn page(&self, query: &PageQuery) -> Result<Page<R>> {
        let ops = Arc::clone(&self.ops);
        let owned = query.clone();
        let fetch = fetcher(move || {
            let ops = Arc::clone(&ops);
            let query = owned.clone();
            async move { ops.get_paginated(&query).await }
        });
        self.cache.query(&self.keys.list(query), fetch).await
    }

    /// Partial update of one resource.
    ///
    /// The cached detail is patched with `fields` before the request; a
    /// failure restores it exactly.
    pub async fn update(&self, id: &str, fields: Fields) -> Result<R> {
        self.update_with(id, fields, &[]).await
    }

    /// Update that also patches the entry for `id` in `lists` (child lists)
    pub(crate) async fn update_with(
        &self,
        id: &str,
        fields: Fields,
        lists: &[QueryKey],
    ) -> Result<R> {
        let detail = self.keys.detail(id);
        let mut tracked = vec![detail.clone()];
        tracked.extend(lists.iter().cloned());

        self.notices.info(format!("Saving {}...", self.config.label));
        let mut tx = self.cache.begin(&tracked).await;
        tx.apply(&detail, |current| {
            current.map(|mut value| {
                merge_fields(&mut value, &fields);
                value
            })
        })
        .await;
        for list in lists {
            tx.apply(list, |current| current.map(|v| patch_by_id(v, id, &fields)))
                .await;
        }

        match self.ops.update(id, &fields).await {
            Ok(updated) => {
                info!("[ResourceQueries] updated {} {}", self.config.tag, id);
                tx.commit_with(&[self.keys.summary(id), self.keys.lists()])
                    .await
                    .settled()
                    .await;
                self.notices.info(format!("{} saved", self.config.label));
                Ok(updated)
            }
            Err(e) => {
                error!("[ResourceQueries] update of {} {} failed: {}", self.config.tag, id, e);
                tx.rollback().await;
                self.notices.error(format!(
                    "{} could not be saved: {}",
                    self.config.label, e
                ));
                Err(e)
            }
        }
    }

    /// Creates an independent resource and refreshes every list of its tag
    pub async fn create(&self, data: &R::Create) -> Result<R> {
        self.notices.info(format!("Creating {}...", self.config.label));
        match self.ops.create(data).await {
            Ok(created) => {
                info!(
                    "[ResourceQueries] created {} {}",
                    self.config.tag,
                    created.id()
                );
                self.cache.invalidate(&self.keys.lists()).await.settled().await;
                self.notices.info(format!("{} created", self.config.label));
                Ok(created)
            }
            Err(e) => {
                error!("[ResourceQueries] create of {} failed: {}", self.config.tag, e);
                self.notices.error(format!(
                    "{} could not be created: {}",
                    self.config.label, e
                ));
                Err(e)
            }
        }
    }

    /// Deletes a resource, dropping it from every cached page first
    pub async fn delete(&self, id: &str) -> Result<()> {
        let pages: Vec<QueryKey> = self
            .cache
            .keys()
            .await
            .into_iter()
            .filter(|k| k.starts_with(&self.keys.lists()))
            .collect();
        self.delete_with(id, &pages).await
    }

    pub(crate) async fn delete_with(&self, id: &str, lists: &[QueryKey]) -> Result<()> {
        let own = self.keys.detail_root(id);
        self.cache.cancel(&own).await;

        self.notices.info(format!("Deleting {}...", self.config.label));
        let mut tx = self.cache.begin(lists).await;
        for list in lists {
            tx.apply(list, |current| current.map(|v| remove_by_id(v, id)))
                .await;
        }

        match self.ops.delete(id).await {
            Ok(()) => {
                info!("[ResourceQueries] deleted {} {}", self.config.tag, id);
                self.cache.remove(&own).await;
                tx.commit_with(&[self.keys.lists()]).await.settled().await;
                self.notices.info(format!("{} deleted", self.config.label));
                Ok(())
            }
            Err(e) => {
                error!("[ResourceQueries] delete of {} {} failed: {}", self.config.tag, id, e);
                tx.rollback().await;
                self.notices.error(format!(
                    "{} could not be deleted: {}",
                    self.config.label, e
                ));
                Err(e)
            }
        }
    }
}

/// Queries for a resource that lives under a parent
pub struct DependentQueries<R>
where
    R: DependentResource,
{
    inner: ResourceQueries<R, dyn DependentOperations<R>>,
}

impl<R: DependentResource> Clone for DependentQueries<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> DependentQueries<R>
where
    R: DependentResource,
{
    pub fn new(ops: Arc<dyn DependentOperations<R>>, cache: QueryCache, notices: Notices) -> Self {
        Self {
            inner: ResourceQueries::new(ops, cache, notices),
        }
    }

    /// The parent-independent operations (detail, summary, page)
    pub fn base(&self) -> &ResourceQueries<R, dyn DependentOperations<R>> {
        &self.inner
    }

    pub fn keys(&self) -> QueryKeys {
        self.inner.keys
    }

    pub async fn detail(&self, id: &str) -> Result<R> {
        self.inner.detail(id).await
    }

    pub async fn summary(&self, id: &str) -> Result<ResourceSummary> {
        self.inner.summary(id).await
    }

    /// Every child of `parent_id`; failed loads retry with backoff
    pub async fn children(&self, parent_id: &str) -> Result<Vec<R>> {
        let ops = Arc::clone(&self.inner.ops);
        let owned = parent_id.to_string();
        let fetch = fetcher(move || {
            let ops = Arc::clone(&ops);
            let parent_id = owned.clone();
            async move { ops.get_list(&parent_id).await }
        });
        self.inner
            .cache
            .query_with(
                &self.keys().children(parent_id),
                fetch,
                Some(RetryPolicy::child_list()),
            )
            .await
    }

    /// Creates a child of `parent_id`.
    ///
    /// A provisional entry is appended to the cached child list at the next
    /// free position until the server's list replaces it.
    pub async fn create_in(&self, parent_id: &str, data: &R::Create) -> Result<R> {
        let q = &self.inner;
        let children = q.keys.children(parent_id);

        q.notices.info(format!("Creating {}...", q.config.label));
        let mut tx = q.cache.begin(std::slice::from_ref(&children)).await;
        let provisional = provisional_entry::<R>(parent_id, data)?;
        tx.apply(&children, |current| {
            current.map(|list| append_provisional(list, provisional))
        })
        .await;

        match q.ops.create_in(parent_id, data).await {
            Ok(created) => {
                info!(
                    "[DependentQueries] created {} {} under {}",
                    q.config.tag,
                    created.id(),
                    parent_id
                );
                tx.commit_with(&[q.keys.lists()]).await.settled().await;
                q.notices.info(format!("{} created", q.config.label));
                Ok(created)
            }
            Err(e) => {
                error!(
                    "[DependentQueries] create of {} under {} failed: {}",
                    q.config.tag, parent_id, e
                );
                tx.rollback().await;
                q.notices.error(format!(
                    "{} could not be created: {}",
                    q.config.label, e
                ));
                Err(e)
            }
        }
    }

    pub async fn update(&self, parent_id: &str, id: &str, fields: Fields) -> Result<R> {
        let children = self.keys().children(parent_id);
        self.inner
            .update_with(id, fields, std::slice::from_ref(&children))
            .await
    }

    /// Deletes a child; remaining siblings are renumbered densely in the
    /// cached list straight away
    pub async fn delete(&self, parent_id: &str, id: &str) -> Result<()> {
        let children = self.keys().children(parent_id);
        self.inner
            .delete_with(id, std::slice::from_ref(&children))
            .await
    }

    pub async fn validate_field(
        &self,
        parent_id: &str,
        field: &str,
        value: &str,
        exclude_id: Option<&str>,
    ) -> Result<FieldValidation> {
        debug!(
            "[DependentQueries] validating {}.{} under {}",
            self.inner.config.tag, field, parent_id
        );
        self.inner
            .ops
            .validate_field(parent_id, field, value, exclude_id)
            .await
    }
}

impl<R> DependentQueries<R>
where
    R: DependentResource + Ordered,
{
    /// Writes new sibling positions in one request
    pub async fn reorder(&self, parent_id: &str, positions: &[OrderPosition]) -> Result<()> {
        let q = &self.inner;
        let children = q.keys.children(parent_id);

        q.notices.info(format!("Saving {} order...", q.config.label));
        let mut tx = q.cache.begin(std::slice::from_ref(&children)).await;
        tx.apply(&children, |current| {
            current.map(|list| apply_positions(list, positions))
        })
        .await;

        match q.ops.reorder(parent_id, positions).await {
            Ok(()) => {
                info!(
                    "[DependentQueries] reordered {} {} under {}",
                    positions.len(),
                    q.config.plural_label,
                    parent_id
                );
                tx.commit().await.settled().await;
                q.notices.info(format!("{} order saved", q.config.label));
                Ok(())
            }
            Err(e) => {
                error!(
                    "[DependentQueries] reorder of {} under {} failed: {}",
                    q.config.tag, parent_id, e
                );
                tx.rollback().await;
                q.notices
                    .error(format!("Order could not be saved: {}", e));
                Err(e)
            }
        }
    }

    /// Loads the child list into a drag-and-drop model
    pub async fn reorder_list(&self, parent_id: &str) -> Result<ReorderList<R>> {
        Ok(ReorderList::new(self.children(parent_id).await?))
    }

    /// Persists the outcome of a drop. On failure the local list is rolled
    /// back along with the cache.
    pub async fn save_order(
        &self,
        parent_id: &str,
        list: &mut ReorderList<R>,
        positions: &[OrderPosition],
    ) -> Result<()> {
        match self.reorder(parent_id, positions).await {
            Ok(()) => {
                list.confirm();
                Ok(())
            }
            Err(e) => {
                list.rollback();
                Err(e)
            }
        }
    }
}

/// JSON stand-in for a child that the server has not created yet
fn provisional_entry<R: DependentResource>(parent_id: &str, data: &R::Create) -> Result<Value> {
    let mut entry = serde_json::to_value(data)?;
    let now = chrono::Utc::now();
    if let Value::Object(map) = &mut entry {
        map.insert(
            "id".to_string(),
            json!(format!("provisional-{}", uuid::Uuid::new_v4())),
        );
        map.insert(R::PARENT_FIELD.to_string(), json!(parent_id));
        map.entry("name").or_insert_with(|| json!(""));
        map.insert("created_at".to_string(), json!(now));
        map.insert("updated_at".to_string(), json!(now));
    }
    Ok(entry)
}

fn position_of(value: &Value) -> i64 {
    value
        .get("order_position")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn id_of(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

/// Rows of a cached list: a bare array or a `{rows, ...}` page
fn rows_mut(list: &mut Value) -> Option<&mut Vec<Value>> {
    match list {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get_mut("rows").and_then(Value::as_array_mut),
        _ => None,
    }
}

fn merge_fields(value: &mut Value, fields: &Fields) {
    if let Value::Object(map) = value {
        for (field, v) in fields {
            map.insert(field.clone(), v.clone());
        }
    }
}

fn append_provisional(mut list: Value, mut entry: Value) -> Value {
    if let Some(items) = rows_mut(&mut list) {
        let next = items.iter().map(position_of).max().unwrap_or(0) + 1;
        if let Value::Object(map) = &mut entry {
            map.insert("order_position".to_string(), json!(next));
        }
        items.push(entry);
    }
    list
}

fn patch_by_id(mut list: Value, id: &str, fields: &Fields) -> Value {
    if let Some(items) = rows_mut(&mut list) {
        for item in items.iter_mut().filter(|item| id_of(item) == Some(id)) {
            merge_fields(item, fields);
        }
    }
    list
}

/// Drops `id`; a bare child list of ordered siblings is renumbered to stay dense
fn remove_by_id(mut list: Value, id: &str) -> Value {
    let child_list = list.is_array();
    if let Some(items) = rows_mut(&mut list) {
        items.retain(|item| id_of(item) != Some(id));
        let ordered = items.iter().all(|item| item.get("order_position").is_some());
        if child_list && ordered {
            items.sort_by_key(position_of);
            for (index, item) in items.iter_mut().enumerate() {
                item["order_position"] = json!(index as i64 + 1);
            }
            relink_rows(items);
        }
    }
    list
}

fn apply_positions(mut list: Value, positions: &[OrderPosition]) -> Value {
    let by_id: HashMap<&str, i64> = positions
        .iter()
        .map(|p| (p.id.as_str(), p.order_position))
        .collect();
    if let Some(items) = rows_mut(&mut list) {
        for item in items.iter_mut() {
            let position = id_of(item).and_then(|id| by_id.get(id)).copied();
            if let Some(position) = position {
                item["order_position"] = json!(position);
            }
        }
        items.sort_by_key(position_of);
        relink_rows(items);
    }
    list
}

/// Rebuilds `next` links in list order when the cached rows carry them
fn relink_rows(items: &mut [Value]) {
    let linked = items
        .iter()
        .any(|item| item.get("next").is_some_and(|next| !next.is_null()));
    if !linked {
        return;
    }
    let successors: Vec<Value> = items
        .iter()
        .skip(1)
        .map(|item| item.get("id").cloned().unwrap_or(Value::Null))
        .chain(std::iter::once(Value::Null))
        .collect();
    for (item, next) in items.iter_mut().zip(successors) {
        if let Value::Object(map) = item {
            map.insert("next".to_string(), next);
        }
    }
}
