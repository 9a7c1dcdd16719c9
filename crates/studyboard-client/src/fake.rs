//! In-memory study API for tests and offline mode
//!
//! FakeStudyApi keeps every resource kind as JSON rows behind one lock and
//! hands out typed [`FakeResource`] handles implementing the same operation
//! traits as the HTTP clients:
//! - Child lists are kept dense: create appends at max + 1, delete and
//!   reorder renumber siblings 1..n
//! - Every call is recorded with the method and encoded path the HTTP client would use
//! - Failures can be queued per method to exercise rollback paths

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use studyboard_api::{
    ClientError, DependentResource, FieldValidation, Fields, OrderPosition, Page, PageQuery,
    QueryKeys, Resource, ResourceSummary, Result, SortDirection,
};
use studyboard_core::resources::{display_value, resource_config, ResourceConfig};
use studyboard_core::traits::{DependentOperations, ResourceOperations};

/// One call made against the fake
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    tables: HashMap<&'static str, Vec<Value>>,
    requests: Vec<RecordedRequest>,
    failures: HashMap<Method, VecDeque<ClientError>>,
    next_id: u64,
}

impl FakeState {
    fn rows(&mut self, tag: &'static str) -> &mut Vec<Value> {
        self.tables.entry(tag).or_default()
    }

    fn find(&self, tag: &str, id: &str) -> Option<&Value> {
        self.tables
            .get(tag)
            .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(id)))
    }

    fn new_id(&mut self, tag: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", tag, self.next_id)
    }
}

#[derive(Clone, Default)]
pub struct FakeStudyApi {
    state: Arc<Mutex<FakeState>>,
    latency: Option<Duration>,
}

impl FakeStudyApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before touching the store
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn resource<R: Resource>(&self) -> Arc<FakeResource<R>> {
        Arc::new(FakeResource {
            api: self.clone(),
            config: resource_config(R::KIND),
            _resource: PhantomData,
        })
    }

    /// Inserts rows as if the server already held them
    pub async fn seed<R: Resource>(&self, items: impl IntoIterator<Item = R>) -> Result<()> {
        let tag = resource_config(R::KIND).tag;
        let values = items
            .into_iter()
            .map(|item| serde_json::to_value(item))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.state.lock().await.rows(tag).extend(values);
        Ok(())
    }

    /// Current rows of kind `R`, in insertion order
    pub async fn all<R: Resource>(&self) -> Result<Vec<R>> {
        let tag = resource_config(R::KIND).tag;
        let mut state = self.state.lock().await;
        decode_rows(state.rows(tag).clone())
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn requests_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }

    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    /// The next call using `method` fails with `error`
    pub async fn fail_next(&self, method: Method, error: ClientError) {
        self.state
            .lock()
            .await
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Records the call, applies latency, and pops a queued failure
    async fn enter(
        &self,
        method: Method,
        path: String,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<tokio::sync::MutexGuard<'_, FakeState>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().await;
        debug!("[FakeStudyApi] {} {}", method, path);
        let failure = state
            .failures
            .get_mut(&method)
            .and_then(|queue| queue.pop_front());
        state.requests.push(RecordedRequest {
            method,
            path,
            query,
            body,
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

/// Typed handle on one resource kind of a [`FakeStudyApi`]
pub struct FakeResource<R> {
    api: FakeStudyApi,
    config: &'static ResourceConfig,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> FakeResource<R> {
    fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.config.tag, urlencoding::encode(id))
    }

    fn not_found(&self, id: &str) -> ClientError {
        ClientError::NotFound {
            path: self.item_path(id),
        }
    }

    fn new_row(&self, state: &mut FakeState, data: &R::Create) -> Result<Value> {
        let mut row = serde_json::to_value(data)?;
        let now = Utc::now();
        let id = state.new_id(self.config.tag);
        if let Value::Object(map) = &mut row {
            map.insert("id".to_string(), json!(id));
            map.entry("name").or_insert_with(|| json!(""));
            map.entry("description").or_insert_with(|| json!(""));
            map.insert("created_at".to_string(), json!(now));
            map.insert("updated_at".to_string(), json!(now));
        }
        Ok(row)
    }
}

impl<R: DependentResource> FakeResource<R> {
    fn children_path(&self, parent_id: &str) -> String {
        let parent = resource_config(R::PARENT);
        format!(
            "{}/{}/{}",
            parent.tag,
            urlencoding::encode(parent_id),
            self.config.tag
        )
    }

    fn is_child_of(row: &Value, parent_id: &str) -> bool {
        row.get(R::PARENT_FIELD).and_then(Value::as_str) == Some(parent_id)
    }
}

#[async_trait]
impl<R: Resource> ResourceOperations<R> for FakeResource<R> {
    fn query_keys(&self) -> QueryKeys {
        self.config.query_keys()
    }

    async fn get_one(&self, id: &str) -> Result<R> {
        let state = self
            .api
            .enter(Method::GET, self.item_path(id), vec![], None)
            .await?;
        let row = state
            .find(self.config.tag, id)
            .cloned()
            .ok_or_else(|| self.not_found(id))?;
        Ok(serde_json::from_value(row)?)
    }

    async fn get_paginated(&self, query: &PageQuery) -> Result<Page<R>> {
        let pairs = query
            .to_query_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut state = self
            .api
            .enter(Method::GET, format!("{}/", self.config.tag), pairs, None)
            .await?;

        let mut rows: Vec<Value> = state.rows(self.config.tag).clone();
        if let Some(term) = query.search_term().map(str::to_lowercase) {
            rows.retain(|row| {
                ["name", "description"].iter().any(|field| {
                    row.get(*field)
                        .map(|v| display_value(v).to_lowercase().contains(&term))
                        .unwrap_or(false)
                })
            });
        }
        if let Some(sort) = &query.sort {
            rows.sort_by(|a, b| compare_values(a.get(&sort.field), b.get(&sort.field)));
            if sort.direction == SortDirection::Desc {
                rows.reverse();
            }
        }

        let size = query.page_size.max(1) as usize;
        let page_count = rows.len().div_ceil(size) as u64;
        let rows = rows
            .into_iter()
            .skip(query.page_index as usize * size)
            .take(size)
            .collect();
        Ok(Page {
            rows: decode_rows(rows)?,
            page_count,
        })
    }

    async fn get_one_preview(&self, id: &str) -> Result<ResourceSummary> {
        let state = self
            .api
            .enter(Method::GET, format!("{}/summary", self.item_path(id)), vec![], None)
            .await?;
        let row = state
            .find(self.config.tag, id)
            .ok_or_else(|| self.not_found(id))?;
        Ok(ResourceSummary {
            id: id.to_string(),
            name: row.get("name").map(display_value).unwrap_or_default(),
            description: row.get("description").map(display_value).unwrap_or_default(),
            extra: Fields::new(),
        })
    }

    async fn update(&self, id: &str, fields: &Fields) -> Result<R> {
        let body = Value::Object(fields.clone());
        let mut state = self
            .api
            .enter(Method::PATCH, self.item_path(id), vec![], Some(body))
            .await?;
        let row = state
            .rows(self.config.tag)
            .iter_mut()
            .find(|row| row_id(row) == Some(id))
            .ok_or_else(|| self.not_found(id))?;
        if let Value::Object(map) = &mut *row {
            for (field, value) in fields {
                map.insert(field.clone(), value.clone());
            }
            map.insert("updated_at".to_string(), json!(Utc::now()));
        }
        Ok(serde_json::from_value(row.clone())?)
    }

    async fn create(&self, data: &R::Create) -> Result<R> {
        let body = serde_json::to_value(data)?;
        let mut state = self
            .api
            .enter(
                Method::POST,
                format!("{}/", self.config.tag),
                vec![],
                Some(body),
            )
            .await?;
        let row = self.new_row(&mut state, data)?;
        state.rows(self.config.tag).push(row.clone());
        Ok(serde_json::from_value(row)?)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self
            .api
            .enter(Method::DELETE, self.item_path(id), vec![], None)
            .await?;
        let ordered = self.config.ordered;
        let rows = state.rows(self.config.tag);
        let index = rows
            .iter()
            .position(|row| row_id(row) == Some(id))
            .ok_or_else(|| self.not_found(id))?;
        let removed = rows.remove(index);

        if ordered {
            if let Some(parent_field) = self.config.parent_field {
                let parent = removed.get(parent_field).cloned();
                let mut siblings: Vec<&mut Value> = rows
                    .iter_mut()
                    .filter(|row| row.get(parent_field) == parent.as_ref())
                    .collect();
                renumber(&mut siblings);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<R: DependentResource> DependentOperations<R> for FakeResource<R> {
    async fn get_list(&self, parent_id: &str) -> Result<Vec<R>> {
        let mut state = self
            .api
            .enter(Method::GET, self.children_path(parent_id), vec![], None)
            .await?;
        let mut rows: Vec<Value> = state
            .rows(self.config.tag)
            .iter()
            .filter(|row| Self::is_child_of(row, parent_id))
            .cloned()
            .collect();
        if self.config.ordered {
            rows.sort_by_key(position_of);
        }
        decode_rows(rows)
    }

    async fn create_in(&self, parent_id: &str, data: &R::Create) -> Result<R> {
        let body = serde_json::to_value(data)?;
        let mut state = self
            .api
            .enter(Method::POST, self.children_path(parent_id), vec![], Some(body))
            .await?;
        let mut row = self.new_row(&mut state, data)?;
        let next = state
            .rows(self.config.tag)
            .iter()
            .filter(|row| Self::is_child_of(row, parent_id))
            .map(position_of)
            .max()
            .unwrap_or(0)
            + 1;
        if let Value::Object(map) = &mut row {
            map.insert(R::PARENT_FIELD.to_string(), json!(parent_id));
            if self.config.ordered {
                map.insert("order_position".to_string(), json!(next));
            }
            if R::KIND == studyboard_api::ResourceKind::ApiKey {
                map.insert("key_id".to_string(), json!(uuid::Uuid::new_v4().simple().to_string()));
                map.insert("secret".to_string(), json!(uuid::Uuid::new_v4().to_string()));
            }
        }
        state.rows(self.config.tag).push(row.clone());
        Ok(serde_json::from_value(row)?)
    }

    async fn reorder(&self, parent_id: &str, positions: &[OrderPosition]) -> Result<()> {
        let body = serde_json::to_value(positions)?;
        let path = format!("{}/reorder", self.children_path(parent_id));
        let mut state = self
            .api
            .enter(Method::PATCH, path, vec![], Some(body))
            .await?;

        let by_id: HashMap<&str, i64> = positions
            .iter()
            .map(|p| (p.id.as_str(), p.order_position))
            .collect();
        let rows = state.rows(self.config.tag);
        let mut siblings: Vec<&mut Value> = rows
            .iter_mut()
            .filter(|row| Self::is_child_of(row, parent_id))
            .collect();
        if let Some(stranger) = by_id
            .keys()
            .find(|id| !siblings.iter().any(|row| row_id(row) == Some(**id)))
        {
            return Err(ClientError::Validation {
                field: "order_position".to_string(),
                message: format!("{} is not a child of {}", stranger, parent_id),
            });
        }
        for row in siblings.iter_mut() {
            let position = row_id(&**row).and_then(|id| by_id.get(id)).copied();
            if let Some(position) = position {
                row["order_position"] = json!(position);
            }
        }
        renumber(&mut siblings);
        Ok(())
    }

    async fn validate_field(
        &self,
        parent_id: &str,
        field: &str,
        value: &str,
        exclude_id: Option<&str>,
    ) -> Result<FieldValidation> {
        let mut query = vec![(field.to_string(), value.to_string())];
        if let Some(id) = exclude_id {
            query.push(("exclude_id".to_string(), id.to_string()));
        }
        let path = format!("{}/validate", self.children_path(parent_id));
        let mut state = self.api.enter(Method::GET, path, query, None).await?;

        let taken = state.rows(self.config.tag).iter().any(|row| {
            Self::is_child_of(row, parent_id)
                && row_id(row) != exclude_id
                && row.get(field).map(display_value).as_deref() == Some(value)
        });
        if taken {
            Ok(FieldValidation::rejected(format!(
                "A {} with this {} already exists",
                self.config.label.to_lowercase(),
                field
            )))
        } else {
            Ok(FieldValidation::ok())
        }
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn position_of(row: &Value) -> i64 {
    row.get("order_position")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Sorts siblings by position and rewrites positions to 1..n
fn renumber(siblings: &mut [&mut Value]) {
    siblings.sort_by_key(|row| position_of(&**row));
    for (index, row) in siblings.iter_mut().enumerate() {
        row["order_position"] = json!(index as i64 + 1);
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => {
            let x = a.map(display_value).unwrap_or_default();
            let y = b.map(display_value).unwrap_or_default();
            x.to_lowercase().cmp(&y.to_lowercase())
        }
    }
}

fn decode_rows<R: Resource>(rows: Vec<Value>) -> Result<Vec<R>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(ClientError::from))
        .collect()
}
