//! Domain entities
//!
//! Every entity flattens a [`ResourceBase`]; entities kept in a manually
//! sortable sibling list also flatten an [`Ordering`]. The resource kind is
//! carried at the type level through [`Resource::KIND`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ResourceKind;

/// Partial field set sent with PATCH requests
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Shape shared by every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBase {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceBase {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Position of an entity among its siblings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    pub order_position: i64,
    /// Forward link to the next sibling, when the server tracks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl Ordering {
    pub fn at(order_position: i64) -> Self {
        Self {
            order_position,
            next: None,
        }
    }
}

/// One entry of a batch reorder request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPosition {
    pub id: String,
    pub order_position: i64,
}

impl OrderPosition {
    pub fn new(id: impl Into<String>, order_position: i64) -> Self {
        Self {
            id: id.into(),
            order_position,
        }
    }
}

/// Lightweight projection returned by `/{tag}/{id}/summary`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Fields,
}

/// Server answer to a field uniqueness/validity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FieldValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

/// An entity addressed by the API under its kind's tag
pub trait Resource:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    const KIND: ResourceKind;

    /// Creation payload: the entity minus id, timestamps, and discriminant
    type Create: Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static;

    fn base(&self) -> &ResourceBase;

    fn id(&self) -> &str {
        &self.base().id
    }
}

/// A resource that only exists under a parent of kind [`DependentResource::PARENT`]
pub trait DependentResource: Resource {
    const PARENT: ResourceKind;
    /// JSON field holding the parent id
    const PARENT_FIELD: &'static str;

    fn parent_id(&self) -> &str;
}

/// A resource kept in a manually sortable sibling list
pub trait Ordered: Resource {
    fn ordering(&self) -> &Ordering;
    fn ordering_mut(&mut self) -> &mut Ordering;

    fn order_position(&self) -> i64 {
        self.ordering().order_position
    }

    fn set_order_position(&mut self, position: i64) {
        self.ordering_mut().order_position = position;
    }
}

/// Creation payload for entities that only need a name and a description
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewNamed {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NewNamed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    #[serde(flatten)]
    pub base: ResourceBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub base: ResourceBase,
    #[serde(flatten)]
    pub ordering: Ordering,
    pub study_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyPage {
    #[serde(flatten)]
    pub base: ResourceBase,
    #[serde(flatten)]
    pub ordering: Ordering,
    pub step_id: String,
    #[serde(default)]
    pub study_id: String,
}

/// Experiment condition of a study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyCondition {
    #[serde(flatten)]
    pub base: ResourceBase,
    pub study_id: String,
    #[serde(default)]
    pub recommender_key: Option<String>,
    /// Key handed to participants in the study link
    #[serde(default)]
    pub participant_key: String,
    #[serde(default)]
    pub recommendation_count: i64,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewStudyCondition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommender_key: Option<String>,
    #[serde(default)]
    pub participant_key: String,
    #[serde(default)]
    pub recommendation_count: i64,
    #[serde(default)]
    pub enabled: bool,
}

/// Links a page to one survey construct rendered with one scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    #[serde(flatten)]
    pub base: ResourceBase,
    #[serde(flatten)]
    pub ordering: Ordering,
    pub page_id: String,
    pub construct_id: String,
    pub scale_id: String,
    #[serde(default)]
    pub preamble: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewPageContent {
    pub construct_id: String,
    pub scale_id: String,
    #[serde(default)]
    pub preamble: Option<String>,
}

/// Credential record; only the description can change after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    #[serde(flatten)]
    pub base: ResourceBase,
    pub study_id: String,
    #[serde(default)]
    pub key_id: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewApiKey {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyConstruct {
    #[serde(flatten)]
    pub base: ResourceBase,
}

/// A single survey question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructItem {
    #[serde(flatten)]
    pub base: ResourceBase,
    #[serde(flatten)]
    pub ordering: Ordering,
    pub construct_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewConstructItem {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    #[serde(flatten)]
    pub base: ResourceBase,
}

/// One point on a measurement scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleLevel {
    #[serde(flatten)]
    pub base: ResourceBase,
    #[serde(flatten)]
    pub ordering: Ordering,
    pub scale_id: String,
    pub label: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewScaleLevel {
    pub label: String,
    pub value: i64,
}

macro_rules! impl_resource {
    ($ty:ty, $kind:expr, $create:ty) => {
        impl Resource for $ty {
            const KIND: ResourceKind = $kind;
            type Create = $create;

            fn base(&self) -> &ResourceBase {
                &self.base
            }
        }
    };
}

macro_rules! impl_dependent {
    ($ty:ty, $parent:expr, $field:ident) => {
        impl DependentResource for $ty {
            const PARENT: ResourceKind = $parent;
            const PARENT_FIELD: &'static str = stringify!($field);

            fn parent_id(&self) -> &str {
                &self.$field
            }
        }
    };
}

macro_rules! impl_ordered {
    ($ty:ty) => {
        impl Ordered for $ty {
            fn ordering(&self) -> &Ordering {
                &self.ordering
            }

            fn ordering_mut(&mut self) -> &mut Ordering {
                &mut self.ordering
            }
        }
    };
}

impl_resource!(Study, ResourceKind::Study, NewNamed);
impl_resource!(Step, ResourceKind::Step, NewNamed);
impl_resource!(SurveyPage, ResourceKind::Page, NewNamed);
impl_resource!(StudyCondition, ResourceKind::Condition, NewStudyCondition);
impl_resource!(PageContent, ResourceKind::Content, NewPageContent);
impl_resource!(ApiKey, ResourceKind::ApiKey, NewApiKey);
impl_resource!(SurveyConstruct, ResourceKind::Construct, NewNamed);
impl_resource!(ConstructItem, ResourceKind::Item, NewConstructItem);
impl_resource!(Scale, ResourceKind::Scale, NewNamed);
impl_resource!(ScaleLevel, ResourceKind::Level, NewScaleLevel);

impl_dependent!(Step, ResourceKind::Study, study_id);
impl_dependent!(SurveyPage, ResourceKind::Step, step_id);
impl_dependent!(StudyCondition, ResourceKind::Study, study_id);
impl_dependent!(PageContent, ResourceKind::Page, page_id);
impl_dependent!(ApiKey, ResourceKind::Study, study_id);
impl_dependent!(ConstructItem, ResourceKind::Construct, construct_id);
impl_dependent!(ScaleLevel, ResourceKind::Scale, scale_id);

impl_ordered!(Step);
impl_ordered!(SurveyPage);
impl_ordered!(PageContent);
impl_ordered!(ConstructItem);
impl_ordered!(ScaleLevel);

impl Step {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        study_id: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            base: ResourceBase::new(id, name),
            ordering: Ordering::at(position),
            study_id: study_id.into(),
        }
    }
}

impl ScaleLevel {
    pub fn new(
        id: impl Into<String>,
        scale_id: impl Into<String>,
        label: impl Into<String>,
        value: i64,
        position: i64,
    ) -> Self {
        let label = label.into();
        Self {
            base: ResourceBase::new(id, label.clone()),
            ordering: Ordering::at(position),
            scale_id: scale_id.into(),
            label,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_deserializes_flattened_shape() {
        let step: Step = serde_json::from_value(json!({
            "id": "st1",
            "name": "Intro",
            "description": "",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "order_position": 1,
            "study_id": "S1"
        }))
        .unwrap();

        assert_eq!(step.id(), "st1");
        assert_eq!(step.parent_id(), "S1");
        assert_eq!(step.order_position(), 1);
        assert_eq!(step.ordering.next, None);
    }

    #[test]
    fn test_type_level_discriminants() {
        assert_eq!(Step::KIND, ResourceKind::Step);
        assert_eq!(<Step as DependentResource>::PARENT, ResourceKind::Study);
        assert_eq!(<ScaleLevel as DependentResource>::PARENT, ResourceKind::Scale);
        assert_eq!(<SurveyPage as DependentResource>::PARENT_FIELD, "step_id");
        assert_eq!(ApiKey::KIND, ResourceKind::ApiKey);
    }

    #[test]
    fn test_summary_keeps_unknown_fields() {
        let summary: ResourceSummary = serde_json::from_value(json!({
            "id": "s1",
            "name": "Pilot",
            "step_count": 3
        }))
        .unwrap();
        assert_eq!(summary.description, "");
        assert_eq!(summary.extra.get("step_count"), Some(&json!(3)));
    }
}
