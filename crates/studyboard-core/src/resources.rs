//! Resource configuration table
//!
//! One static entry per [`ResourceKind`]: the API tag, labels, parent
//! relationship, the fields shown in detail panels and creation forms,
//! table columns, and the fields checked by remote validators. Views,
//! clients, and the CLI read everything they need from here.

use serde_json::Value;
use studyboard_api::{QueryKeys, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOption {
    pub value: &'static str,
    pub label: &'static str,
}

/// How a field is displayed and edited
#[derive(Clone, Copy)]
pub enum FieldType {
    Text,
    TextArea,
    /// Shown but never editable
    Static,
    Select(&'static [SelectOption]),
    /// Options come from the list endpoint of another resource kind
    RemoteSelect { kind: ResourceKind },
    Number,
    Custom(fn(&Value) -> String),
}

impl FieldType {
    pub fn is_editable(&self) -> bool {
        !matches!(self, FieldType::Static | FieldType::Custom(_))
    }
}

impl std::fmt::Debug for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Text => write!(f, "Text"),
            FieldType::TextArea => write!(f, "TextArea"),
            FieldType::Static => write!(f, "Static"),
            FieldType::Select(options) => write!(f, "Select({} options)", options.len()),
            FieldType::RemoteSelect { kind } => write!(f, "RemoteSelect({})", kind),
            FieldType::Number => write!(f, "Number"),
            FieldType::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    const fn new(name: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            label,
            field_type,
            required: false,
        }
    }

    const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    /// Renders a raw JSON value the way this field displays it
    pub fn render(&self, value: Option<&Value>) -> String {
        let value = match value {
            Some(v) => v,
            None => return String::new(),
        };
        match self.field_type {
            FieldType::Custom(render) => render(value),
            FieldType::Select(options) => {
                let raw = display_value(value);
                options
                    .iter()
                    .find(|o| o.value == raw)
                    .map(|o| o.label.to_string())
                    .unwrap_or(raw)
            }
            _ => display_value(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: &'static str,
    pub header: &'static str,
    pub sortable: bool,
}

impl ColumnSpec {
    const fn new(field: &'static str, header: &'static str) -> Self {
        Self {
            field,
            header,
            sortable: true,
        }
    }

    const fn unsorted(self) -> Self {
        Self {
            sortable: false,
            ..self
        }
    }
}

#[derive(Debug)]
pub struct ResourceConfig {
    pub kind: ResourceKind,
    /// Path segment used to build URLs
    pub tag: &'static str,
    pub label: &'static str,
    pub plural_label: &'static str,
    pub parent: Option<ResourceKind>,
    /// JSON field holding the parent id
    pub parent_field: Option<&'static str>,
    pub ordered: bool,
    pub detail_fields: &'static [FieldSpec],
    pub create_fields: &'static [FieldSpec],
    pub columns: &'static [ColumnSpec],
    /// Fields checked through the parent-scoped `validate` endpoint
    pub validators: &'static [&'static str],
}

impl ResourceConfig {
    pub fn query_keys(&self) -> QueryKeys {
        QueryKeys::new(self.tag)
    }

    pub fn parent_config(&self) -> Option<&'static ResourceConfig> {
        self.parent.map(resource_config)
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.detail_fields
            .iter()
            .chain(self.create_fields.iter())
            .find(|f| f.name == name)
    }

    pub fn has_validator(&self, field: &str) -> bool {
        self.validators.contains(&field)
    }
}

/// Plain text form of a JSON value; strings lose their quotes
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => (if *b { "yes" } else { "no" }).to_string(),
        other => other.to_string(),
    }
}

fn render_enabled(value: &Value) -> String {
    match value.as_bool() {
        Some(true) => "Enabled".to_string(),
        _ => "Disabled".to_string(),
    }
}

fn render_secret(value: &Value) -> String {
    match value.as_str() {
        Some(s) if s.chars().count() > 4 => format!("{}…", s.chars().take(4).collect::<String>()),
        Some(_) => "****".to_string(),
        None => String::new(),
    }
}

const NAME: FieldSpec = FieldSpec::new("name", "Name", FieldType::Text).required();
const DESCRIPTION: FieldSpec = FieldSpec::new("description", "Description", FieldType::TextArea);
const CREATED: FieldSpec = FieldSpec::new("created_at", "Created", FieldType::Static);
const UPDATED: FieldSpec = FieldSpec::new("updated_at", "Updated", FieldType::Static);
const POSITION: FieldSpec = FieldSpec::new("order_position", "Position", FieldType::Static);

const NAME_COLUMN: ColumnSpec = ColumnSpec::new("name", "Name");
const DESCRIPTION_COLUMN: ColumnSpec = ColumnSpec::new("description", "Description").unsorted();
const CREATED_COLUMN: ColumnSpec = ColumnSpec::new("created_at", "Created");

const NAMED_CREATE: &[FieldSpec] = &[NAME, DESCRIPTION];
const NAMED_DETAIL: &[FieldSpec] = &[NAME, DESCRIPTION, CREATED, UPDATED];
const NAMED_COLUMNS: &[ColumnSpec] = &[NAME_COLUMN, DESCRIPTION_COLUMN, CREATED_COLUMN];

const ORDERED_DETAIL: &[FieldSpec] = &[NAME, DESCRIPTION, POSITION, CREATED, UPDATED];
const ORDERED_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("order_position", "#"),
    NAME_COLUMN,
    DESCRIPTION_COLUMN,
];

const RECOMMENDERS: &[SelectOption] = &[
    SelectOption {
        value: "baseline",
        label: "Baseline (popular items)",
    },
    SelectOption {
        value: "topn",
        label: "Top-N",
    },
    SelectOption {
        value: "diverse",
        label: "Diversified",
    },
];

const CONDITION_FIELDS: &[FieldSpec] = &[
    NAME,
    DESCRIPTION,
    FieldSpec::new("recommender_key", "Recommender", FieldType::Select(RECOMMENDERS)),
    FieldSpec::new("participant_key", "Participant link key", FieldType::Text).required(),
    FieldSpec::new("recommendation_count", "Recommendations", FieldType::Number),
    FieldSpec::new("enabled", "Status", FieldType::Custom(render_enabled)),
];

const CONTENT_CREATE: &[FieldSpec] = &[
    FieldSpec::new(
        "construct_id",
        "Construct",
        FieldType::RemoteSelect {
            kind: ResourceKind::Construct,
        },
    )
    .required(),
    FieldSpec::new(
        "scale_id",
        "Scale",
        FieldType::RemoteSelect {
            kind: ResourceKind::Scale,
        },
    )
    .required(),
    FieldSpec::new("preamble", "Preamble", FieldType::TextArea),
];

const CONTENT_DETAIL: &[FieldSpec] = &[
    FieldSpec::new(
        "construct_id",
        "Construct",
        FieldType::RemoteSelect {
            kind: ResourceKind::Construct,
        },
    ),
    FieldSpec::new(
        "scale_id",
        "Scale",
        FieldType::RemoteSelect {
            kind: ResourceKind::Scale,
        },
    ),
    FieldSpec::new("preamble", "Preamble", FieldType::TextArea),
    POSITION,
];

const APIKEY_DETAIL: &[FieldSpec] = &[
    FieldSpec::new("key_id", "Key id", FieldType::Static),
    FieldSpec::new("secret", "Secret", FieldType::Custom(render_secret)),
    DESCRIPTION,
    CREATED,
];

const ITEM_CREATE: &[FieldSpec] =
    &[FieldSpec::new("text", "Question text", FieldType::TextArea).required()];

const ITEM_DETAIL: &[FieldSpec] = &[
    FieldSpec::new("text", "Question text", FieldType::TextArea).required(),
    POSITION,
];

const LEVEL_CREATE: &[FieldSpec] = &[
    FieldSpec::new("label", "Label", FieldType::Text).required(),
    FieldSpec::new("value", "Value", FieldType::Number).required(),
];

const LEVEL_DETAIL: &[FieldSpec] = &[
    FieldSpec::new("label", "Label", FieldType::Text).required(),
    FieldSpec::new("value", "Value", FieldType::Number).required(),
    POSITION,
];

pub static ALL_RESOURCES: [ResourceConfig; 10] = [
    ResourceConfig {
        kind: ResourceKind::Study,
        tag: "studies",
        label: "Study",
        plural_label: "Studies",
        parent: None,
        parent_field: None,
        ordered: false,
        detail_fields: NAMED_DETAIL,
        create_fields: NAMED_CREATE,
        columns: NAMED_COLUMNS,
        validators: &[],
    },
    ResourceConfig {
        kind: ResourceKind::Step,
        tag: "steps",
        label: "Step",
        plural_label: "Steps",
        parent: Some(ResourceKind::Study),
        parent_field: Some("study_id"),
        ordered: true,
        detail_fields: ORDERED_DETAIL,
        create_fields: NAMED_CREATE,
        columns: ORDERED_COLUMNS,
        validators: &["name"],
    },
    ResourceConfig {
        kind: ResourceKind::Page,
        tag: "pages",
        label: "Page",
        plural_label: "Pages",
        parent: Some(ResourceKind::Step),
        parent_field: Some("step_id"),
        ordered: true,
        detail_fields: ORDERED_DETAIL,
        create_fields: NAMED_CREATE,
        columns: ORDERED_COLUMNS,
        validators: &["name"],
    },
    ResourceConfig {
        kind: ResourceKind::Condition,
        tag: "conditions",
        label: "Condition",
        plural_label: "Conditions",
        parent: Some(ResourceKind::Study),
        parent_field: Some("study_id"),
        ordered: false,
        detail_fields: CONDITION_FIELDS,
        create_fields: CONDITION_FIELDS,
        columns: &[
            NAME_COLUMN,
            ColumnSpec::new("recommender_key", "Recommender"),
            ColumnSpec::new("recommendation_count", "Recommendations"),
            ColumnSpec::new("enabled", "Enabled").unsorted(),
        ],
        validators: &["name", "participant_key"],
    },
    ResourceConfig {
        kind: ResourceKind::Content,
        tag: "contents",
        label: "Page content",
        plural_label: "Page contents",
        parent: Some(ResourceKind::Page),
        parent_field: Some("page_id"),
        ordered: true,
        detail_fields: CONTENT_DETAIL,
        create_fields: CONTENT_CREATE,
        columns: &[
            ColumnSpec::new("order_position", "#"),
            ColumnSpec::new("construct_id", "Construct"),
            ColumnSpec::new("scale_id", "Scale"),
        ],
        validators: &[],
    },
    ResourceConfig {
        kind: ResourceKind::ApiKey,
        tag: "apikeys",
        label: "API key",
        plural_label: "API keys",
        parent: Some(ResourceKind::Study),
        parent_field: Some("study_id"),
        ordered: false,
        detail_fields: APIKEY_DETAIL,
        create_fields: &[DESCRIPTION],
        columns: &[
            ColumnSpec::new("key_id", "Key id").unsorted(),
            DESCRIPTION_COLUMN,
            CREATED_COLUMN,
        ],
        validators: &[],
    },
    ResourceConfig {
        kind: ResourceKind::Construct,
        tag: "constructs",
        label: "Survey construct",
        plural_label: "Survey constructs",
        parent: None,
        parent_field: None,
        ordered: false,
        detail_fields: NAMED_DETAIL,
        create_fields: NAMED_CREATE,
        columns: NAMED_COLUMNS,
        validators: &[],
    },
    ResourceConfig {
        kind: ResourceKind::Scale,
        tag: "scales",
        label: "Scale",
        plural_label: "Scales",
        parent: None,
        parent_field: None,
        ordered: false,
        detail_fields: NAMED_DETAIL,
        create_fields: NAMED_CREATE,
        columns: NAMED_COLUMNS,
        validators: &[],
    },
    ResourceConfig {
        kind: ResourceKind::Item,
        tag: "items",
        label: "Construct item",
        plural_label: "Construct items",
        parent: Some(ResourceKind::Construct),
        parent_field: Some("construct_id"),
        ordered: true,
        detail_fields: ITEM_DETAIL,
        create_fields: ITEM_CREATE,
        columns: &[
            ColumnSpec::new("order_position", "#"),
            ColumnSpec::new("text", "Question").unsorted(),
        ],
        validators: &[],
    },
    ResourceConfig {
        kind: ResourceKind::Level,
        tag: "levels",
        label: "Scale level",
        plural_label: "Scale levels",
        parent: Some(ResourceKind::Scale),
        parent_field: Some("scale_id"),
        ordered: true,
        detail_fields: LEVEL_DETAIL,
        create_fields: LEVEL_CREATE,
        columns: &[
            ColumnSpec::new("order_position", "#"),
            ColumnSpec::new("label", "Label"),
            ColumnSpec::new("value", "Value"),
        ],
        validators: &["label", "value"],
    },
];

pub fn resource_config(kind: ResourceKind) -> &'static ResourceConfig {
    ALL_RESOURCES
        .iter()
        .find(|c| c.kind == kind)
        .unwrap_or_else(|| unreachable!("every ResourceKind has a config entry"))
}

pub fn config_by_tag(tag: &str) -> Option<&'static ResourceConfig> {
    ALL_RESOURCES.iter().find(|c| c.tag == tag)
}
