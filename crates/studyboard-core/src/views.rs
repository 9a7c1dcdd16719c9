//! View models driven by the resource configuration table
//!
//! Nothing here draws anything. A frontend (the CLI, or a richer UI) reads
//! the rendered strings and feeds user input back in.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::resources::{display_value, FieldSpec, ResourceConfig};
use crate::traits::DependentOperations;
use studyboard_api::{
    ClientError, Fields, Page, PageQuery, Resource, Result, Sort, SortDirection,
};

/// Paging, sorting and search state of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    pub page_index: u32,
    pub page_size: u32,
    pub sort: Option<Sort>,
    pub search: String,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            page_index: 0,
            page_size: 10,
            sort: None,
            search: String::new(),
        }
    }
}

impl TableState {
    pub fn to_query(&self) -> PageQuery {
        PageQuery {
            page_index: self.page_index,
            page_size: self.page_size,
            sort: self.sort.clone(),
            search: Some(self.search.clone()).filter(|s| !s.trim().is_empty()),
        }
    }

    /// New search term; jumps back to the first page
    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
        self.page_index = 0;
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.page_size = page_size.max(1);
        self.page_index = 0;
    }

    /// Ascending on a new column, flips direction on the current one
    pub fn toggle_sort(&mut self, field: &str) {
        self.sort = Some(match self.sort.take() {
            Some(sort) if sort.field == field => Sort {
                field: sort.field,
                direction: sort.direction.toggled(),
            },
            _ => Sort {
                field: field.to_string(),
                direction: SortDirection::Asc,
            },
        });
        self.page_index = 0;
    }

    pub fn next_page(&mut self, page_count: u64) -> bool {
        if u64::from(self.page_index) + 1 < page_count {
            self.page_index += 1;
            true
        } else {
            false
        }
    }

    pub fn previous_page(&mut self) -> bool {
        if self.page_index > 0 {
            self.page_index -= 1;
            true
        } else {
            false
        }
    }
}

/// Rendered page of a resource table
#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub headers: Vec<&'static str>,
    pub sortable: Vec<bool>,
    pub ids: Vec<String>,
    pub cells: Vec<Vec<String>>,
    pub page_count: u64,
}

impl TableView {
    pub fn build<R: Resource>(config: &ResourceConfig, page: &Page<R>) -> Result<Self> {
        let mut ids = Vec::with_capacity(page.rows.len());
        let mut cells = Vec::with_capacity(page.rows.len());
        for row in &page.rows {
            let value = serde_json::to_value(row)?;
            ids.push(row.id().to_string());
            cells.push(
                config
                    .columns
                    .iter()
                    .map(|column| render_cell(config, column.field, &value))
                    .collect(),
            );
        }
        Ok(Self {
            headers: config.columns.iter().map(|c| c.header).collect(),
            sortable: config.columns.iter().map(|c| c.sortable).collect(),
            ids,
            cells,
            page_count: page.page_count,
        })
    }

    /// Table over an unpaginated child list
    pub fn from_rows<R: Resource>(config: &ResourceConfig, rows: Vec<R>) -> Result<Self> {
        let page = Page {
            rows,
            page_count: 1,
        };
        Self::build(config, &page)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Plain-text rendering with padded columns
    pub fn render_text(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |cells: Vec<&str>| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = vec![line(self.headers.to_vec())];
        for row in &self.cells {
            out.push(line(row.iter().map(String::as_str).collect()));
        }
        out.join("\n")
    }
}

fn render_cell(config: &ResourceConfig, field: &str, row: &Value) -> String {
    let value = row.get(field);
    match config.field(field) {
        Some(spec) => spec.render(value),
        None => value.map(display_value).unwrap_or_default(),
    }
}

/// Label/value pairs of a resource's metadata panel
#[derive(Debug, Clone, PartialEq)]
pub struct DetailPanel {
    pub title: String,
    pub rows: Vec<(&'static str, String)>,
}

impl DetailPanel {
    pub fn build<R: Resource>(config: &ResourceConfig, resource: &R) -> Result<Self> {
        let value = serde_json::to_value(resource)?;
        let rows = config
            .detail_fields
            .iter()
            .map(|field| (field.label, field.render(value.get(field.name))))
            .collect();
        let name = &resource.base().name;
        let title = if name.is_empty() {
            format!("{} {}", config.label, resource.id())
        } else {
            format!("{}: {}", config.label, name)
        };
        Ok(Self { title, rows })
    }

    pub fn render_text(&self) -> String {
        let width = self
            .rows
            .iter()
            .map(|(label, _)| label.chars().count())
            .max()
            .unwrap_or(0);
        let mut out = vec![self.title.clone()];
        for (label, value) in &self.rows {
            out.push(format!("  {:<width$}  {}", label, value, width = width));
        }
        out.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit { id: String },
}

/// Values and field errors of a create or edit form
#[derive(Debug, Clone)]
pub struct FormState {
    config: &'static ResourceConfig,
    mode: FormMode,
    original: Fields,
    values: Fields,
    errors: BTreeMap<&'static str, String>,
}

impl FormState {
    pub fn create(config: &'static ResourceConfig) -> Self {
        Self {
            config,
            mode: FormMode::Create,
            original: Fields::new(),
            values: Fields::new(),
            errors: BTreeMap::new(),
        }
    }

    /// Form over the editable detail fields of an existing resource
    pub fn edit<R: Resource>(config: &'static ResourceConfig, resource: &R) -> Result<Self> {
        let value = serde_json::to_value(resource)?;
        let original: Fields = config
            .detail_fields
            .iter()
            .filter(|f| f.field_type.is_editable())
            .filter_map(|f| value.get(f.name).map(|v| (f.name.to_string(), v.clone())))
            .collect();
        Ok(Self {
            config,
            mode: FormMode::Edit {
                id: resource.id().to_string(),
            },
            values: original.clone(),
            original,
            errors: BTreeMap::new(),
        })
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn fields(&self) -> Vec<&'static FieldSpec> {
        let fields = match self.mode {
            FormMode::Create => self.config.create_fields,
            FormMode::Edit { .. } => self.config.detail_fields,
        };
        fields.iter().filter(|f| f.field_type.is_editable()).collect()
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn values(&self) -> &Fields {
        &self.values
    }

    /// Sets a value; any previous error on that field is cleared
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let spec = self
            .fields()
            .into_iter()
            .find(|f| f.name == field)
            .ok_or_else(|| ClientError::Validation {
                field: field.to_string(),
                message: format!("{} has no editable field {}", self.config.label, field),
            })?;
        self.errors.remove(spec.name);
        self.values.insert(field.to_string(), value.into());
        Ok(())
    }

    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.errors.iter().map(|(field, msg)| (*field, msg.as_str()))
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Flags required fields that are missing or blank
    pub fn check_required(&mut self) -> bool {
        for spec in self.fields() {
            let blank = match self.values.get(spec.name) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            };
            if spec.required && blank {
                self.errors
                    .insert(spec.name, format!("{} is required", spec.label));
            }
        }
        self.is_valid()
    }

    /// Runs the remote validator for one field.
    ///
    /// A rejection is recorded on that field only. Fields without a
    /// registered validator, and blank values, pass without a request.
    pub async fn validate_field<R: Resource>(
        &mut self,
        ops: &dyn DependentOperations<R>,
        parent_id: &str,
        field: &str,
    ) -> Result<bool> {
        if !self.config.has_validator(field) {
            return Ok(true);
        }
        let value = match self.values.get(field).map(display_value) {
            Some(v) if !v.trim().is_empty() => v,
            _ => return Ok(true),
        };
        let exclude_id = match &self.mode {
            FormMode::Edit { id } => Some(id.as_str()),
            FormMode::Create => None,
        };

        let result = ops
            .validate_field(parent_id, field, &value, exclude_id)
            .await?;
        let name = self
            .config
            .validators
            .iter()
            .copied()
            .find(|v| *v == field)
            .unwrap_or_default();
        if result.valid {
            self.errors.remove(name);
        } else {
            debug!("[FormState] {} rejected by server validator", field);
            let message = result
                .message
                .unwrap_or_else(|| format!("Invalid {}", field));
            self.errors.insert(name, message);
        }
        Ok(result.valid)
    }

    /// Runs every remote validator of the resource kind
    pub async fn validate_remote<R: Resource>(
        &mut self,
        ops: &dyn DependentOperations<R>,
        parent_id: &str,
    ) -> Result<bool> {
        let mut valid = true;
        for field in self.config.validators {
            valid &= self.validate_field(ops, parent_id, field).await?;
        }
        Ok(valid)
    }

    /// Fields whose value differs from the loaded resource
    pub fn changed_fields(&self) -> Fields {
        self.values
            .iter()
            .filter(|(field, value)| self.original.get(field.as_str()) != Some(*value))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    /// Decodes the values as the creation payload of `R`
    pub fn to_create<R: Resource>(&self) -> Result<R::Create>
    where
        R::Create: DeserializeOwned,
    {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|e| {
            ClientError::Validation {
                field: self.config.tag.to_string(),
                message: e.to_string(),
            }
        })
    }
}
