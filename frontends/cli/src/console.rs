//! Runs console commands through the cached query layer
//!
//! Commands name a [`ResourceKind`] at runtime; the dispatch macros map it to
//! the entity type so every handler stays generic over the resource.

use anyhow::{bail, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::args::Command;
use studyboard_api::{
    ApiKey, ConstructItem, DependentResource, Ordered, PageContent, Resource, ResourceKind, Scale,
    ScaleLevel, Sort, SortDirection, Step, Study, StudyCondition, SurveyConstruct, SurveyPage,
};
use studyboard_client::{ApiClient, FakeStudyApi};
use studyboard_core::resources::display_value;
use studyboard_core::{
    resource_config, DependentOperations, DependentQueries, DetailPanel, FormState, Notice,
    Notices, QueryCache, ResourceOperations, ResourceQueries, TableState, TableView,
    ALL_RESOURCES,
};

/// Runs `$method::<Entity>(args)` for any kind
macro_rules! dispatch_any {
    ($kind:expr, $this:expr, $method:ident, ($($arg:expr),*)) => {
        match $kind {
            ResourceKind::Study => $this.$method::<Study>($($arg),*).await,
            ResourceKind::Step => $this.$method::<Step>($($arg),*).await,
            ResourceKind::Page => $this.$method::<SurveyPage>($($arg),*).await,
            ResourceKind::Condition => $this.$method::<StudyCondition>($($arg),*).await,
            ResourceKind::Content => $this.$method::<PageContent>($($arg),*).await,
            ResourceKind::ApiKey => $this.$method::<ApiKey>($($arg),*).await,
            ResourceKind::Construct => $this.$method::<SurveyConstruct>($($arg),*).await,
            ResourceKind::Scale => $this.$method::<Scale>($($arg),*).await,
            ResourceKind::Item => $this.$method::<ConstructItem>($($arg),*).await,
            ResourceKind::Level => $this.$method::<ScaleLevel>($($arg),*).await,
        }
    };
}

/// Like `dispatch_any!` for kinds that live under a parent
macro_rules! dispatch_dependent {
    ($kind:expr, $this:expr, $method:ident, ($($arg:expr),*)) => {
        match $kind {
            ResourceKind::Step => $this.$method::<Step>($($arg),*).await,
            ResourceKind::Page => $this.$method::<SurveyPage>($($arg),*).await,
            ResourceKind::Condition => $this.$method::<StudyCondition>($($arg),*).await,
            ResourceKind::Content => $this.$method::<PageContent>($($arg),*).await,
            ResourceKind::ApiKey => $this.$method::<ApiKey>($($arg),*).await,
            ResourceKind::Item => $this.$method::<ConstructItem>($($arg),*).await,
            ResourceKind::Level => $this.$method::<ScaleLevel>($($arg),*).await,
            other => bail!("{} resources have no parent", other),
        }
    };
}

/// Like `dispatch_any!` for kinds kept in a sortable sibling list
macro_rules! dispatch_ordered {
    ($kind:expr, $this:expr, $method:ident, ($($arg:expr),*)) => {
        match $kind {
            ResourceKind::Step => $this.$method::<Step>($($arg),*).await,
            ResourceKind::Page => $this.$method::<SurveyPage>($($arg),*).await,
            ResourceKind::Content => $this.$method::<PageContent>($($arg),*).await,
            ResourceKind::Item => $this.$method::<ConstructItem>($($arg),*).await,
            ResourceKind::Level => $this.$method::<ScaleLevel>($($arg),*).await,
            other => bail!("{} resources have no manual order", other),
        }
    };
}

/// Where operations are sent
#[derive(Clone)]
pub enum Backend {
    Http(ApiClient),
    Offline(FakeStudyApi),
}

impl Backend {
    fn resource<R: Resource>(&self) -> Arc<dyn ResourceOperations<R>> {
        match self {
            Backend::Http(api) => api.resource::<R>(),
            Backend::Offline(fake) => fake.resource::<R>(),
        }
    }

    fn dependent<R: DependentResource>(&self) -> Arc<dyn DependentOperations<R>> {
        match self {
            Backend::Http(api) => api.dependent::<R>(),
            Backend::Offline(fake) => fake.resource::<R>(),
        }
    }
}

pub struct Console {
    backend: Backend,
    cache: QueryCache,
    notices: Notices,
    received: broadcast::Receiver<Notice>,
}

impl Console {
    pub fn new(backend: Backend) -> Self {
        let notices = Notices::default();
        let received = notices.subscribe();
        Self {
            backend,
            cache: QueryCache::default(),
            notices,
            received,
        }
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Notices emitted since the last call
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut drained = Vec::new();
        loop {
            match self.received.try_recv() {
                Ok(notice) => drained.push(notice),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!("[Console] skipped {} notices", skipped);
                }
                Err(_) => break,
            }
        }
        drained
    }

    /// Runs one command and returns its text output
    pub async fn run(&self, command: &Command) -> Result<String> {
        debug!("[Console] running {:?}", command);
        match command {
            Command::Kinds => Ok(kinds_table()),
            Command::List {
                kind,
                page,
                page_size,
                sort,
                desc,
                search,
            } => {
                let mut table = TableState::default();
                table.set_page_size(*page_size);
                table.page_index = *page;
                table.sort = sort.as_ref().map(|field| Sort {
                    field: field.clone(),
                    direction: if *desc {
                        SortDirection::Desc
                    } else {
                        SortDirection::Asc
                    },
                });
                if let Some(term) = search {
                    table.search = term.clone();
                }
                dispatch_any!(*kind, self, list, (&table))
            }
            Command::Get { kind, id } => dispatch_any!(*kind, self, get, (id)),
            Command::Summary { kind, id } => dispatch_any!(*kind, self, summary, (id)),
            Command::Children { kind, parent } => {
                dispatch_dependent!(*kind, self, children, (parent))
            }
            Command::Create {
                kind,
                parent,
                fields,
            } => match (resource_config(*kind).parent, parent) {
                (Some(_), Some(parent)) => {
                    dispatch_dependent!(*kind, self, create_child, (parent, fields))
                }
                (Some(parent_kind), None) => {
                    bail!("Creating a {} needs --parent <{} id>", kind, parent_kind)
                }
                (None, Some(_)) => bail!("{} resources have no parent", kind),
                (None, None) => dispatch_any!(*kind, self, create, (fields)),
            },
            Command::Update {
                kind,
                id,
                parent,
                fields,
            } => match parent {
                Some(parent) => {
                    dispatch_dependent!(*kind, self, update_child, (parent, id, fields))
                }
                None => dispatch_any!(*kind, self, update, (id, fields)),
            },
            Command::Delete { kind, id, parent } => match parent {
                Some(parent) => dispatch_dependent!(*kind, self, delete_child, (parent, id)),
                None => dispatch_any!(*kind, self, delete, (id)),
            },
            Command::Reorder {
                kind,
                parent,
                id,
                position,
            } => dispatch_ordered!(*kind, self, reorder, (parent, id, *position)),
            Command::Validate {
                kind,
                parent,
                field,
                value,
                exclude,
            } => dispatch_dependent!(
                *kind,
                self,
                validate,
                (parent, field, value, exclude.as_deref())
            ),
        }
    }

    fn queries<R: Resource>(&self) -> ResourceQueries<R> {
        ResourceQueries::new(
            self.backend.resource::<R>(),
            self.cache.clone(),
            self.notices.clone(),
        )
    }

    fn dependent_queries<R: DependentResource>(&self) -> DependentQueries<R> {
        DependentQueries::new(
            self.backend.dependent::<R>(),
            self.cache.clone(),
            self.notices.clone(),
        )
    }

    async fn list<R: Resource>(&self, table: &TableState) -> Result<String> {
        let config = resource_config(R::KIND);
        let page = self.queries::<R>().page(&table.to_query()).await?;
        let view = with_ids(TableView::build(config, &page)?);
        let footer = format!(
            "{}: page {} of {}",
            config.plural_label,
            table.page_index + 1,
            page.page_count.max(1)
        );
        if view.is_empty() {
            return Ok(format!("No {} found\n{}", config.plural_label.to_lowercase(), footer));
        }
        Ok(format!("{}\n{}", view.render_text(), footer))
    }

    async fn get<R: Resource>(&self, id: &str) -> Result<String> {
        let resource = self.queries::<R>().detail(id).await?;
        Ok(DetailPanel::build(resource_config(R::KIND), &resource)?.render_text())
    }

    async fn summary<R: Resource>(&self, id: &str) -> Result<String> {
        let summary = self.queries::<R>().summary(id).await?;
        let mut lines = vec![format!("{} ({})", summary.name, summary.id)];
        if !summary.description.is_empty() {
            lines.push(summary.description.clone());
        }
        for (field, value) in &summary.extra {
            lines.push(format!("  {}: {}", field, display_value(value)));
        }
        Ok(lines.join("\n"))
    }

    async fn children<R: DependentResource>(&self, parent: &str) -> Result<String> {
        let config = resource_config(R::KIND);
        let rows = self.dependent_queries::<R>().children(parent).await?;
        if rows.is_empty() {
            return Ok(format!("No {} under {}", config.plural_label.to_lowercase(), parent));
        }
        Ok(with_ids(TableView::from_rows(config, rows)?).render_text())
    }

    async fn create<R: Resource>(&self, fields: &[(String, Value)]) -> Result<String> {
        let form = filled_create_form(resource_config(R::KIND), fields)?;
        let created = self.queries::<R>().create(&form.to_create::<R>()?).await?;
        Ok(format!("Created {} {}", resource_config(R::KIND).label, created.id()))
    }

    async fn create_child<R: DependentResource>(
        &self,
        parent: &str,
        fields: &[(String, Value)],
    ) -> Result<String> {
        let config = resource_config(R::KIND);
        let queries = self.dependent_queries::<R>();
        let mut form = filled_create_form(config, fields)?;
        let ops = self.backend.dependent::<R>();
        if !form.validate_remote(ops.as_ref(), parent).await? {
            bail!(form_errors(&form));
        }
        let created = queries.create_in(parent, &form.to_create::<R>()?).await?;
        info!("[Console] created {} {} under {}", config.tag, created.id(), parent);
        Ok(format!(
            "Created {} {} under {}",
            config.label,
            created.id(),
            parent
        ))
    }

    async fn update<R: Resource>(&self, id: &str, fields: &[(String, Value)]) -> Result<String> {
        let queries = self.queries::<R>();
        let current = queries.detail(id).await?;
        let form = filled_edit_form(&current, fields)?;
        let changed = form.changed_fields();
        if changed.is_empty() {
            return Ok("Nothing to change".to_string());
        }
        queries.update(id, changed).await?;
        Ok(format!("Updated {} {}", resource_config(R::KIND).label, id))
    }

    async fn update_child<R: DependentResource>(
        &self,
        parent: &str,
        id: &str,
        fields: &[(String, Value)],
    ) -> Result<String> {
        let queries = self.dependent_queries::<R>();
        let current = queries.detail(id).await?;
        let mut form = filled_edit_form(&current, fields)?;
        let changed = form.changed_fields();
        if changed.is_empty() {
            return Ok("Nothing to change".to_string());
        }
        let ops = self.backend.dependent::<R>();
        for field in changed.keys() {
            form.validate_field(ops.as_ref(), parent, field).await?;
        }
        if !form.is_valid() {
            bail!(form_errors(&form));
        }
        queries.update(parent, id, changed).await?;
        Ok(format!("Updated {} {}", resource_config(R::KIND).label, id))
    }

    async fn delete<R: Resource>(&self, id: &str) -> Result<String> {
        self.queries::<R>().delete(id).await?;
        Ok(format!("Deleted {} {}", resource_config(R::KIND).label, id))
    }

    async fn delete_child<R: DependentResource>(&self, parent: &str, id: &str) -> Result<String> {
        self.dependent_queries::<R>().delete(parent, id).await?;
        Ok(format!("Deleted {} {}", resource_config(R::KIND).label, id))
    }

    async fn reorder<R: DependentResource + Ordered>(
        &self,
        parent: &str,
        id: &str,
        position: u32,
    ) -> Result<String> {
        let queries = self.dependent_queries::<R>();
        let mut list = queries.reorder_list(parent).await?;
        let to_index = position.saturating_sub(1) as usize;
        match list.move_item(id, to_index)? {
            None => Ok(format!("{} is already at position {}", id, position)),
            Some(positions) => {
                queries.save_order(parent, &mut list, &positions).await?;
                Ok(positions
                    .iter()
                    .map(|p| format!("{}. {}", p.order_position, p.id))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
    }

    async fn validate<R: DependentResource>(
        &self,
        parent: &str,
        field: &str,
        value: &str,
        exclude: Option<&str>,
    ) -> Result<String> {
        let result = self
            .dependent_queries::<R>()
            .validate_field(parent, field, value, exclude)
            .await?;
        Ok(match (result.valid, result.message) {
            (true, _) => format!("{} is valid", field),
            (false, Some(message)) => format!("{} rejected: {}", field, message),
            (false, None) => format!("{} rejected", field),
        })
    }
}

fn filled_create_form(
    config: &'static studyboard_core::ResourceConfig,
    fields: &[(String, Value)],
) -> Result<FormState> {
    let mut form = FormState::create(config);
    for (name, value) in fields {
        form.set(name, value.clone())?;
    }
    if !form.check_required() {
        bail!(form_errors(&form));
    }
    Ok(form)
}

fn filled_edit_form<R: Resource>(current: &R, fields: &[(String, Value)]) -> Result<FormState> {
    let mut form = FormState::edit(resource_config(R::KIND), current)?;
    for (name, value) in fields {
        form.set(name, value.clone())?;
    }
    if !form.check_required() {
        bail!(form_errors(&form));
    }
    Ok(form)
}

fn form_errors(form: &FormState) -> String {
    form.errors()
        .map(|(field, message)| format!("{}: {}", field, message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Prepends an ID column
fn with_ids(mut view: TableView) -> TableView {
    view.headers.insert(0, "ID");
    view.sortable.insert(0, false);
    for (row, id) in view.cells.iter_mut().zip(&view.ids) {
        row.insert(0, id.clone());
    }
    view
}

fn kinds_table() -> String {
    let rows = ALL_RESOURCES
        .iter()
        .map(|config| {
            vec![
                config.kind.to_string(),
                config.tag.to_string(),
                config.label.to_string(),
                config
                    .parent
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                if config.ordered { "yes" } else { "" }.to_string(),
            ]
        })
        .collect();
    TableView {
        headers: vec!["Kind", "Tag", "Label", "Parent", "Ordered"],
        sortable: vec![false; 5],
        ids: ALL_RESOURCES.iter().map(|c| c.tag.to_string()).collect(),
        cells: rows,
        page_count: 1,
    }
    .render_text()
}
