//! Client-side core of the studyboard console
//!
//! - `resources` - static configuration of every resource kind
//! - `traits` - operation traits implemented by HTTP clients and fakes
//! - `cache` - keyed query cache with optimistic transactions
//! - `retry` - backoff policy for failed reads
//! - `queries` - cached reads and optimistic mutations per resource kind
//! - `reorder` - drag-and-drop ordering with dense positions
//! - `views` - table, detail panel and form view models

pub mod cache;
pub mod queries;
pub mod reorder;
pub mod resources;
pub mod retry;
pub mod traits;
pub mod views;

pub use cache::{
    fetcher, CacheEvent, CacheOptions, Fetcher, OptimisticTransaction, QueryCache, QueryState,
    Refetches,
};
pub use queries::{DependentQueries, Notice, Notices, ResourceQueries};
pub use reorder::{DragState, ReorderError, ReorderList};
pub use resources::{resource_config, ResourceConfig, ALL_RESOURCES};
pub use retry::RetryPolicy;
pub use traits::{Creator, DependentOperations, ResourceOperations};
pub use views::{DetailPanel, FormMode, FormState, TableState, TableView};
