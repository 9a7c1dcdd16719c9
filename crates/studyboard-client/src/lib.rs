//! HTTP and in-memory implementations of the studyboard operation traits
//!
//! [`ApiClient`] is built once per session from the API base URL and a token
//! source; `api.resource::<Study>()` or `api.dependent::<Step>()` returns the
//! client for a kind. [`FakeStudyApi`] implements the same traits in memory.

pub mod client;
pub mod fake;
pub mod http;

pub use client::{DependentResourceClient, ResourceClient};
pub use fake::{FakeResource, FakeStudyApi, RecordedRequest};
pub use http::{ApiClient, ApiClientBuilder, StaticToken, TokenProvider};
pub use reqwest::Method;
