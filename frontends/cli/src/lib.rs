//! `studyboard` command-line console

pub mod args;
pub mod config;
pub mod console;
pub mod demo;

pub use args::{Args, Command};
pub use config::{ConsoleConfig, Environment};
pub use console::{Backend, Console};

use anyhow::Result;
use studyboard_client::ApiClient;

/// Picks the backend for `args`: the demo fake when offline, else the API
/// of the selected environment
pub async fn connect(args: &Args, config: &ConsoleConfig) -> Result<Backend> {
    if args.offline {
        tracing::info!("[Console] offline mode, using demo data");
        return Ok(Backend::Offline(demo::seeded_api().await?));
    }

    let env = args.environment();
    let base_url = config.base_url(env)?;
    let token = match args.token.as_deref() {
        Some(token) if !token.trim().is_empty() => token,
        _ => anyhow::bail!("No access token. {}", config.login_hint()),
    };

    let mut builder = ApiClient::builder(base_url).token(token);
    if let Some(timeout) = config.request_timeout() {
        builder = builder.timeout(timeout);
    }
    let api = builder.build()?;
    tracing::info!("[Console] using {:?} API at {}", env, api.base_url());
    Ok(Backend::Http(api))
}
