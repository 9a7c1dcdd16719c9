//! Command-line arguments and environment variables

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use crate::config::Environment;
use studyboard_api::ResourceKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "studyboard")]
#[command(about = "Admin console for research studies")]
pub struct Args {
    /// YAML config file (defaults to ./studyboard.yaml when present)
    #[arg(long, env = "STUDYBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// API deployment to use; development in debug builds, production otherwise
    #[arg(long, value_enum, env = "STUDYBOARD_ENV")]
    pub env: Option<Environment>,

    /// Bearer token sent with every request
    #[arg(long, env = "STUDYBOARD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Work against an in-memory API seeded with demo data
    #[arg(long)]
    pub offline: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "STUDYBOARD_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn environment(&self) -> Environment {
        self.env.unwrap_or_default()
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List every resource kind with its API tag and parent
    Kinds,

    /// One page of a resource table
    List {
        kind: ResourceKind,
        /// 0-based page index
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
        /// Column to sort by
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, requires = "sort")]
        desc: bool,
        #[arg(long)]
        search: Option<String>,
    },

    /// Metadata panel of one resource
    Get { kind: ResourceKind, id: String },

    /// Lightweight preview of one resource
    Summary { kind: ResourceKind, id: String },

    /// Every child of a parent, in order
    Children { kind: ResourceKind, parent: String },

    /// Create a resource from `--field name=value` pairs
    Create {
        kind: ResourceKind,
        /// Parent id, required for dependent kinds
        #[arg(long)]
        parent: Option<String>,
        #[arg(long = "field", short = 'f', value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },

    /// Change fields of a resource
    Update {
        kind: ResourceKind,
        id: String,
        /// Parent id; also refreshes the parent's child list
        #[arg(long)]
        parent: Option<String>,
        #[arg(long = "field", short = 'f', value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },

    Delete {
        kind: ResourceKind,
        id: String,
        #[arg(long)]
        parent: Option<String>,
    },

    /// Move a child to a 1-based position among its siblings
    Reorder {
        kind: ResourceKind,
        parent: String,
        id: String,
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        position: u32,
    },

    /// Ask the server whether a field value is acceptable under a parent
    Validate {
        kind: ResourceKind,
        parent: String,
        field: String,
        value: String,
        /// Id of the resource being edited
        #[arg(long)]
        exclude: Option<String>,
    },
}

/// `name=value`; the value is read as JSON when it parses, else as a string
pub fn parse_field(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing field name in '{}'", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}
