use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The ten entity types managed by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Study,
    Step,
    Page,
    Condition,
    Content,
    ApiKey,
    Construct,
    Scale,
    Item,
    Level,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Study,
        ResourceKind::Step,
        ResourceKind::Page,
        ResourceKind::Condition,
        ResourceKind::Content,
        ResourceKind::ApiKey,
        ResourceKind::Construct,
        ResourceKind::Scale,
        ResourceKind::Item,
        ResourceKind::Level,
    ];

    /// Short lowercase name, as accepted on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Study => "study",
            ResourceKind::Step => "step",
            ResourceKind::Page => "page",
            ResourceKind::Condition => "condition",
            ResourceKind::Content => "content",
            ResourceKind::ApiKey => "apikey",
            ResourceKind::Construct => "construct",
            ResourceKind::Scale => "scale",
            ResourceKind::Item => "item",
            ResourceKind::Level => "level",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown resource kind: {0}")]
pub struct UnknownKindError(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or(UnknownKindError(s.to_string()))
    }
}
