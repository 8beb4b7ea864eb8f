//! # Content List Model
//!
//! A content list is a named pipeline that yields publishable work items. It is either
//! an extension pipeline (generator, optional item filter, expander) or a legacy list
//! whose items come from an externally executed query resource addressed by `url`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ParameterMap;

/// Hint consumed by generators; the engine itself does not enforce it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentListType {
    Normal,
    /// Generators restrict candidates to items touched since the last successful run
    Incremental,
}

impl ContentListType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for ContentListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentListType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "incremental" => Ok(Self::Incremental),
            _ => Err(format!("Invalid content list type: {s}")),
        }
    }
}

impl Default for ContentListType {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentList {
    pub content_list_id: i64,
    /// Unique across all content lists
    pub name: String,
    pub description: Option<String>,
    pub list_type: ContentListType,
    pub generator: Option<String>,
    pub generator_params: ParameterMap,
    pub expander: Option<String>,
    pub expander_params: ParameterMap,
    /// Name of the item filter extension, if any
    pub filter: Option<String>,
    /// Query resource executed for legacy lists
    pub url: Option<String>,
}

impl ContentList {
    /// Legacy lists have no generator and run their `url` query instead
    pub fn is_legacy(&self) -> bool {
        self.generator.is_none()
    }
}

/// New content list for creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewContentList {
    pub name: String,
    pub description: Option<String>,
    pub list_type: ContentListType,
    pub generator: Option<String>,
    pub generator_params: ParameterMap,
    pub expander: Option<String>,
    pub expander_params: ParameterMap,
    pub filter: Option<String>,
    pub url: Option<String>,
}

impl NewContentList {
    /// Extension pipeline list with empty parameter maps
    pub fn pipeline(
        name: impl Into<String>,
        generator: impl Into<String>,
        expander: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            generator: Some(generator.into()),
            expander: Some(expander.into()),
            ..Default::default()
        }
    }

    /// Legacy list backed by an external query resource
    pub fn legacy(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn into_content_list(self, content_list_id: i64) -> ContentList {
        ContentList {
            content_list_id,
            name: self.name,
            description: self.description,
            list_type: self.list_type,
            generator: self.generator,
            generator_params: self.generator_params,
            expander: self.expander,
            expander_params: self.expander_params,
            filter: self.filter,
            url: self.url,
        }
    }
}
