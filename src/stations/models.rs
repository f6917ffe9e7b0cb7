use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 50;

/// Normalized station shape returned to clients. Rows from both source
/// tables are projected into these seven fields; nothing marks which table a
/// row came from, and ids are only unique within their table of origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(rename = "logoUrl")]
    pub logo_url: Option<String>,
    #[serde(rename = "streamUrl")]
    pub stream_url: String,
    pub language: Option<String>,
    pub genre: Option<String>,
    pub page: Option<String>,
}

/// Listing query parameters. Blank filter values count as unset.
#[derive(Debug, Clone, Deserialize)]
pub struct StationFilter {
    pub language: Option<String>,
    pub genre: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl Default for StationFilter {
    fn default() -> Self {
        Self {
            language: None,
            genre: None,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl StationFilter {
    pub fn language(&self) -> Option<&str> {
        present(self.language.as_deref())
    }

    pub fn genre(&self) -> Option<&str> {
        present(self.genre.as_deref())
    }

    /// The one query shape that is ever cached: first page, default page
    /// size, no filters.
    pub fn is_cacheable(&self) -> bool {
        self.page == DEFAULT_PAGE
            && self.limit == DEFAULT_LIMIT
            && self.language().is_none()
            && self.genre().is_none()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn default_page() -> i64 {
    DEFAULT_PAGE
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}
