//! Fetch strategies partition the listing query space
//!
//! Each strategy owns an independent pagination cursor per place, so an
//! ascending and a descending walk can progress concurrently.

use std::fmt;

use serde::Deserialize;

/// Listing sort direction, sent upstream as `sortOrder=Asc|Desc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_query(&self) -> &'static str {
        match self {
            SortOrder::Asc => "Asc",
            SortOrder::Desc => "Desc",
        }
    }
}

/// A listing query shape: sort direction plus whether servers at capacity
/// are rejected outright by the record filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct FetchStrategy {
    pub sort_order: SortOrder,
    #[serde(default = "default_exclude_full")]
    pub exclude_full: bool,
}

fn default_exclude_full() -> bool {
    true
}

impl FetchStrategy {
    pub fn new(sort_order: SortOrder, exclude_full: bool) -> Self {
        Self {
            sort_order,
            exclude_full,
        }
    }

    /// Stable key identifying this strategy within a pool entry.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl Default for FetchStrategy {
    fn default() -> Self {
        Self::new(SortOrder::Asc, true)
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.sort_order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        if self.exclude_full {
            write!(f, "{order}+exclude_full")
        } else {
            write!(f, "{order}")
        }
    }
}
