//! Paginated search contract.
//!
//! Every listing screen fetches its authoritative rows through the same
//! search endpoint: a page request carrying column definitions, answered by
//! an [`ApiResponse`] wrapping a page of results plus the total row count.

use serde::{Deserialize, Serialize};

/// Sort direction for a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A single column selection/filter in a search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Field name on the server-side record.
    pub field: String,

    /// Optional exact-match filter value for this column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ColumnDef {
    /// A plain column selection with no filter.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            field: name.into(),
            filter: None,
        }
    }
}

/// Request body for the paginated search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Sort direction applied to the server's default sort column.
    pub order: SortOrder,

    /// Columns to select, with optional per-column filters.
    pub column_defs: Vec<ColumnDef>,

    /// Zero-based page index.
    pub page_index: u32,

    /// Page size.
    pub page_size: u32,
}

impl SearchRequest {
    /// First page with the given size, newest first, all columns.
    pub fn first_page(page_size: u32) -> Self {
        Self {
            order: SortOrder::Desc,
            column_defs: Vec::new(),
            page_index: 0,
            page_size,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults<T> {
    /// The rows on this page.
    pub results: Vec<T>,

    /// Total number of rows matching the query, across all pages.
    pub total: u64,
}

/// Uniform response envelope returned by every REST endpoint.
///
/// `success: false` carries a human-readable `message` and usually no
/// `data`; clients surface the message to the user unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded on the server.
    pub success: bool,

    /// The payload, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Human-readable status or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_wire_shape() {
        let req = SearchRequest {
            order: SortOrder::Desc,
            column_defs: vec![ColumnDef::field("tagId")],
            page_index: 2,
            page_size: 25,
        };
        let json = serde_json::to_value(&req).expect("serializable");
        assert_eq!(json["order"], "desc");
        assert_eq!(json["pageIndex"], 2);
        assert_eq!(json["pageSize"], 25);
        assert_eq!(json["columnDefs"][0]["field"], "tagId");
    }

    #[test]
    fn test_failure_envelope() {
        let json = r#"{"success":false,"message":"duplicate"}"#;
        let resp: ApiResponse<SearchResults<serde_json::Value>> =
            serde_json::from_str(json).expect("valid envelope");
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("duplicate"));
        assert!(resp.data.is_none());
    }
}
