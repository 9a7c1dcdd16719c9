//! Paginated list requests and responses

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Parameters of `GET /{tag}/` list requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageQuery {
    pub page_index: u32,
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page_index: 0,
            page_size: 10,
            sort: None,
            search: None,
        }
    }
}

impl PageQuery {
    pub fn new(page_index: u32, page_size: u32) -> Self {
        Self {
            page_index,
            page_size,
            ..Default::default()
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn searching(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Query-string pairs in wire order. Sorting and search are left out
    /// entirely when unset or blank.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page_index", self.page_index.to_string()),
            ("page_size", self.page_size.to_string()),
        ];
        if let Some(sort) = &self.sort {
            pairs.push(("sort_by", sort.field.clone()));
            pairs.push(("sort_dir", sort.direction.as_str().to_string()));
        }
        if let Some(search) = self.search_term() {
            pairs.push(("search", search.to_string()));
        }
        pairs
    }

    /// The search term actually sent; blank input means no search
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Canonical page of rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub page_count: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            page_count: 0,
        }
    }
}

/// The two list envelopes returned by different endpoint families.
///
/// `{data, count}` reports a row total, which is converted to a page count
/// using the requested page size.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PageEnvelope<T> {
    Rows { rows: Vec<T>, page_count: u64 },
    Data { data: Vec<T>, count: u64 },
}

impl<T> PageEnvelope<T> {
    pub fn into_page(self, page_size: u32) -> Page<T> {
        match self {
            PageEnvelope::Rows { rows, page_count } => Page { rows, page_count },
            PageEnvelope::Data { data, count } => {
                let size = u64::from(page_size.max(1));
                Page {
                    rows: data,
                    page_count: count.div_ceil(size),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_pairs_without_sort() {
        let query = PageQuery::new(0, 10).searching("foo");
        let pairs = query.to_query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("page_index", "0".to_string()),
                ("page_size", "10".to_string()),
                ("search", "foo".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_pairs_with_sort() {
        let query = PageQuery::new(2, 25).sorted_by("name", SortDirection::Desc);
        let keys: Vec<_> = query.to_query_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["page_index", "page_size", "sort_by", "sort_dir"]);
    }

    #[test]
    fn test_blank_search_is_dropped() {
        let query = PageQuery::new(0, 10).searching("   ");
        assert_eq!(query.to_query_pairs().len(), 2);
        assert_eq!(query.search_term(), None);
    }

    #[test]
    fn test_both_envelopes_adapt_to_canonical_page() {
        let rows: PageEnvelope<i64> =
            serde_json::from_value(json!({"rows": [1, 2], "page_count": 4})).unwrap();
        assert_eq!(rows.into_page(2), Page { rows: vec![1, 2], page_count: 4 });

        let data: PageEnvelope<i64> =
            serde_json::from_value(json!({"data": [1, 2, 3], "count": 21})).unwrap();
        assert_eq!(data.into_page(10), Page { rows: vec![1, 2, 3], page_count: 3 });
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn counted_envelope_covers_every_row(count in 0u64..10_000, page_size in 0u32..200) {
                let page = PageEnvelope::<i64>::Data { data: vec![], count }.into_page(page_size);
                let size = u64::from(page_size.max(1));
                prop_assert!(page.page_count * size >= count);
                prop_assert!(page.page_count == 0 || (page.page_count - 1) * size < count);
            }
        }
    }
}
