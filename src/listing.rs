//! Cached list proxy
//!
//! Pagination is lenient: anything that is not a positive integer is dropped
//! and the provider's default applies. Only `filter`/`filters` keys (bare or
//! bracketed) survive filter extraction; everything else the caller sends is
//! discarded before forwarding.

use std::sync::Arc;

use axum::http::HeaderValue;
use serde_json::Value;
use tracing::debug;

use crate::config::{ListingConfig, ResourceConfig};
use crate::upstream::Provider;
use crate::{Error, Result};

/// Parse a page/pageSize value. Non-numeric, zero and negative → `None`.
#[must_use]
pub fn positive_int(raw: Option<&str>) -> Option<u32> {
    raw?.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

/// Whether a query key is a filter key that may be forwarded
#[must_use]
pub fn is_filter_key(key: &str) -> bool {
    key == "filter" || key == "filters" || key.starts_with("filter[") || key.starts_with("filters[")
}

/// Keep only filter keys, verbatim and in their original order
#[must_use]
pub fn extract_filters(query: &[(String, String)]) -> Vec<(String, String)> {
    query
        .iter()
        .filter(|(key, _)| is_filter_key(key))
        .cloned()
        .collect()
}

/// `Cache-Control` value for list responses
#[must_use]
pub fn cache_control(s_maxage: u64, stale_while_revalidate: u64) -> String {
    format!("s-maxage={s_maxage}, stale-while-revalidate={stale_while_revalidate}")
}

/// A validated list request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// 1-based page
    pub page: Option<u32>,
    /// Items per page
    pub page_size: Option<u32>,
    /// Filter keys to forward
    pub filters: Vec<(String, String)>,
}

impl ListRequest {
    /// Build from the raw query pairs of an inbound request
    #[must_use]
    pub fn from_query(query: &[(String, String)], accept_filters: bool) -> Self {
        let lookup = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        Self {
            page: positive_int(lookup("page")),
            page_size: positive_int(lookup("pageSize")),
            filters: if accept_filters {
                extract_filters(query)
            } else {
                Vec::new()
            },
        }
    }
}

/// Forwards list requests for configured resources
pub struct ListProxy {
    provider: Arc<dyn Provider>,
    config: ListingConfig,
    cache_control: HeaderValue,
}

impl ListProxy {
    /// Create a list proxy
    pub fn new(provider: Arc<dyn Provider>, config: ListingConfig) -> Result<Self> {
        let cache_control = HeaderValue::from_str(&cache_control(
            config.s_maxage,
            config.stale_while_revalidate,
        ))
        .map_err(|e| Error::Config(format!("invalid cache-control value: {e}")))?;

        Ok(Self {
            provider,
            config,
            cache_control,
        })
    }

    /// `Cache-Control` header to attach to list responses
    #[must_use]
    pub fn cache_control_header(&self) -> HeaderValue {
        self.cache_control.clone()
    }

    /// Resource settings, if the resource is exposed
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.config.resources.get(name)
    }

    /// Query sent upstream for a validated request
    #[must_use]
    pub fn upstream_query(&self, resource: &ResourceConfig, request: &ListRequest) -> Vec<(String, String)> {
        let mut query = Vec::new();

        for (i, field) in resource.fields.iter().enumerate() {
            query.push((format!("fields[{i}]"), field.clone()));
        }
        for (i, relation) in resource.populate.iter().enumerate() {
            query.push((format!("populate[{i}]"), relation.clone()));
        }
        if let Some(ref sort) = resource.sort {
            query.push(("sort".to_string(), sort.clone()));
        }
        if let Some(page) = request.page {
            query.push(("pagination[page]".to_string(), page.to_string()));
        }
        if let Some(size) = request.page_size {
            let size = size.min(self.config.max_page_size.max(1));
            query.push(("pagination[pageSize]".to_string(), size.to_string()));
        }
        query.extend(request.filters.iter().cloned());

        query
    }

    /// Fetch one page of `resource` from the provider.
    ///
    /// Unknown resources are an internal routing error: routes only exist
    /// for configured resources.
    pub async fn fetch_list(&self, resource: &str, raw_query: &[(String, String)]) -> Result<Value> {
        let settings = self
            .resource(resource)
            .ok_or_else(|| Error::Internal(format!("list resource not configured: {resource}")))?;

        let request = ListRequest::from_query(raw_query, settings.accept_filters);
        let query = self.upstream_query(settings, &request);
        debug!(resource, params = query.len(), "Forwarding list request");

        self.provider.list(resource, &query).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::session::testing::FakeProvider;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_positive_int() {
        assert_eq!(positive_int(Some("3")), Some(3));
        assert_eq!(positive_int(Some("0")), None);
        assert_eq!(positive_int(Some("-5")), None);
        assert_eq!(positive_int(Some("abc")), None);
        assert_eq!(positive_int(Some("2.5")), None);
        assert_eq!(positive_int(Some("")), None);
        assert_eq!(positive_int(None), None);
    }

    #[test]
    fn test_invalid_page_same_as_absent() {
        let absent = ListRequest::from_query(&[], false);
        for bad in ["0", "-5", "abc"] {
            assert_eq!(ListRequest::from_query(&pairs(&[("page", bad)]), false), absent);
        }
    }

    #[test]
    fn test_filter_keys() {
        assert!(is_filter_key("filter"));
        assert!(is_filter_key("filters"));
        assert!(is_filter_key("filter[category][slug]"));
        assert!(is_filter_key("filters[price][$lt]"));
        assert!(!is_filter_key("sort"));
        assert!(!is_filter_key("populate"));
        assert!(!is_filter_key("filterx"));
        assert!(!is_filter_key("Filter"));
        assert!(!is_filter_key("pagination[page]"));
    }

    #[test]
    fn test_extract_filters_verbatim() {
        let query = pairs(&[
            ("sort", "price:asc"),
            ("filter[category][slug]", "shoes"),
            ("populate", "*"),
            ("filters", "raw"),
            ("evil", "1"),
            ("filter", "x"),
        ]);
        assert_eq!(
            extract_filters(&query),
            pairs(&[("filter[category][slug]", "shoes"), ("filters", "raw"), ("filter", "x")])
        );
    }

    #[test]
    fn test_cache_control() {
        assert_eq!(cache_control(900, 3600), "s-maxage=900, stale-while-revalidate=3600");
    }

    #[tokio::test]
    async fn test_fetch_products_forwards_filters_only() {
        let provider = Arc::new(FakeProvider::default());
        let proxy = ListProxy::new(provider, ListingConfig::default()).unwrap();

        let body = proxy
            .fetch_list(
                "products",
                &pairs(&[
                    ("page", "2"),
                    ("pageSize", "500"),
                    ("sort", "evil"),
                    ("filter[category][slug]", "shoes"),
                ]),
            )
            .await
            .unwrap();

        let forwarded: Vec<(String, String)> = serde_json::from_value(body["query"].clone()).unwrap();
        assert!(forwarded.contains(&("pagination[page]".to_string(), "2".to_string())));
        assert!(forwarded.contains(&("pagination[pageSize]".to_string(), "100".to_string())));
        assert!(forwarded.contains(&("filter[category][slug]".to_string(), "shoes".to_string())));
        assert!(!forwarded.iter().any(|(k, v)| k == "sort" && v == "evil"));
    }

    #[tokio::test]
    async fn test_fetch_articles_ignores_filters() {
        let provider = Arc::new(FakeProvider::default());
        let proxy = ListProxy::new(provider, ListingConfig::default()).unwrap();

        let body = proxy
            .fetch_list("articles", &pairs(&[("page", "0"), ("filter[x]", "y")]))
            .await
            .unwrap();

        let forwarded: Vec<(String, String)> = serde_json::from_value(body["query"].clone()).unwrap();
        assert!(!forwarded.iter().any(|(k, _)| k.starts_with("pagination")));
        assert!(!forwarded.iter().any(|(k, _)| k.starts_with("filter")));
        assert!(forwarded.contains(&("sort".to_string(), "publishedAt:desc".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let proxy = ListProxy::new(Arc::new(FakeProvider::default()), ListingConfig::default()).unwrap();
        assert!(proxy.fetch_list("users", &[]).await.is_err());
    }
}
