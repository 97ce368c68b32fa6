//! Path and query utilities for proxied Kubernetes API calls.

use pkg_constants::gateway::{GATEWAY_QUERY_KEYS, NAMESPACE_PARAM, PAGE_NUM_PARAM, PAGE_SIZE_PARAM};
use pkg_types::page::{PageQuery, PageWindow};
use pkg_types::validate::validate_name;

use crate::error::GatewayError;

/// Namespace subresources, which would otherwise read as a resource name
/// under `namespaces/<ns>/`.
const NAMESPACE_SUBRESOURCES: &[&str] = &["status", "finalize"];

/// A Kubernetes resource path, e.g.
/// `/apis/apps/v1/namespaces/web/deployments/api/scale`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    /// `/api/v1` or `/apis/<group>/<version>`
    pub prefix: String,
    pub namespace: Option<String>,
    /// Plural resource name
    pub resource: String,
    pub name: Option<String>,
    pub subresource: Option<String>,
}

impl ResourcePath {
    /// Parse `path`. Returns `None` for anything that is not a resource
    /// path (discovery documents, `/version`, malformed paths).
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (prefix, rest) = match segments.as_slice() {
            ["api", version, rest @ ..] => (format!("/api/{}", version), rest),
            ["apis", group, version, rest @ ..] => (format!("/apis/{}/{}", group, version), rest),
            _ => return None,
        };

        let owned = |s: Option<&&str>| s.map(|s| s.to_string());
        let parsed = match rest {
            [] => return None,
            ["namespaces", ns, sub] if NAMESPACE_SUBRESOURCES.contains(sub) => Self {
                prefix,
                namespace: None,
                resource: "namespaces".into(),
                name: Some(ns.to_string()),
                subresource: Some(sub.to_string()),
            },
            ["namespaces", ns, resource, tail @ ..] if tail.len() <= 2 => Self {
                prefix,
                namespace: Some(ns.to_string()),
                resource: resource.to_string(),
                name: owned(tail.first()),
                subresource: owned(tail.get(1)),
            },
            [resource, tail @ ..] if tail.len() <= 2 => Self {
                prefix,
                namespace: None,
                resource: resource.to_string(),
                name: owned(tail.first()),
                subresource: owned(tail.get(1)),
            },
            _ => return None,
        };
        Some(parsed)
    }

    /// A list call rather than a call on one named object.
    pub fn is_collection(&self) -> bool {
        self.name.is_none()
    }

    /// This path scoped to `namespace`.
    pub fn with_namespace(&self, namespace: &str) -> String {
        let mut scoped = self.clone();
        scoped.namespace = Some(namespace.to_string());
        scoped.render()
    }

    pub fn render(&self) -> String {
        let mut out = self.prefix.clone();
        if let Some(ns) = &self.namespace {
            out.push_str("/namespaces/");
            out.push_str(ns);
        }
        out.push('/');
        out.push_str(&self.resource);
        for part in [&self.name, &self.subresource].into_iter().flatten() {
            out.push('/');
            out.push_str(part);
        }
        out
    }
}

/// Gateway parameters split off an inbound query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayQuery {
    pub namespace: Option<String>,
    pub page: Option<PageWindow>,
    /// Everything else, still encoded, to pass downstream.
    pub forward: String,
}

impl GatewayQuery {
    /// Split `raw` into gateway parameters and the query to forward.
    pub fn parse(raw: Option<&str>) -> Result<Self, GatewayError> {
        let mut namespace = None;
        let mut page = PageQuery::default();
        let mut forward = Vec::new();

        for pair in raw.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if !GATEWAY_QUERY_KEYS.contains(&key) {
                forward.push(pair);
                continue;
            }
            match key {
                NAMESPACE_PARAM if !value.is_empty() => {
                    validate_name(value).map_err(|e| {
                        GatewayError::Validation(format!("invalid namespace: {:#}", e))
                    })?;
                    namespace = Some(value.to_string());
                }
                PAGE_NUM_PARAM => page.page_num = Some(parse_number(key, value)?),
                PAGE_SIZE_PARAM => page.page_size = Some(parse_number(key, value)?),
                _ => {}
            }
        }

        let page = page
            .window()
            .map_err(|e| GatewayError::Validation(format!("{:#}", e)))?;
        Ok(Self {
            namespace,
            page,
            forward: forward.join("&"),
        })
    }

    /// `path` with the forwarded query appended.
    pub fn url_for(&self, base: &str, path: &str) -> String {
        if self.forward.is_empty() {
            format!("{}{}", base, path)
        } else {
            format!("{}{}?{}", base, path, self.forward)
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize, GatewayError> {
    value
        .parse()
        .map_err(|_| GatewayError::Validation(format!("{} must be a positive integer", key)))
}
