//! Template substitution into backend-native query strings.
//!
//! Templates carry `{{ name }}` placeholders. Each placeholder is replaced by
//! the resolved parameter's native value, formatted for the target dialect:
//! quoted OData literals, RFC 4515 escaped LDAP assertion values, or raw
//! path segments for Graph endpoints.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::definition::{
    BackendType, GraphApiVersion, LdapScope, QueryDefinition, QuerySpec,
};
use crate::error::{QueryError, QueryResult};
use crate::params::{NativeValue, ResolvedParameters};
use crate::time;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex"));

/// Target syntax for placeholder substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// OData `$filter` expression.
    OData,
    /// RFC 4515 LDAP filter or DN.
    Ldap,
    /// Graph resource path.
    Path,
}

/// Names of all placeholders in `template`, in order of appearance.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// If `template` is exactly one placeholder, return its name.
#[must_use]
pub fn sole_placeholder(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let caps = PLACEHOLDER.captures(trimmed)?;
    if caps.get(0)?.as_str() != trimmed {
        return None;
    }
    caps.get(1).map(|m| m.as_str())
}

/// Double every single quote, as OData string literals require.
#[must_use]
pub fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}

/// Inverse of [`escape_odata`].
#[must_use]
pub fn unescape_odata(value: &str) -> String {
    value.replace("''", "'")
}

/// Escape an LDAP assertion value (RFC 4515).
#[must_use]
pub fn escape_ldap_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// An LDAP search ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct LdapSearch {
    /// Search base; the adapter's configured base DN when `None`.
    pub base: Option<String>,
    pub scope: LdapScope,
    pub filter: String,
    pub attributes: Vec<String>,
    pub size_limit: Option<u32>,
}

/// A Graph request ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphRequest {
    pub endpoint: String,
    pub api_version: GraphApiVersion,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub top: Option<u32>,
    pub skip: Option<u32>,
    pub count: bool,
}

/// A definition with every template rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltQuery {
    Ldap(LdapSearch),
    Graph(GraphRequest),
}

impl BuiltQuery {
    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        match self {
            BuiltQuery::Ldap(_) => BackendType::Ldap,
            BuiltQuery::Graph(_) => BackendType::Graph,
        }
    }
}

/// Renders query templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterBuilder;

impl FilterBuilder {
    /// Replace every placeholder in `template` with its formatted value.
    pub fn build(
        template: &str,
        params: &ResolvedParameters,
        dialect: Dialect,
    ) -> QueryResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let name = name.as_str();
            let value = params.native(name).ok_or_else(|| {
                QueryError::parameter(name, "no value resolved for placeholder")
            })?;

            out.push_str(&template[last..whole.start()]);
            out.push_str(&render(name, value, dialect)?);
            last = whole.end();
        }
        out.push_str(&template[last..]);

        Ok(out)
    }

    /// Render all templates of `definition`.
    ///
    /// `search_base` overrides the definition's LDAP base when given.
    pub fn build_query(
        definition: &QueryDefinition,
        params: &ResolvedParameters,
        search_base: Option<&str>,
    ) -> QueryResult<BuiltQuery> {
        let built = match &definition.query {
            QuerySpec::Ldap(q) => {
                let base = match (search_base, &q.base) {
                    (Some(base), _) => Some(base.to_string()),
                    (None, Some(template)) => Some(Self::build(template, params, Dialect::Ldap)?),
                    (None, None) => None,
                };
                BuiltQuery::Ldap(LdapSearch {
                    base,
                    scope: q.scope,
                    filter: Self::build(&q.filter, params, Dialect::Ldap)?,
                    attributes: q.attributes.clone(),
                    size_limit: q.size_limit,
                })
            }
            QuerySpec::Graph(q) => BuiltQuery::Graph(GraphRequest {
                endpoint: Self::build(&q.endpoint, params, Dialect::Path)?,
                api_version: q.api_version,
                select: q.select.clone(),
                expand: q.expand.clone(),
                filter: q
                    .filter
                    .as_deref()
                    .map(|f| Self::build(f, params, Dialect::OData))
                    .transpose()?,
                order_by: q.order_by.clone(),
                top: q.top,
                skip: q.skip,
                count: q.count,
            }),
        };

        debug!(query_id = %definition.id, query = ?built, "Built backend query");
        Ok(built)
    }
}

fn render(name: &str, value: &NativeValue, dialect: Dialect) -> QueryResult<String> {
    match dialect {
        Dialect::OData => render_odata(name, value),
        Dialect::Ldap => render_ldap(name, value),
        Dialect::Path => render_path(name, value),
    }
}

fn render_odata(name: &str, value: &NativeValue) -> QueryResult<String> {
    Ok(match value {
        NativeValue::Null => "null".to_string(),
        NativeValue::Bool(b) => b.to_string(),
        NativeValue::Number(n) => n.to_string(),
        NativeValue::Text(s) => format!("'{}'", escape_odata(s)),
        NativeValue::Escaped {
            dialect: Dialect::OData,
            value,
        } => format!("'{value}'"),
        NativeValue::Escaped { value, .. } => format!("'{}'", escape_odata(value)),
        NativeValue::Date(d) => time::format_iso(*d),
        NativeValue::FileTime(ft) => ft.to_string(),
        NativeValue::Literal(s) => s.clone(),
        NativeValue::List(items) => items
            .iter()
            .map(|item| render_odata(name, item))
            .collect::<QueryResult<Vec<_>>>()?
            .join(","),
        NativeValue::Object(_) => {
            return Err(QueryError::parameter(
                name,
                "object values cannot be substituted into a filter",
            ))
        }
    })
}

fn render_ldap(name: &str, value: &NativeValue) -> QueryResult<String> {
    Ok(match value {
        NativeValue::Null => String::new(),
        NativeValue::Bool(true) => "TRUE".to_string(),
        NativeValue::Bool(false) => "FALSE".to_string(),
        NativeValue::Number(n) => n.to_string(),
        NativeValue::Text(s) => escape_ldap_value(s),
        NativeValue::Escaped {
            dialect: Dialect::Ldap,
            value,
        } => value.clone(),
        NativeValue::Escaped { value, .. } => escape_ldap_value(value),
        NativeValue::Date(d) => time::format_generalized_time(*d),
        NativeValue::FileTime(ft) => ft.to_string(),
        NativeValue::Literal(s) => s.clone(),
        NativeValue::List(items) => items
            .iter()
            .map(|item| render_ldap(name, item))
            .collect::<QueryResult<Vec<_>>>()?
            .join(","),
        NativeValue::Object(_) => {
            return Err(QueryError::parameter(
                name,
                "object values cannot be substituted into a filter",
            ))
        }
    })
}

fn render_path(name: &str, value: &NativeValue) -> QueryResult<String> {
    let segment = match value {
        NativeValue::Text(s) | NativeValue::Literal(s) => s.clone(),
        NativeValue::Escaped { value, .. } => value.clone(),
        NativeValue::Number(n) => n.to_string(),
        NativeValue::Bool(b) => b.to_string(),
        NativeValue::Date(d) => time::format_iso(*d),
        NativeValue::FileTime(ft) => ft.to_string(),
        NativeValue::Null | NativeValue::List(_) | NativeValue::Object(_) => {
            return Err(QueryError::parameter(
                name,
                "only scalar values can be used in an endpoint path",
            ))
        }
    };

    if segment.is_empty() {
        return Err(QueryError::parameter(name, "endpoint path segment is empty"));
    }
    if segment.contains(['/', '?', '#']) {
        return Err(QueryError::parameter(
            name,
            "endpoint path segment must not contain '/', '?' or '#'",
        ));
    }
    Ok(segment)
}
