//! Declarative query definitions.
//!
//! A [`QueryDefinition`] describes one report: the backend-native query shape
//! (an LDAP search or a Graph request), the typed runtime parameters it
//! accepts, and the post-processing applied to the raw rows. Definitions are
//! immutable once loaded and shared read-only across executions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{QueryError, QueryResult};
use crate::filter::placeholders;

/// Backend a definition targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// On-premises LDAP / Active Directory.
    #[serde(alias = "ad", alias = "active_directory")]
    Ldap,
    /// Microsoft Graph (Entra ID / O365).
    #[serde(alias = "azure", alias = "entra", alias = "o365")]
    Graph,
}

impl BackendType {
    /// Stable lowercase name used in logs, cache keys and persistence.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Ldap => "ldap",
            BackendType::Graph => "graph",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ldap" | "ad" | "active_directory" => Ok(Self::Ldap),
            "graph" | "azure" | "entra" | "o365" => Ok(Self::Graph),
            _ => Err(format!("Unknown backend type: {s}")),
        }
    }
}

/// Report category used to group definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Users,
    Groups,
    Computers,
    Security,
    Compliance,
    Licenses,
    Applications,
    Devices,
    Audit,
    Custom,
}

/// A declarative report definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    /// Unique key across the registry.
    pub id: String,

    /// Human readable name.
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub category: QueryCategory,

    /// Backend-specific query shape.
    pub query: QuerySpec,

    /// Runtime parameters accepted by this definition.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_process: Option<PostProcess>,

    /// Raw field name -> display mapping.
    #[serde(default)]
    pub field_mappings: BTreeMap<String, FieldMapping>,
}

impl QueryDefinition {
    /// Backend this definition runs against.
    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        match self.query {
            QuerySpec::Ldap(_) => BackendType::Ldap,
            QuerySpec::Graph(_) => BackendType::Graph,
        }
    }

    /// Named post-processing transform referenced by this definition, if any.
    #[must_use]
    pub fn transform_name(&self) -> Option<&str> {
        self.post_process
            .as_ref()
            .and_then(|pp| pp.transform.as_deref())
    }

    /// All template strings of the query, labelled by where they appear.
    #[must_use]
    pub fn templates(&self) -> Vec<(&'static str, &str)> {
        match &self.query {
            QuerySpec::Ldap(q) => {
                let mut out = vec![("filter", q.filter.as_str())];
                if let Some(base) = &q.base {
                    out.push(("base", base.as_str()));
                }
                out
            }
            QuerySpec::Graph(q) => {
                let mut out = vec![("endpoint", q.endpoint.as_str())];
                if let Some(filter) = &q.filter {
                    out.push(("filter", filter.as_str()));
                }
                out
            }
        }
    }

    /// Check structural invariants of this definition.
    ///
    /// Every `{{param}}` placeholder used in a query template must be declared
    /// in `parameters`, and declared validation patterns must compile.
    pub fn validate(&self) -> QueryResult<()> {
        if self.id.trim().is_empty() {
            return Err(QueryError::configuration("query definition id is empty"));
        }

        for (location, template) in self.templates() {
            for name in placeholders(template) {
                if !self.parameters.contains_key(&name) {
                    return Err(QueryError::configuration(format!(
                        "query '{}' references undeclared parameter '{}' in {}",
                        self.id, name, location
                    )));
                }
            }
        }

        for (name, spec) in &self.parameters {
            if let Some(pattern) = spec.validation.as_ref().and_then(|v| v.pattern.as_deref()) {
                regex::Regex::new(pattern).map_err(|e| {
                    QueryError::configuration(format!(
                        "query '{}' parameter '{}' has invalid pattern: {}",
                        self.id, name, e
                    ))
                })?;
            }
        }

        Ok(())
    }
}

/// Backend-specific query shape, discriminated by `backendType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backendType", rename_all = "snake_case")]
pub enum QuerySpec {
    #[serde(alias = "ad")]
    Ldap(LdapQuerySpec),
    #[serde(alias = "azure")]
    Graph(GraphQuerySpec),
}

/// LDAP search definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapQuerySpec {
    /// Search base DN template; the adapter's base DN is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    #[serde(default)]
    pub scope: LdapScope,

    /// RFC 4515 filter template.
    pub filter: String,

    /// Attributes to retrieve (all user attributes when empty).
    #[serde(default)]
    pub attributes: Vec<String>,

    /// Server-side cap on returned entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<u32>,
}

/// LDAP search scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LdapScope {
    Base,
    #[serde(alias = "onelevel")]
    One,
    #[default]
    #[serde(alias = "subtree")]
    Sub,
}

/// Microsoft Graph request definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQuerySpec {
    /// Resource path template, e.g. `/groups/{{groupId}}/members`.
    pub endpoint: String,

    #[serde(default)]
    pub api_version: GraphApiVersion,

    #[serde(default)]
    pub select: Vec<String>,

    #[serde(default)]
    pub expand: Vec<String>,

    /// OData `$filter` template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,

    /// Request `$count=true` (requires `ConsistencyLevel: eventual`).
    #[serde(default)]
    pub count: bool,
}

/// Graph API version segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphApiVersion {
    #[default]
    #[serde(rename = "v1.0")]
    V1,
    #[serde(rename = "beta")]
    Beta,
}

impl GraphApiVersion {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphApiVersion::V1 => "v1.0",
            GraphApiVersion::Beta => "beta",
        }
    }
}

/// Logical value type of a parameter or mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(s)
    }
}

/// Schema of one runtime parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub value_type: ValueType,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<ParameterTransform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    /// Create an optional parameter of the given type.
    #[must_use]
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            required: false,
            default: None,
            transform: None,
            validation: None,
            description: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: ParameterTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ValidationRules) -> Self {
        self.validation = Some(validation);
        self
    }
}

/// Named conversion from a logical value to its backend-native form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterTransform {
    DaysToDate,
    HoursToDate,
    DaysToFileTime,
    HoursToFileTime,
    FormatDate,
    #[serde(rename = "escapeOData")]
    EscapeOData,
    EscapeLdap,
}

/// Value constraints for a parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Minimum numeric value, or minimum length for strings and arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Maximum numeric value, or maximum length for strings and arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

/// Client-side processing applied after the backend returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcess {
    #[serde(default)]
    pub client_filter: Vec<ClientFilter>,

    /// Name of a function in the transform registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// A single client-side predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFilter {
    pub field: String,
    pub operator: FilterOperator,
    /// Comparison value; strings may contain `{{param}}` placeholders.
    pub value: Value,
}

/// Client-side predicate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
}

/// Group-by aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    pub group_by: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<AggregateMetric>,
}

/// One aggregate output column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetric {
    pub op: AggregateOp,
    /// Source field (ignored for `count`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Output column name.
    #[serde(rename = "as")]
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
}

/// Single-field sort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ascending")]
    Asc,
    #[serde(alias = "descending")]
    Desc,
}

/// Display mapping for one raw field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub display_name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<FieldTransform>,

    /// chrono format string used by `dateToLocal`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default)]
    pub hide: bool,
}

/// Per-field display transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldTransform {
    DateToLocal,
    BooleanToYesNo,
    ArrayToString,
    ExtractProperty { path: String },
}
