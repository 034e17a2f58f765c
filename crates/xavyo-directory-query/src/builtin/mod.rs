//! Built-in query catalogue.
//!
//! Definitions ship as JSON next to the crate and are embedded at compile
//! time, so the catalogue is available without any filesystem access.

use crate::definition::QueryDefinition;
use crate::error::{QueryError, QueryResult};

const LDAP_DEFINITIONS: &str = include_str!("../../definitions/ldap.json");
const GRAPH_DEFINITIONS: &str = include_str!("../../definitions/graph.json");

/// Parse the embedded LDAP and Graph definitions, LDAP first.
pub fn definitions() -> QueryResult<Vec<QueryDefinition>> {
    let mut all = parse("ldap.json", LDAP_DEFINITIONS)?;
    all.extend(parse("graph.json", GRAPH_DEFINITIONS)?);
    Ok(all)
}

fn parse(source: &str, json: &str) -> QueryResult<Vec<QueryDefinition>> {
    serde_json::from_str(json).map_err(|e| {
        QueryError::configuration(format!("invalid built-in catalogue {source}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{BackendType, QuerySpec};

    #[test]
    fn test_catalogue_parses() {
        let defs = definitions().unwrap();
        assert!(defs.iter().any(|d| d.id == "ad_inactive_users"));
        assert!(defs.iter().any(|d| d.id == "graph_group_members"));
    }

    #[test]
    fn test_backend_prefixes_match() {
        for def in definitions().unwrap() {
            match def.backend_type() {
                BackendType::Ldap => assert!(def.id.starts_with("ad_"), "{}", def.id),
                BackendType::Graph => assert!(def.id.starts_with("graph_"), "{}", def.id),
            }
        }
    }

    #[test]
    fn test_mfa_report_uses_beta() {
        let defs = definitions().unwrap();
        let def = defs
            .iter()
            .find(|d| d.id == "graph_mfa_registration_status")
            .unwrap();
        let QuerySpec::Graph(q) = &def.query else {
            panic!("expected Graph query");
        };
        assert_eq!(q.api_version.as_str(), "beta");
    }
}
