//! Common test utilities for xavyo-directory-query-graph integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xavyo_directory_query::definition::GraphApiVersion;
use xavyo_directory_query::{Credentials, GraphRequest};
use xavyo_directory_query_graph::{GraphAdapter, GraphAdapterConfig};

pub const TENANT_ID: &str = "test-tenant-id";

/// Test data factory for Graph users.
pub fn create_test_user(id: &str, upn_prefix: &str) -> Value {
    json!({
        "id": id,
        "userPrincipalName": format!("{upn_prefix}@test.onmicrosoft.com"),
        "displayName": format!("Test User {upn_prefix}"),
        "accountEnabled": true,
        "department": "Testing",
        "userType": "Member"
    })
}

/// Users `user-{start}..user-{end}`.
pub fn create_users(start: usize, end: usize) -> Vec<Value> {
    (start..end)
        .map(|i| create_test_user(&format!("user-{i}"), &format!("user{i}")))
        .collect()
}

/// Wraps items in an OData collection response.
pub fn create_odata_response(items: Vec<Value>, next_link: Option<&str>, count: Option<u64>) -> Value {
    let mut response = json!({ "value": items });
    if let Some(link) = next_link {
        response["@odata.nextLink"] = json!(link);
    }
    if let Some(count) = count {
        response["@odata.count"] = json!(count);
    }
    response
}

/// Creates an OData error response.
pub fn create_odata_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// Creates a mock OAuth token response.
pub fn create_token_response(access_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// Mounts a token endpoint expected to be called `times` times.
pub async fn mock_token_endpoint(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/{TENANT_ID}/oauth2/v2.0/token")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_token_response("mock-access-token", 3600)),
        )
        .expect(times)
        .mount(server)
        .await;
}

/// Adapter pointing both endpoints at the mock server.
pub fn adapter_for(server: &MockServer) -> GraphAdapter {
    GraphAdapter::new(GraphAdapterConfig::default().with_endpoints(server.uri(), server.uri()))
        .expect("valid adapter config")
}

pub fn credentials() -> Credentials {
    Credentials::graph(TENANT_ID, "test-client-id", "test-client-secret")
}

pub fn users_request() -> GraphRequest {
    GraphRequest {
        endpoint: "/users".to_string(),
        api_version: GraphApiVersion::V1,
        select: vec!["id".to_string(), "displayName".to_string()],
        expand: Vec::new(),
        filter: None,
        order_by: None,
        top: None,
        skip: None,
        count: false,
    }
}
