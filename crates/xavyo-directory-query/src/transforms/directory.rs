//! Built-in transforms for Active Directory and Entra ID rows.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::adapter::Row;
use crate::error::QueryResult;
use crate::postprocess::lookup;
use crate::time;

/// Attributes AD stores as FileTime integers.
const FILETIME_ATTRIBUTES: &[&str] = &[
    "lastLogonTimestamp",
    "lastLogon",
    "lastLogoff",
    "pwdLastSet",
    "accountExpires",
    "badPasswordTime",
    "lockoutTime",
];

/// Attributes AD stores as generalized time.
const GENERALIZED_TIME_ATTRIBUTES: &[&str] = &["whenCreated", "whenChanged"];

/// Fields that may carry a last sign-in, most specific first.
const ACTIVITY_FIELDS: &[&str] = &[
    "lastLogonTimestamp",
    "lastLogon",
    "signInActivity.lastSignInDateTime",
    "signInActivity.lastNonInteractiveSignInDateTime",
    "lastSignInDateTime",
    "approximateLastSignInDateTime",
];

/// `userAccountControl` bits, as documented for AD.
const UAC_FLAGS: &[(u32, &str)] = &[
    (0x0000_0001, "SCRIPT"),
    (0x0000_0002, "ACCOUNTDISABLE"),
    (0x0000_0008, "HOMEDIR_REQUIRED"),
    (0x0000_0010, "LOCKOUT"),
    (0x0000_0020, "PASSWD_NOTREQD"),
    (0x0000_0040, "PASSWD_CANT_CHANGE"),
    (0x0000_0080, "ENCRYPTED_TEXT_PWD_ALLOWED"),
    (0x0000_0100, "TEMP_DUPLICATE_ACCOUNT"),
    (0x0000_0200, "NORMAL_ACCOUNT"),
    (0x0000_0800, "INTERDOMAIN_TRUST_ACCOUNT"),
    (0x0000_1000, "WORKSTATION_TRUST_ACCOUNT"),
    (0x0000_2000, "SERVER_TRUST_ACCOUNT"),
    (0x0001_0000, "DONT_EXPIRE_PASSWORD"),
    (0x0002_0000, "MNS_LOGON_ACCOUNT"),
    (0x0004_0000, "SMARTCARD_REQUIRED"),
    (0x0008_0000, "TRUSTED_FOR_DELEGATION"),
    (0x0010_0000, "NOT_DELEGATED"),
    (0x0020_0000, "USE_DES_KEY_ONLY"),
    (0x0040_0000, "DONT_REQ_PREAUTH"),
    (0x0080_0000, "PASSWORD_EXPIRED"),
    (0x0100_0000, "TRUSTED_TO_AUTH_FOR_DELEGATION"),
];

/// Parse a directory timestamp: RFC 3339, generalized time or FileTime.
fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => time::parse_any_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(time::from_file_time),
        _ => None,
    }
}

fn iso_or_null(instant: Option<DateTime<Utc>>) -> Value {
    instant.map_or(Value::Null, |i| Value::String(time::format_iso(i)))
}

fn whole_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days().max(0)
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Adds `lastActivity`, `daysInactive` and `neverLoggedIn`.
///
/// When a numeric `days` parameter is present, rows active more recently
/// than that are dropped.
pub fn calculate_inactivity(rows: Vec<Row>, params: &Map<String, Value>) -> QueryResult<Vec<Row>> {
    Ok(calculate_inactivity_at(rows, params, Utc::now()))
}

pub(crate) fn calculate_inactivity_at(
    rows: Vec<Row>,
    params: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Vec<Row> {
    let threshold = params.get("days").and_then(Value::as_f64);

    rows.into_iter()
        .filter_map(|mut row| {
            let last = ACTIVITY_FIELDS
                .iter()
                .filter_map(|field| lookup(&row, field).and_then(timestamp_of))
                .max();
            let days = last.map(|l| whole_days(l, now));

            if let (Some(threshold), Some(days)) = (threshold, days) {
                if (days as f64) < threshold {
                    return None;
                }
            }

            row.insert("lastActivity".to_string(), iso_or_null(last));
            row.insert("daysInactive".to_string(), days.map_or(Value::Null, Value::from));
            row.insert("neverLoggedIn".to_string(), Value::Bool(last.is_none()));
            Some(row)
        })
        .collect()
}

/// Expands `userAccountControl` into boolean columns and a flag list.
pub fn decode_user_account_control(
    rows: Vec<Row>,
    _params: &Map<String, Value>,
) -> QueryResult<Vec<Row>> {
    Ok(rows
        .into_iter()
        .map(|mut row| {
            let Some(uac) = row
                .get("userAccountControl")
                .and_then(integer)
                .and_then(|v| u32::try_from(v).ok())
            else {
                return row;
            };

            let has = |bit: u32| Value::Bool(uac & bit != 0);
            row.insert("accountDisabled".to_string(), has(0x2));
            row.insert("accountEnabled".to_string(), Value::Bool(uac & 0x2 == 0));
            row.insert("lockedOut".to_string(), has(0x10));
            row.insert("passwordNotRequired".to_string(), has(0x20));
            row.insert("passwordCantChange".to_string(), has(0x40));
            row.insert("passwordNeverExpires".to_string(), has(0x1_0000));
            row.insert("smartcardRequired".to_string(), has(0x4_0000));
            row.insert("trustedForDelegation".to_string(), has(0x8_0000));
            row.insert("passwordExpired".to_string(), has(0x80_0000));
            row.insert(
                "userAccountControlFlags".to_string(),
                Value::Array(
                    UAC_FLAGS
                        .iter()
                        .filter(|(bit, _)| uac & bit != 0)
                        .map(|(_, name)| Value::String((*name).to_string()))
                        .collect(),
                ),
            );
            row
        })
        .collect())
}

/// Rewrites FileTime and generalized-time attributes as ISO-8601 strings.
///
/// Unset FileTimes (`0` or "never") become null; unparseable values are kept.
pub fn convert_file_times(rows: Vec<Row>, _params: &Map<String, Value>) -> QueryResult<Vec<Row>> {
    Ok(rows
        .into_iter()
        .map(|mut row| {
            for field in FILETIME_ATTRIBUTES {
                let Some(raw) = row.get(*field).and_then(integer) else {
                    continue;
                };
                row.insert((*field).to_string(), iso_or_null(time::from_file_time(raw)));
            }
            for field in GENERALIZED_TIME_ATTRIBUTES {
                let Some(parsed) = row
                    .get(*field)
                    .and_then(Value::as_str)
                    .and_then(time::parse_generalized_time)
                else {
                    continue;
                };
                row.insert((*field).to_string(), Value::String(time::format_iso(parsed)));
            }
            row
        })
        .collect())
}

/// Adds `passwordLastSet`, `passwordAgeDays` and `mustChangePassword`.
pub fn calculate_password_age(
    rows: Vec<Row>,
    params: &Map<String, Value>,
) -> QueryResult<Vec<Row>> {
    Ok(calculate_password_age_at(rows, params, Utc::now()))
}

pub(crate) fn calculate_password_age_at(
    rows: Vec<Row>,
    _params: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            let raw = row
                .get("pwdLastSet")
                .or_else(|| row.get("lastPasswordChangeDateTime"))
                .cloned()
                .unwrap_or(Value::Null);

            let must_change = integer(&raw) == Some(0);
            let set_at = timestamp_of(&raw);

            row.insert("passwordLastSet".to_string(), iso_or_null(set_at));
            row.insert(
                "passwordAgeDays".to_string(),
                set_at.map_or(Value::Null, |at| Value::from(whole_days(at, now))),
            );
            row.insert("mustChangePassword".to_string(), Value::Bool(must_change));
            row
        })
        .collect()
}

/// Normalise a Graph authentication method type to its short name, e.g.
/// `#microsoft.graph.fido2AuthenticationMethod` -> `fido2`.
fn method_name(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("@odata.type")
            .or_else(|| map.get("methodType"))
            .and_then(Value::as_str)?,
        _ => return None,
    };
    let short = raw.rsplit('.').next().unwrap_or(raw);
    let short = short.strip_suffix("AuthenticationMethod").unwrap_or(short);
    (!short.is_empty()).then(|| short.to_string())
}

/// Methods that do not count towards MFA on their own.
const WEAK_METHODS: &[&str] = &["password", "email", "securityQuestion"];

/// Flattens registered authentication methods into `authMethods`,
/// `authMethodCount` and `mfaCapable`.
pub fn flatten_auth_methods(
    rows: Vec<Row>,
    _params: &Map<String, Value>,
) -> QueryResult<Vec<Row>> {
    Ok(rows
        .into_iter()
        .map(|mut row| {
            let source = ["methodsRegistered", "authenticationMethods", "methods"]
                .iter()
                .find_map(|field| row.get(*field).and_then(Value::as_array).cloned())
                .unwrap_or_default();

            let mut methods: Vec<String> = source.iter().filter_map(method_name).collect();
            methods.sort();
            methods.dedup();

            let mfa_capable = row
                .get("isMfaCapable")
                .and_then(Value::as_bool)
                .unwrap_or_else(|| methods.iter().any(|m| !WEAK_METHODS.contains(&m.as_str())));

            row.insert("authMethodCount".to_string(), Value::from(methods.len()));
            row.insert("authMethods".to_string(), Value::String(methods.join(", ")));
            row.insert("mfaCapable".to_string(), Value::Bool(mfa_capable));
            row
        })
        .collect())
}

/// Adds `licenseCount`, `skuIds` and `disabledPlanCount` from
/// `assignedLicenses`. A string `skuId` parameter keeps only users holding
/// that SKU.
pub fn summarize_licenses(rows: Vec<Row>, params: &Map<String, Value>) -> QueryResult<Vec<Row>> {
    let wanted = params.get("skuId").and_then(Value::as_str).map(str::to_lowercase);

    Ok(rows
        .into_iter()
        .filter_map(|mut row| {
            let licenses = row
                .get("assignedLicenses")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let sku_ids: Vec<String> = licenses
                .iter()
                .filter_map(|l| l.get("skuId").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            let disabled_plans: usize = licenses
                .iter()
                .filter_map(|l| l.get("disabledPlans").and_then(Value::as_array))
                .map(Vec::len)
                .sum();

            if let Some(wanted) = &wanted {
                if !sku_ids.iter().any(|s| s.to_lowercase() == *wanted) {
                    return None;
                }
            }

            row.insert("licenseCount".to_string(), Value::from(sku_ids.len()));
            row.insert("skuIds".to_string(), Value::String(sku_ids.join(", ")));
            row.insert("disabledPlanCount".to_string(), Value::from(disabled_plans));
            Some(row)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_calculate_inactivity_from_filetime_and_graph() {
        let rows = vec![
            // 2024-01-01T00:00:00Z
            row(json!({ "cn": "ad", "lastLogonTimestamp": "133485408000000000" })),
            row(json!({ "cn": "graph", "signInActivity": { "lastSignInDateTime": "2024-01-21T00:00:00Z" } })),
            row(json!({ "cn": "never" })),
        ];

        let out = calculate_inactivity_at(rows, &Map::new(), now());
        assert_eq!(out[0]["daysInactive"], json!(30));
        assert_eq!(out[0]["lastActivity"], json!("2024-01-01T00:00:00.000Z"));
        assert_eq!(out[1]["daysInactive"], json!(10));
        assert_eq!(out[2]["daysInactive"], Value::Null);
        assert_eq!(out[2]["neverLoggedIn"], json!(true));
    }

    #[test]
    fn test_calculate_inactivity_threshold() {
        let rows = vec![
            row(json!({ "cn": "old", "lastLogonTimestamp": "133485408000000000" })),
            row(json!({ "cn": "recent", "lastSignInDateTime": "2024-01-30T00:00:00Z" })),
            row(json!({ "cn": "never" })),
        ];
        let params = json!({ "days": 14 }).as_object().cloned().unwrap();

        let out = calculate_inactivity_at(rows, &params, now());
        let names: Vec<_> = out.iter().map(|r| r["cn"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["old", "never"]);
    }

    #[test]
    fn test_decode_user_account_control() {
        let out = decode_user_account_control(
            vec![row(json!({ "userAccountControl": "66050" })), row(json!({ "cn": "x" }))],
            &Map::new(),
        )
        .unwrap();

        // 66050 = NORMAL_ACCOUNT | ACCOUNTDISABLE | DONT_EXPIRE_PASSWORD
        assert_eq!(out[0]["accountDisabled"], json!(true));
        assert_eq!(out[0]["accountEnabled"], json!(false));
        assert_eq!(out[0]["passwordNeverExpires"], json!(true));
        assert_eq!(out[0]["lockedOut"], json!(false));
        assert_eq!(
            out[0]["userAccountControlFlags"],
            json!(["ACCOUNTDISABLE", "NORMAL_ACCOUNT", "DONT_EXPIRE_PASSWORD"])
        );
        assert!(out[1].get("accountDisabled").is_none());
    }

    #[test]
    fn test_convert_file_times() {
        let out = convert_file_times(
            vec![row(json!({
                "pwdLastSet": "133485408000000000",
                "accountExpires": "9223372036854775807",
                "lockoutTime": 0,
                "whenCreated": "20240102030405.0Z",
                "cn": "alice"
            }))],
            &Map::new(),
        )
        .unwrap();

        assert_eq!(out[0]["pwdLastSet"], json!("2024-01-01T00:00:00.000Z"));
        assert_eq!(out[0]["accountExpires"], Value::Null);
        assert_eq!(out[0]["lockoutTime"], Value::Null);
        assert_eq!(out[0]["whenCreated"], json!("2024-01-02T03:04:05.000Z"));
        assert_eq!(out[0]["cn"], json!("alice"));
    }

    #[test]
    fn test_calculate_password_age() {
        let out = calculate_password_age_at(
            vec![
                row(json!({ "pwdLastSet": "133485408000000000" })),
                row(json!({ "pwdLastSet": "0" })),
            ],
            &Map::new(),
            now(),
        );
        assert_eq!(out[0]["passwordAgeDays"], json!(30));
        assert_eq!(out[0]["mustChangePassword"], json!(false));
        assert_eq!(out[1]["passwordAgeDays"], Value::Null);
        assert_eq!(out[1]["mustChangePassword"], json!(true));
    }

    #[test]
    fn test_flatten_auth_methods() {
        let out = flatten_auth_methods(
            vec![
                row(json!({ "methodsRegistered": ["password", "microsoftAuthenticatorPush", "password"] })),
                row(json!({ "authenticationMethods": [
                    { "@odata.type": "#microsoft.graph.passwordAuthenticationMethod" },
                    { "@odata.type": "#microsoft.graph.emailAuthenticationMethod" }
                ] })),
            ],
            &Map::new(),
        )
        .unwrap();

        assert_eq!(out[0]["authMethods"], json!("microsoftAuthenticatorPush, password"));
        assert_eq!(out[0]["authMethodCount"], json!(2));
        assert_eq!(out[0]["mfaCapable"], json!(true));
        assert_eq!(out[1]["authMethods"], json!("email, password"));
        assert_eq!(out[1]["mfaCapable"], json!(false));
    }

    #[test]
    fn test_summarize_licenses() {
        let rows = vec![
            row(json!({ "upn": "a", "assignedLicenses": [
                { "skuId": "SKU-E5", "disabledPlans": ["p1", "p2"] },
                { "skuId": "SKU-VISIO", "disabledPlans": [] }
            ] })),
            row(json!({ "upn": "b", "assignedLicenses": [] })),
        ];

        let out = summarize_licenses(rows.clone(), &Map::new()).unwrap();
        assert_eq!(out[0]["licenseCount"], json!(2));
        assert_eq!(out[0]["skuIds"], json!("SKU-E5, SKU-VISIO"));
        assert_eq!(out[0]["disabledPlanCount"], json!(2));
        assert_eq!(out[1]["licenseCount"], json!(0));

        let params = json!({ "skuId": "sku-e5" }).as_object().cloned().unwrap();
        let out = summarize_licenses(rows, &params).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["upn"], json!("a"));
    }
}
