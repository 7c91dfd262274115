//! Translates a [`TestConfiguration`] into the flat environment a worker
//! process reads its parameters from.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::{Header, HttpMethod, LoadProfile, TestConfiguration};

pub const ENV_TARGET_URL: &str = "TARGET_URL";
pub const ENV_HTTP_METHOD: &str = "HTTP_METHOD";
pub const ENV_HEADERS: &str = "HEADERS";
pub const ENV_STAGES: &str = "STAGES";
pub const ENV_VUS: &str = "VUS";
pub const ENV_DURATION: &str = "DURATION";
pub const ENV_BODY: &str = "BODY";

const CONTENT_TYPE: &str = "Content-Type";
const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Environment variables for one worker, keyed by variable name.
pub type EncodedConfig = BTreeMap<String, String>;

pub fn encode(config: &TestConfiguration) -> EncodedConfig {
    let mut env = EncodedConfig::new();

    env.insert(ENV_TARGET_URL.to_string(), config.url.clone());
    env.insert(ENV_HTTP_METHOD.to_string(), config.method.as_str().to_string());
    env.insert(
        ENV_HEADERS.to_string(),
        headers_json(&effective_headers(config)),
    );

    let (stages, vus, duration) = match &config.load {
        LoadProfile::Fixed { vus, duration } => {
            ("[]".to_string(), vus.to_string(), duration.clone())
        }
        LoadProfile::Staged { stages } => (
            serde_json::to_string(stages).unwrap_or_else(|_| "[]".to_string()),
            String::new(),
            String::new(),
        ),
    };
    env.insert(ENV_STAGES.to_string(), stages);
    env.insert(ENV_VUS.to_string(), vus);
    env.insert(ENV_DURATION.to_string(), duration);

    env.insert(
        ENV_BODY.to_string(),
        config.body.clone().unwrap_or_default(),
    );

    env
}

/// Headers as the worker should send them. A body on POST/PUT/PATCH without
/// any content-type header gets `application/json`; an existing header in
/// any letter case is left alone.
pub fn effective_headers(config: &TestConfiguration) -> Vec<Header> {
    with_default_content_type(config.method, &config.headers, config.body.as_deref())
}

pub fn with_default_content_type(
    method: HttpMethod,
    headers: &[Header],
    body: Option<&str>,
) -> Vec<Header> {
    let mut headers = headers.to_vec();

    let has_body = body.is_some_and(|b| !b.is_empty());
    let has_content_type = headers
        .iter()
        .any(|h| h.key.trim().eq_ignore_ascii_case(CONTENT_TYPE));

    if has_body && method.sends_body() && !has_content_type {
        headers.push(Header::new(CONTENT_TYPE, DEFAULT_CONTENT_TYPE));
    }

    headers
}

/// JSON object of headers. Duplicate keys are the caller's business: the
/// last occurrence wins.
fn headers_json(headers: &[Header]) -> String {
    let map: Map<String, Value> = headers
        .iter()
        .map(|h| (h.key.clone(), Value::String(h.value.clone())))
        .collect();
    Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;

    fn post_with_body() -> TestConfiguration {
        let mut config = TestConfiguration::load_test("https://example.com/api");
        config.method = HttpMethod::Post;
        config.body = Some(r#"{"name":"x"}"#.to_string());
        config
    }

    #[test]
    fn test_absent_fields_never_encode_as_undefined() {
        let mut config = TestConfiguration::load_test("https://example.com");
        config.load = LoadProfile::Staged {
            stages: vec![Stage {
                duration: "10s".to_string(),
                target: 5,
            }],
        };
        let env = encode(&config);
        assert!(env.values().all(|v| v != "undefined"));
        assert_eq!(env[ENV_BODY], "");
        assert_eq!(env[ENV_HEADERS], "{}");
        assert_eq!(env[ENV_VUS], "");
        assert_eq!(env[ENV_DURATION], "");
    }

    #[test]
    fn test_fixed_profile_encoding() {
        let config = TestConfiguration::load_test("https://example.com");
        let env = encode(&config);
        assert_eq!(env[ENV_TARGET_URL], "https://example.com");
        assert_eq!(env[ENV_HTTP_METHOD], "GET");
        assert_eq!(env[ENV_STAGES], "[]");
        assert_eq!(env[ENV_VUS], "10");
        assert_eq!(env[ENV_DURATION], "30s");
    }

    #[test]
    fn test_staged_profile_encoding() {
        let mut config = TestConfiguration::load_test("https://example.com");
        config.load = LoadProfile::Staged {
            stages: vec![
                Stage {
                    duration: "30s".to_string(),
                    target: 20,
                },
                Stage {
                    duration: "1m".to_string(),
                    target: 0,
                },
            ],
        };
        let env = encode(&config);
        let stages: serde_json::Value = serde_json::from_str(&env[ENV_STAGES]).unwrap();
        assert_eq!(
            stages,
            serde_json::json!([
                {"duration": "30s", "target": 20},
                {"duration": "1m", "target": 0}
            ])
        );
    }

    #[test]
    fn test_body_synthesizes_json_content_type() {
        let env = encode(&post_with_body());
        let headers: serde_json::Value = serde_json::from_str(&env[ENV_HEADERS]).unwrap();
        assert_eq!(headers["Content-Type"], "application/json");
        assert_eq!(env[ENV_BODY], r#"{"name":"x"}"#);
    }

    #[test]
    fn test_existing_content_type_any_case_is_kept() {
        let mut config = post_with_body();
        config.headers = vec![Header::new("content-TYPE", "text/plain")];
        let headers = effective_headers(&config);
        assert_eq!(headers, vec![Header::new("content-TYPE", "text/plain")]);
    }

    #[test]
    fn test_no_content_type_for_get_or_empty_body() {
        let mut config = post_with_body();
        config.method = HttpMethod::Get;
        assert!(effective_headers(&config).is_empty());

        let mut config = post_with_body();
        config.body = Some(String::new());
        assert!(effective_headers(&config).is_empty());
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let mut config = TestConfiguration::load_test("https://example.com");
        config.headers = vec![Header::new("X-Trace", "a"), Header::new("X-Trace", "b")];
        let env = encode(&config);
        assert_eq!(env[ENV_HEADERS], r#"{"X-Trace":"b"}"#);
    }
}
