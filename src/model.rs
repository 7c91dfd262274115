use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(ms|s|m|h))+$").unwrap());

// ============================================================================
// Test configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods that carry a request body and therefore get a default
    /// content type when none is given.
    pub fn sends_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stage {
    pub duration: String,
    pub target: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadProfile {
    Fixed { vus: u32, duration: String },
    Staged { stages: Vec<Stage> },
}

impl Default for LoadProfile {
    fn default() -> Self {
        LoadProfile::Fixed {
            vus: 10,
            duration: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestConfiguration {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub load: LoadProfile,
    #[serde(default, alias = "runLoadTest")]
    pub run_load_test: bool,
    #[serde(default, alias = "runAudit")]
    pub run_audit: bool,
    #[serde(default, alias = "runSeo")]
    pub run_seo: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, String),

    #[error("Unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("At least one of load test, audit or SEO analysis must be enabled")]
    NoFeatureSelected,

    #[error("Invalid load profile: {0}")]
    InvalidLoadProfile(String),

    #[error("Header keys must not be empty")]
    EmptyHeaderKey,
}

impl TestConfiguration {
    /// Minimal configuration for `url` with only the load test enabled.
    pub fn load_test(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            load: LoadProfile::default(),
            run_load_test: true,
            run_audit: false,
            run_seo: false,
        }
    }

    /// Reject configurations before any worker is launched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| ValidationError::InvalidUrl(self.url.clone(), e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
        }
        if parsed.host_str().is_none() {
            return Err(ValidationError::InvalidUrl(
                self.url.clone(),
                "missing host".to_string(),
            ));
        }

        if !(self.run_load_test || self.run_audit || self.run_seo) {
            return Err(ValidationError::NoFeatureSelected);
        }

        if self.headers.iter().any(|h| h.key.trim().is_empty()) {
            return Err(ValidationError::EmptyHeaderKey);
        }

        // The profile only matters to the load generator.
        if self.run_load_test {
            validate_load_profile(&self.load)?;
        }

        Ok(())
    }

    /// Artifact kinds this configuration will produce, in launch order.
    pub fn enabled_kinds(&self) -> Vec<ArtifactKind> {
        let mut kinds = Vec::with_capacity(3);
        if self.run_load_test {
            kinds.push(ArtifactKind::Load);
        }
        if self.run_audit {
            kinds.push(ArtifactKind::Audit);
        }
        if self.run_seo {
            kinds.push(ArtifactKind::Seo);
        }
        kinds
    }
}

fn validate_load_profile(profile: &LoadProfile) -> Result<(), ValidationError> {
    match profile {
        LoadProfile::Fixed { vus, duration } => {
            if *vus == 0 {
                return Err(ValidationError::InvalidLoadProfile(
                    "virtual users must be at least 1".to_string(),
                ));
            }
            check_duration(duration)
        }
        LoadProfile::Staged { stages } => {
            if stages.is_empty() {
                return Err(ValidationError::InvalidLoadProfile(
                    "staged profile needs at least one stage".to_string(),
                ));
            }
            stages.iter().try_for_each(|s| check_duration(&s.duration))
        }
    }
}

fn check_duration(duration: &str) -> Result<(), ValidationError> {
    if DURATION_PATTERN.is_match(duration) {
        Ok(())
    } else {
        Err(ValidationError::InvalidLoadProfile(format!(
            "'{}' is not a duration like 30s, 2m or 1m30s",
            duration
        )))
    }
}

// ============================================================================
// Run identity
// ============================================================================

/// Opaque token correlating a submission, its workers and their artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    /// Accept only identifiers this service could have minted. Run ids end
    /// up in file names, so anything else is refused.
    pub fn parse(raw: &str) -> Option<Self> {
        uuid::Uuid::parse_str(raw)
            .ok()
            .map(|u| RunId(u.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Load,
    Audit,
    Seo,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Load => "load",
            ArtifactKind::Audit => "audit",
            ArtifactKind::Seo => "seo",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load" => Ok(ArtifactKind::Load),
            "audit" => Ok(ArtifactKind::Audit),
            "seo" => Ok(ArtifactKind::Seo),
            other => Err(format!("Unknown artifact kind: {}", other)),
        }
    }
}

/// Identifies one result slot: a run produces at most one artifact per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub run_id: RunId,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(run_id: RunId, kind: ArtifactKind) -> Self {
        Self { run_id, kind }
    }

    /// Deterministic artifact file name, shared by workers and the store.
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.kind, self.run_id)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_minimal_config() {
        let config = TestConfiguration::load_test("https://example.com");
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_kinds(), vec![ArtifactKind::Load]);
    }

    #[test]
    fn test_relative_url_rejected() {
        let config = TestConfiguration::load_test("/just/a/path");
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidUrl(_, _))
        ));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let config = TestConfiguration::load_test("ftp://example.com/file");
        assert_eq!(
            config.validate(),
            Err(ValidationError::UnsupportedScheme("ftp".to_string()))
        );
    }

    #[test]
    fn test_no_toggle_rejected() {
        let mut config = TestConfiguration::load_test("https://example.com");
        config.run_load_test = false;
        assert_eq!(config.validate(), Err(ValidationError::NoFeatureSelected));
    }

    #[test]
    fn test_zero_vus_rejected() {
        let mut config = TestConfiguration::load_test("https://example.com");
        config.load = LoadProfile::Fixed {
            vus: 0,
            duration: "10s".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidLoadProfile(_))
        ));
    }

    #[test]
    fn test_bad_stage_duration_rejected() {
        let mut config = TestConfiguration::load_test("https://example.com");
        config.load = LoadProfile::Staged {
            stages: vec![
                Stage {
                    duration: "1m30s".to_string(),
                    target: 20,
                },
                Stage {
                    duration: "soon".to_string(),
                    target: 0,
                },
            ],
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidLoadProfile(_))
        ));
    }

    #[test]
    fn test_load_profile_ignored_when_load_test_disabled() {
        let mut config = TestConfiguration::load_test("https://example.com");
        config.run_load_test = false;
        config.run_audit = true;
        config.load = LoadProfile::Staged { stages: vec![] };
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_kinds(), vec![ArtifactKind::Audit]);
    }

    #[test]
    fn test_camel_case_toggles_accepted() {
        let config: TestConfiguration = serde_json::from_value(serde_json::json!({
            "url": "https://example.com",
            "method": "GET",
            "runLoadTest": true
        }))
        .unwrap();
        assert!(config.run_load_test);
        assert!(!config.run_audit);
        assert_eq!(config.load, LoadProfile::default());
    }

    #[test]
    fn test_run_id_parse_rejects_paths() {
        assert!(RunId::parse("../../etc/passwd").is_none());
        let id = RunId::new();
        assert_eq!(RunId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn test_artifact_file_name() {
        let id = RunId::parse("6f1c1f0e-4f7a-4c39-9a59-3f0f4b8c2d11").unwrap();
        let key = ArtifactKey::new(id, ArtifactKind::Audit);
        assert_eq!(
            key.file_name(),
            "audit-6f1c1f0e-4f7a-4c39-9a59-3f0f4b8c2d11.json"
        );
    }
}
