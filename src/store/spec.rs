//! Model name + tag value type

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag applied when a spec string carries none
pub const DEFAULT_TAG: &str = "latest";

/// A model reference such as `llama2:7b`, `user/repo:q4` or `hf.co/user/repo:latest`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelSpec {
    name: String,
    tag: String,
}

impl ModelSpec {
    /// Build a spec from already-split parts
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> VaultResult<Self> {
        let name = name.into();
        let tag = tag.into();
        if name.is_empty() {
            return Err(VaultError::InvalidSpec {
                input: format!("{}:{}", name, tag),
                reason: "model name is empty",
            });
        }
        if tag.is_empty() {
            return Err(VaultError::InvalidSpec {
                input: format!("{}:{}", name, tag),
                reason: "tag is empty",
            });
        }
        if tag.contains('/') || tag == "." || tag == ".." {
            return Err(VaultError::InvalidSpec {
                input: format!("{}:{}", name, tag),
                reason: "tag is not a valid path segment",
            });
        }
        if name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(VaultError::InvalidSpec {
                input: format!("{}:{}", name, tag),
                reason: "model name contains an empty or relative path segment",
            });
        }
        Ok(Self { name, tag })
    }

    /// Parse `name[:tag]`
    ///
    /// The last colon separates the tag, unless it sits before the last `/`
    /// (a registry host port such as `localhost:5000/repo`).
    pub fn parse(input: &str) -> VaultResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(VaultError::InvalidSpec {
                input: input.to_string(),
                reason: "spec is empty",
            });
        }

        let last_slash = input.rfind('/');
        match input.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => {
                let (name, tag) = (&input[..colon], &input[colon + 1..]);
                Self::new(name, tag).map_err(|e| match e {
                    VaultError::InvalidSpec { reason, .. } => VaultError::InvalidSpec {
                        input: input.to_string(),
                        reason,
                    },
                    other => other,
                })
            }
            _ => Self::new(input, DEFAULT_TAG),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Key used by the runtime's model listing
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for ModelSpec {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModelSpec {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModelSpec> for String {
    fn from(spec: ModelSpec) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare() {
        let spec = ModelSpec::parse("llama2:7b").unwrap();
        assert_eq!(spec.name(), "llama2");
        assert_eq!(spec.tag(), "7b");
        assert_eq!(spec.to_string(), "llama2:7b");
    }

    #[test]
    fn test_parse_defaults_tag() {
        let spec = ModelSpec::parse("llama2").unwrap();
        assert_eq!(spec.tag(), DEFAULT_TAG);
        assert_eq!(spec.key(), "llama2:latest");
    }

    #[test]
    fn test_parse_remote_origin() {
        let spec = ModelSpec::parse("hf.co/bartowski/Llama-3.2-1B-GGUF:Q4_K_M").unwrap();
        assert_eq!(spec.name(), "hf.co/bartowski/Llama-3.2-1B-GGUF");
        assert_eq!(spec.tag(), "Q4_K_M");
    }

    #[test]
    fn test_parse_last_colon_wins() {
        let spec = ModelSpec::parse("weird:name:tag").unwrap();
        assert_eq!(spec.name(), "weird:name");
        assert_eq!(spec.tag(), "tag");
    }

    #[test]
    fn test_parse_host_port_is_not_tag() {
        let spec = ModelSpec::parse("localhost:5000/user/repo").unwrap();
        assert_eq!(spec.name(), "localhost:5000/user/repo");
        assert_eq!(spec.tag(), DEFAULT_TAG);
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(ModelSpec::parse("").is_err());
        assert!(ModelSpec::parse("   ").is_err());
        assert!(ModelSpec::parse("llama2:").is_err());
        assert!(ModelSpec::parse(":7b").is_err());
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert!(ModelSpec::parse("../etc:passwd").is_err());
        assert!(ModelSpec::parse("user//repo:1").is_err());
        assert!(ModelSpec::parse("user/repo:..").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let spec = ModelSpec::parse("user/repo:q4").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"user/repo:q4\"");
        let back: ModelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
