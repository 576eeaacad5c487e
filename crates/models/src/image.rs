use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageNameError {
    #[error("invalid image reference '{reference}': {reason}")]
    Invalid { reference: String, reason: String },

    #[error(
        "image '{image}' is not a compatible substitute for '{expected}'; \
         declare it with as_compatible_substitute_for if it is known to work"
    )]
    Incompatible { image: String, expected: String },
}

/// The version part of an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageVersion {
    Tag(String),
    Digest(String),
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageVersion::Tag(tag) => write!(f, ":{}", tag),
            ImageVersion::Digest(digest) => write!(f, "@{}", digest),
        }
    }
}

/// A parsed container image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageName {
    registry: String,
    repository: String,
    version: ImageVersion,
    substitute_for: Option<Box<ImageName>>,
}

impl ImageName {
    pub fn parse(reference: &str) -> Result<Self, ImageNameError> {
        let reference = reference.trim();
        let invalid = |reason: &str| ImageNameError::Invalid {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (name, version) = if let Some((name, digest)) = reference.split_once('@') {
            if !digest.contains(':') || digest.ends_with(':') {
                return Err(invalid("digest must look like 'algorithm:hex'"));
            }
            (name, ImageVersion::Digest(digest.to_string()))
        } else {
            // A colon only separates a tag when it comes after the last path separator,
            // otherwise it belongs to a registry port.
            let last_slash = reference.rfind('/');
            match reference.rfind(':') {
                Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                    let tag = &reference[colon + 1..];
                    if !is_valid_tag(tag) {
                        return Err(invalid("tag contains invalid characters"));
                    }
                    (&reference[..colon], ImageVersion::Tag(tag.to_string()))
                }
                _ => (reference, ImageVersion::Tag(DEFAULT_TAG.to_string())),
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first, rest)
            }
            _ => ("", name),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("repository path has an empty component"));
        }
        if !repository.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/')
        }) {
            return Err(invalid("repository must be lowercase alphanumerics and separators"));
        }

        Ok(ImageName {
            registry: registry.to_string(),
            repository: repository.to_string(),
            version,
            substitute_for: None,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn version(&self) -> &ImageVersion {
        &self.version
    }

    /// Registry and repository without tag or digest.
    pub fn unversioned_part(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }

    /// The reference in the form the Docker API expects.
    pub fn canonical_name(&self) -> String {
        format!("{}{}", self.unversioned_part(), self.version)
    }

    pub fn with_tag(&self, tag: &str) -> Self {
        ImageName {
            version: ImageVersion::Tag(tag.to_string()),
            ..self.clone()
        }
    }

    /// Declares that this image can stand in for `other` even though the
    /// repository differs (mirrors, re-tagged builds).
    pub fn as_compatible_substitute_for(mut self, other: &ImageName) -> Self {
        self.substitute_for = Some(Box::new(other.clone()));
        self
    }

    pub fn is_compatible_with(&self, other: &ImageName) -> bool {
        if self.unversioned_part() == other.unversioned_part() {
            return true;
        }
        match &self.substitute_for {
            Some(declared) => declared.is_compatible_with(other),
            None => false,
        }
    }

    pub fn assert_compatible_with(&self, other: &ImageName) -> Result<(), ImageNameError> {
        if self.is_compatible_with(other) {
            Ok(())
        } else {
            Err(ImageNameError::Incompatible {
                image: self.canonical_name(),
                expected: other.unversioned_part(),
            })
        }
    }
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

impl FromStr for ImageName {
    type Err = ImageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl TryFrom<String> for ImageName {
    type Error = ImageNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ImageName::parse(&value)
    }
}

impl From<ImageName> for String {
    fn from(image: ImageName) -> Self {
        image.canonical_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMULATOR: &str = "mcr.microsoft.com/cosmosdb/linux/azure-cosmos-emulator";

    #[test]
    fn test_parse_registry_repository_and_tag() {
        let image = ImageName::parse(&format!("{}:vnext-preview", EMULATOR)).unwrap();
        assert_eq!(image.registry(), "mcr.microsoft.com");
        assert_eq!(image.repository(), "cosmosdb/linux/azure-cosmos-emulator");
        assert_eq!(image.version(), &ImageVersion::Tag("vnext-preview".to_string()));
    }

    #[test]
    fn test_parse_defaults_to_latest() {
        let image = ImageName::parse("redis").unwrap();
        assert_eq!(image.registry(), "");
        assert_eq!(image.canonical_name(), "redis:latest");
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        let image = ImageName::parse("localhost:5000/emulator").unwrap();
        assert_eq!(image.registry(), "localhost:5000");
        assert_eq!(image.repository(), "emulator");
        assert_eq!(image.version(), &ImageVersion::Tag("latest".to_string()));

        let tagged = ImageName::parse("localhost:5000/emulator:1.2").unwrap();
        assert_eq!(tagged.version(), &ImageVersion::Tag("1.2".to_string()));
    }

    #[test]
    fn test_parse_digest() {
        let image = ImageName::parse("library/redis@sha256:0123abcd").unwrap();
        assert_eq!(
            image.version(),
            &ImageVersion::Digest("sha256:0123abcd".to_string())
        );
        assert_eq!(image.canonical_name(), "library/redis@sha256:0123abcd");
    }

    #[test]
    fn test_rejects_invalid_references() {
        for reference in ["", "   ", "Redis", "foo//bar", "redis:", "redis@sha256", "redis:bad tag"] {
            assert!(
                ImageName::parse(reference).is_err(),
                "expected '{}' to be rejected",
                reference
            );
        }
    }

    #[test]
    fn test_same_repository_any_tag_is_compatible() {
        let default = ImageName::parse(EMULATOR).unwrap();
        for reference in [
            EMULATOR.to_string(),
            format!("{}:latest", EMULATOR),
            format!("{}:2.14.12", EMULATOR),
            format!("{}@sha256:deadbeef", EMULATOR),
        ] {
            let image = ImageName::parse(&reference).unwrap();
            assert!(image.is_compatible_with(&default), "{}", reference);
            assert!(image.assert_compatible_with(&default).is_ok());
        }
    }

    #[test]
    fn test_different_repository_is_incompatible() {
        let default = ImageName::parse(EMULATOR).unwrap();
        for reference in [
            "redis:7",
            "cosmosdb/linux/azure-cosmos-emulator",
            "mcr.microsoft.com/cosmosdb/windows/azure-cosmos-emulator",
        ] {
            let image = ImageName::parse(reference).unwrap();
            let err = image.assert_compatible_with(&default).unwrap_err();
            assert!(matches!(err, ImageNameError::Incompatible { .. }));
        }
    }

    #[test]
    fn test_declared_substitute_is_compatible() {
        let default = ImageName::parse(EMULATOR).unwrap();
        let mirror = ImageName::parse("registry.internal:5000/mirror/cosmos-emulator:2024")
            .unwrap()
            .as_compatible_substitute_for(&default);
        assert!(mirror.is_compatible_with(&default));
    }

    #[test]
    fn test_with_tag_keeps_repository() {
        let image = ImageName::parse(EMULATOR).unwrap().with_tag("stable");
        assert_eq!(image.canonical_name(), format!("{}:stable", EMULATOR));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let image = ImageName::parse("redis:7").unwrap();
        let json = serde_json::to_string(&image).unwrap();
        assert_eq!(json, "\"redis:7\"");
        let back: ImageName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, image);
        assert!(serde_json::from_str::<ImageName>("\"Not Valid\"").is_err());
    }
}
