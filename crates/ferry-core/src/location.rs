//! Parsing of `scheme://account/path` location strings.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::TransferError;

/// A location inside a cloud storage account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloudLocation {
    /// Provider scheme, lowercased (e.g. `s3`, `gdrive`).
    pub scheme: String,
    pub account: String,
    /// Path inside the account, without a leading slash.
    pub path: String,
}

impl CloudLocation {
    /// Whether both locations live in the same account.
    pub fn same_account(&self, other: &CloudLocation) -> bool {
        self.scheme == other.scheme && self.account == other.account
    }

    /// Location of a child entry.
    pub fn join(&self, name: &str) -> CloudLocation {
        let name = name.trim_start_matches('/');
        let path = if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path.trim_end_matches('/'), name)
        };
        CloudLocation {
            scheme: self.scheme.clone(),
            account: self.account.clone(),
            path,
        }
    }

    /// Last path segment.
    pub fn file_name(&self) -> Option<&str> {
        self.path.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
    }
}

impl fmt::Display for CloudLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.account, self.path)
    }
}

/// Where the data of an operation lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Local(PathBuf),
    Cloud(CloudLocation),
}

impl Location {
    /// Parse a location string.
    ///
    /// Plain paths and `file://` URLs are local; any other `scheme://` prefix
    /// addresses a cloud account and must name one.
    pub fn parse(input: &str) -> Result<Self, TransferError> {
        let invalid = |reason: &str| TransferError::InvalidLocation {
            location: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("location is empty"));
        }

        let Some((scheme, rest)) = trimmed.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(trimmed)));
        };

        if scheme.is_empty() {
            return Err(invalid("missing scheme"));
        }
        if !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid("scheme contains invalid characters"));
        }

        let scheme = scheme.to_ascii_lowercase();
        if scheme == "file" {
            if rest.is_empty() {
                return Err(invalid("missing path"));
            }
            return Ok(Self::Local(PathBuf::from(rest)));
        }

        let (account, path) = rest.split_once('/').unwrap_or((rest, ""));
        if account.is_empty() {
            return Err(invalid("missing account"));
        }

        Ok(Self::Cloud(CloudLocation {
            scheme,
            account: account.to_string(),
            path: path.trim_matches('/').to_string(),
        }))
    }

    pub fn as_local(&self) -> Option<&PathBuf> {
        match self {
            Self::Local(path) => Some(path),
            Self::Cloud(_) => None,
        }
    }

    pub fn as_cloud(&self) -> Option<&CloudLocation> {
        match self {
            Self::Local(_) => None,
            Self::Cloud(cloud) => Some(cloud),
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, Self::Cloud(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Cloud(cloud) => write!(f, "{cloud}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local() {
        assert_eq!(
            Location::parse("/home/user/file.txt").unwrap(),
            Location::Local(PathBuf::from("/home/user/file.txt"))
        );
        assert_eq!(
            Location::parse("file:///tmp/x").unwrap(),
            Location::Local(PathBuf::from("/tmp/x"))
        );
    }

    #[test]
    fn test_parse_cloud() {
        let location = Location::parse("S3://backup/photos/2024/").unwrap();
        let cloud = location.as_cloud().unwrap();
        assert_eq!(cloud.scheme, "s3");
        assert_eq!(cloud.account, "backup");
        assert_eq!(cloud.path, "photos/2024");
        assert_eq!(cloud.file_name(), Some("2024"));
        assert_eq!(cloud.join("a.jpg").path, "photos/2024/a.jpg");
        assert_eq!(location.to_string(), "s3://backup/photos/2024");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            Location::parse("://acct/x"),
            Err(TransferError::InvalidLocation { .. })
        ));
        assert!(Location::parse("s3:///x").is_err());
        assert!(Location::parse("bad scheme://a/b").is_err());
        assert!(Location::parse("   ").is_err());
    }
}
