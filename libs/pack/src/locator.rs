use crate::error::{Error, Result};

use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Version};
use serde::{Deserialize, Serialize};

/// Address of a package in the store: `<repository>/<name>:<version>`.
///
/// The version is a semver with optional `+<unix-seconds>` build metadata
/// used as a monotonic rotation counter. Equality is exact, build metadata
/// included.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    pub repository: String,
    pub name: String,
    pub version: Version,
}

impl Locator {
    pub fn new(repository: &str, name: &str, version: &str) -> Result<Self> {
        let version = Version::parse(version)
            .map_err(|e| Error::InvalidVersion(version.to_string(), e))?;
        Ok(Locator {
            repository: repository.to_string(),
            name: name.to_string(),
            version,
        })
    }

    /// Project the version to `0.0.0`, keeping repository and name.
    ///
    /// Labels reference a package family through this projection so that
    /// rotated packages stay discoverable under one stable key.
    pub fn zero_version(&self) -> Locator {
        Locator {
            repository: self.repository.clone(),
            name: self.name.clone(),
            version: Version::new(0, 0, 0),
        }
    }

    /// Return the locator with `+<unix-seconds>` build metadata.
    pub fn with_rotation(&self, unix_seconds: i64) -> Locator {
        let mut version = self.version.clone();
        // safe unwrap: a decimal integer is always valid build metadata
        version.build = BuildMetadata::new(&unix_seconds.to_string()).unwrap();
        Locator {
            repository: self.repository.clone(),
            name: self.name.clone(),
            version,
        }
    }

    #[inline]
    pub fn is_rotation(&self) -> bool {
        !self.version.build.is_empty()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.repository, self.name, self.version)
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (repository, rest) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidLocator(s.to_string(), "missing '/'".to_string()))?;
        let (name, version) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidLocator(s.to_string(), "missing ':'".to_string()))?;
        if repository.is_empty() || name.is_empty() {
            return Err(Error::InvalidLocator(
                s.to_string(),
                "empty repository or name".to_string(),
            ));
        }
        Locator::new(repository, name, version)
    }
}

impl TryFrom<String> for Locator {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> String {
        locator.to_string()
    }
}
