use crate::error::{Error, Result};

use std::collections::BTreeMap;

use orbit_pack::labels::{LABEL_PURPOSE, PURPOSE_RUNTIME_UPGRADE};
use orbit_pack::{Locator, PackageQuery, PackageStore};
use semver::Version;
use tracing::debug;

/// Allow-lists for runtime version changes.
///
/// `direct_minimums` are the oldest versions (per major/minor line) that may
/// jump straight to the target. `via` maps an origin line to the
/// intermediate runtimes that must be shipped in the cluster image.
#[derive(Clone, Debug, Default)]
pub struct UpgradePath {
    pub direct_minimums: Vec<Version>,
    pub via: BTreeMap<Version, Vec<Version>>,
}

/// `version` satisfies `minimum` when it is on the same major/minor line
/// with at least its patch.
fn patch_ge(version: &Version, minimum: &Version) -> bool {
    version.major == minimum.major
        && version.minor == minimum.minor
        && version.patch >= minimum.patch
}

/// Classify a `from -> to` runtime change, verifying that required
/// intermediate runtimes are present in the package store.
pub async fn check_runtime_upgrade<S: PackageStore>(
    store: &S,
    repository: &str,
    from: &Version,
    to: &Version,
    paths: &UpgradePath,
) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if to < from {
        return Err(Error::DowngradeRejected {
            from: from.clone(),
            to: to.clone(),
        });
    }
    if paths
        .direct_minimums
        .iter()
        .any(|minimum| patch_ge(from, minimum))
    {
        debug!(msg = "direct upgrade allowed", %from, %to);
        return Ok(());
    }
    if let Some(intermediates) = paths
        .via
        .iter()
        .find(|(origin, _)| patch_ge(from, origin))
        .map(|(_, intermediates)| intermediates)
    {
        let missing = missing_intermediates(store, repository, intermediates).await?;
        if !missing.is_empty() {
            return Err(Error::NeedsIntermediates { missing });
        }
        debug!(msg = "upgrade allowed via intermediates", %from, %to);
        return Ok(());
    }
    Err(Error::UnsupportedUpgrade {
        from: from.clone(),
        to: to.clone(),
    })
}

/// Intermediate versions with no matching runtime package in the store.
/// A package matches when it carries the runtime-upgrade label and its
/// version satisfies the intermediate (patch-ge on the same line).
async fn missing_intermediates<S: PackageStore>(
    store: &S,
    repository: &str,
    intermediates: &[Version],
) -> Result<Vec<String>> {
    let runtimes = store
        .find_packages(
            &PackageQuery::in_repository(repository)
                .with_label(LABEL_PURPOSE, PURPOSE_RUNTIME_UPGRADE),
        )
        .await?;
    let available: Vec<&Locator> = runtimes.iter().map(|envelope| &envelope.locator).collect();
    Ok(intermediates
        .iter()
        .filter(|intermediate| {
            !available
                .iter()
                .any(|locator| patch_ge(&locator.version, intermediate))
        })
        .map(Version::to_string)
        .collect())
}
