use crate::platform::SettingsStore;
use anyhow::{Context, Result};
use std::cmp::Ordering;

/// Running firmware version, from Cargo.toml.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build timestamp, set by build.rs.
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");

/// NVS key holding the version that ran last.
pub const VERSION_KEY: &str = "fw_version";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Parse `1.2.3`, with or without a leading `v`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches('v');
        let mut parts = s.split('.');
        let mut next = |what: &str| -> Result<u32> {
            parts
                .next()
                .with_context(|| format!("Missing {} version in '{}'", what, s))?
                .parse()
                .with_context(|| format!("Invalid {} version in '{}'", what, s))
        };
        let version = Version {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        };
        if parts.next().is_some() {
            anyhow::bail!("Invalid version format: {}", s);
        }
        Ok(version)
    }

    pub fn current() -> Result<Self> {
        Self::parse(FIRMWARE_VERSION)
    }

    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionChange {
    FirstBoot,
    Same,
    Upgraded { from: Version },
    Downgraded { from: Version },
}

/// Compare the running version with the stored one and store the running one.
pub fn track(store: &mut dyn SettingsStore) -> Result<VersionChange> {
    let current = Version::current()?;
    let stored = store
        .get_str(VERSION_KEY)
        .context("Failed to read stored firmware version")?;

    let change = match stored.as_deref().map(Version::parse) {
        None => VersionChange::FirstBoot,
        Some(Err(e)) => {
            warn!("version: Stored version unreadable ({}), treating as first boot", e);
            VersionChange::FirstBoot
        }
        Some(Ok(previous)) => match current.cmp(&previous) {
            Ordering::Equal => VersionChange::Same,
            Ordering::Greater => VersionChange::Upgraded { from: previous },
            Ordering::Less => VersionChange::Downgraded { from: previous },
        },
    };

    match &change {
        VersionChange::FirstBoot => info!("version: First boot of {}", current),
        VersionChange::Same => info!("version: Running {} (built {})", current, BUILD_TIMESTAMP),
        VersionChange::Upgraded { from } => info!("version: Upgraded {} -> {}", from, current),
        VersionChange::Downgraded { from } => warn!("version: Downgraded {} -> {}", from, current),
    }

    if change != VersionChange::Same {
        store
            .set_str(VERSION_KEY, &current.to_string())
            .context("Failed to store firmware version")?;
    }
    Ok(change)
}
