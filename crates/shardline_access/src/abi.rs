//! ABI versions and negotiation.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::error::{NoCommonVersionError, VersionError};

/// A wire-format revision.
///
/// Variants are declared oldest first, so the derived ordering is the
/// release order. The two test sentinels bracket the released versions and
/// are never accepted from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AbiVersion {
    /// Older than anything released.
    TestPast,
    /// Base layout: text field keys, paths as joined text.
    Boron,
    /// Paths as segment arrays.
    NeonSr2,
    /// Snapshot-only reads and transaction skipping.
    SodiumSr1,
    /// Compact integer field keys.
    Magnesium,
    /// Newer than anything released.
    TestFuture,
}

impl AbiVersion {
    /// Released versions, oldest first.
    pub const RELEASED: [AbiVersion; 4] =
        [Self::Boron, Self::NeonSr2, Self::SodiumSr1, Self::Magnesium];

    /// The version this build speaks natively.
    pub const fn current() -> Self {
        Self::Magnesium
    }

    /// Wire value.
    pub const fn short_value(self) -> u16 {
        match self {
            Self::TestPast => 0,
            Self::Boron => 5,
            Self::NeonSr2 => 6,
            Self::SodiumSr1 => 7,
            Self::Magnesium => 8,
            Self::TestFuture => 65535,
        }
    }

    /// Resolve a wire value to a released version.
    ///
    /// # Errors
    ///
    /// [`VersionError::Past`] below the oldest released version,
    /// [`VersionError::Future`] above the newest.
    pub fn from_short(value: u16) -> Result<Self, VersionError> {
        match value {
            5 => Ok(Self::Boron),
            6 => Ok(Self::NeonSr2),
            7 => Ok(Self::SodiumSr1),
            8 => Ok(Self::Magnesium),
            v if v < 5 => Err(VersionError::Past(v)),
            v => Err(VersionError::Future(v)),
        }
    }

    /// All released versions as a set.
    pub fn supported() -> BTreeSet<AbiVersion> {
        Self::RELEASED.into_iter().collect()
    }

    /// Whether this is one of the test sentinels.
    pub fn is_test_sentinel(self) -> bool {
        matches!(self, Self::TestPast | Self::TestFuture)
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TestPast => "TEST_PAST_VERSION",
            Self::Boron => "BORON",
            Self::NeonSr2 => "NEON_SR2",
            Self::SodiumSr1 => "SODIUM_SR1",
            Self::Magnesium => "MAGNESIUM",
            Self::TestFuture => "TEST_FUTURE_VERSION",
        };
        f.write_str(name)
    }
}

/// Highest version present in both sets.
///
/// # Errors
///
/// Returns [`NoCommonVersionError`] when the sets are disjoint.
pub fn negotiate(
    local: &BTreeSet<AbiVersion>,
    remote: &BTreeSet<AbiVersion>,
) -> Result<AbiVersion, NoCommonVersionError> {
    let chosen = local.intersection(remote).max().copied();
    debug!(?local, ?remote, ?chosen, "negotiating ABI version");
    chosen.ok_or_else(|| NoCommonVersionError {
        local: local.iter().copied().collect(),
        remote: remote.iter().copied().collect(),
    })
}

/// Highest version in `supported` that lies within `[min, max]`.
///
/// This is how a backend answers a connect request, which carries a range
/// rather than a set.
///
/// # Errors
///
/// Returns [`NoCommonVersionError`] when no supported version falls inside
/// the range.
pub fn negotiate_range(
    min: AbiVersion,
    max: AbiVersion,
    supported: &BTreeSet<AbiVersion>,
) -> Result<AbiVersion, NoCommonVersionError> {
    let offered: BTreeSet<AbiVersion> = AbiVersion::RELEASED
        .into_iter()
        .filter(|v| (min..=max).contains(v))
        .collect();
    negotiate(supported, &offered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use AbiVersion::*;

    fn set(versions: &[AbiVersion]) -> BTreeSet<AbiVersion> {
        versions.iter().copied().collect()
    }

    #[test]
    fn release_order() {
        assert!(TestPast < Boron);
        assert!(Boron < NeonSr2 && NeonSr2 < SodiumSr1 && SodiumSr1 < Magnesium);
        assert!(Magnesium < TestFuture);
        assert_eq!(AbiVersion::current(), Magnesium);
    }

    #[test]
    fn short_values_roundtrip() {
        for version in AbiVersion::RELEASED {
            assert_eq!(AbiVersion::from_short(version.short_value()), Ok(version));
        }
        assert_eq!(AbiVersion::from_short(TestPast.short_value()), Err(VersionError::Past(0)));
        assert_eq!(AbiVersion::from_short(4), Err(VersionError::Past(4)));
        assert_eq!(AbiVersion::from_short(9), Err(VersionError::Future(9)));
        assert_eq!(
            AbiVersion::from_short(TestFuture.short_value()),
            Err(VersionError::Future(65535))
        );
    }

    #[test]
    fn highest_common_wins() {
        assert_eq!(
            negotiate(&set(&[Boron, NeonSr2, SodiumSr1]), &set(&[NeonSr2, SodiumSr1, Magnesium])),
            Ok(SodiumSr1)
        );
        assert_eq!(negotiate(&AbiVersion::supported(), &AbiVersion::supported()), Ok(Magnesium));
    }

    #[test]
    fn disjoint_sets_fail() {
        let err = negotiate(&set(&[Boron]), &set(&[NeonSr2])).unwrap_err();
        assert_eq!(err.local, vec![Boron]);
        assert_eq!(err.remote, vec![NeonSr2]);
        assert!(negotiate(&set(&[]), &AbiVersion::supported()).is_err());
    }

    #[test]
    fn range_negotiation() {
        let backend = set(&[Boron, NeonSr2, SodiumSr1]);
        assert_eq!(negotiate_range(Boron, Magnesium, &backend), Ok(SodiumSr1));
        assert_eq!(negotiate_range(NeonSr2, NeonSr2, &backend), Ok(NeonSr2));
        assert!(negotiate_range(Magnesium, TestFuture, &backend).is_err());
        // sentinels never take part even when inside the range
        assert_eq!(negotiate_range(TestPast, TestFuture, &set(&[TestPast, Boron])), Ok(Boron));
    }

    #[test]
    fn display_names() {
        assert_eq!(Boron.to_string(), "BORON");
        assert_eq!(TestFuture.to_string(), "TEST_FUTURE_VERSION");
    }
}
