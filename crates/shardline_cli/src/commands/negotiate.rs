//! Negotiate command implementation.

use shardline_access::{negotiate, AbiVersion, VersionError};
use std::collections::BTreeSet;

fn version_set(values: &[u16]) -> Result<BTreeSet<AbiVersion>, VersionError> {
    values.iter().map(|&v| AbiVersion::from_short(v)).collect()
}

/// Version two peers with the given wire values would settle on.
pub fn negotiated(local: &[u16], remote: &[u16]) -> Result<AbiVersion, Box<dyn std::error::Error>> {
    let local = version_set(local)?;
    let remote = version_set(remote)?;
    Ok(negotiate(&local, &remote)?)
}

/// Runs the negotiate command.
pub fn run(local: &[u16], remote: &[u16]) -> Result<(), Box<dyn std::error::Error>> {
    let version = negotiated(local, remote)?;
    println!("{version} ({})", version.short_value());
    Ok(())
}
