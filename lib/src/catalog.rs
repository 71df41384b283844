// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The catalog of known libgpiod sonames and the generation each belongs
//! to, plus the directories searched for them.

use super::DriverVersion;

/// The directories scanned for installed libgpiod libraries.
pub const SEARCH_ROOTS: [&str; 3] = ["/lib", "/usr/lib", "/usr/local/lib"];

/// The filename prefix a candidate library must start with.
pub const LIBRARY_PREFIX: &str = "libgpiod.so";

/// The known sonames, each paired with the generation it implements.
///
/// Ordered oldest to newest. Matching is by identity; a file matches the
/// first identity its name contains.
pub const CATALOG: [(&str, DriverVersion); 4] = [
    ("libgpiod.so.0", DriverVersion::V1),
    ("libgpiod.so.1", DriverVersion::V1),
    ("libgpiod.so.2", DriverVersion::V1),
    ("libgpiod.so.3", DriverVersion::V2),
];

/// The generation implemented by a catalog identity, if any.
pub fn generation_for(identity: &str) -> Option<DriverVersion> {
    CATALOG
        .iter()
        .find(|(id, _)| *id == identity)
        .map(|(_, v)| *v)
}

/// The catalog identity contained in a filename, if any.
///
/// `libgpiod.so.2.2.1` matches `libgpiod.so.2`.
pub fn identity_in(file_name: &str) -> Option<(&'static str, DriverVersion)> {
    CATALOG
        .iter()
        .find(|(id, _)| file_name.contains(id))
        .map(|(id, v)| (*id, *v))
}

/// The identities that satisfy a given driver version.
pub fn required_libraries(version: DriverVersion) -> Vec<&'static str> {
    CATALOG
        .iter()
        .filter(|(_, v)| *v == version)
        .map(|(id, _)| *id)
        .collect()
}

/// Every identity the catalog recognizes.
pub fn recognized_libraries() -> Vec<&'static str> {
    CATALOG.iter().map(|(id, _)| *id).collect()
}
