// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Decides which libgpiod generation to drive, from the libraries
//! installed on the system and an optional override.

use super::{catalog, DriverVersion, Error, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

/// The environment variable overriding the automatic version selection.
///
/// Set to `V1` or `V2`. Any other non-empty value is an error, as is a
/// named version whose library is not installed.
pub const VERSION_OVERRIDE_ENV: &str = "DOTNET_IOT_LIBGPIOD_DRIVER_VERSION";

/// A recognized library found on the system.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstalledLibrary {
    /// The catalog identity the file matched.
    pub identity: &'static str,
    /// The generation the library implements.
    pub version: DriverVersion,
    /// The file that matched.
    pub path: PathBuf,
}

enum OverrideSource {
    /// Read [`VERSION_OVERRIDE_ENV`] at resolution time.
    Env,
    /// A fixed value standing in for the environment.
    Fixed(Option<String>),
}

/// Scans for installed libgpiod libraries and selects the generation to
/// drive.
///
/// Scan and selection results are computed once and cached, so a resolver
/// answers the same way for its whole lifetime even if libraries are
/// installed or removed underneath it.
pub struct Resolver {
    roots: Vec<PathBuf>,
    source: OverrideSource,
    installed: OnceLock<Vec<InstalledLibrary>>,
    selection: OnceLock<Result<DriverVersion>>,
}

impl Default for Resolver {
    fn default() -> Resolver {
        Resolver::new()
    }
}

impl Resolver {
    /// A resolver scanning the standard library directories and honoring
    /// the environment override.
    pub fn new() -> Resolver {
        Resolver {
            roots: catalog::SEARCH_ROOTS.iter().map(PathBuf::from).collect(),
            source: OverrideSource::Env,
            installed: OnceLock::new(),
            selection: OnceLock::new(),
        }
    }

    /// A resolver scanning the given directories instead of the standard
    /// ones.
    pub fn with_roots<P: Into<PathBuf>>(roots: impl IntoIterator<Item = P>) -> Resolver {
        Resolver {
            roots: roots.into_iter().map(Into::into).collect(),
            source: OverrideSource::Env,
            installed: OnceLock::new(),
            selection: OnceLock::new(),
        }
    }

    /// Replace the environment override with a fixed value.
    ///
    /// `None` behaves as an unset variable.
    pub fn with_override(mut self, value: Option<&str>) -> Resolver {
        self.source = OverrideSource::Fixed(value.map(String::from));
        self
    }

    fn roots_for_display(&self) -> Vec<String> {
        self.roots
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    /// The recognized libraries installed under the search roots.
    ///
    /// One entry per catalog identity, even when several files match it.
    /// Scanned once; later calls return the cached result.
    pub fn installed_libraries(&self) -> &[InstalledLibrary] {
        self.installed.get_or_init(|| {
            let mut found: Vec<InstalledLibrary> = Vec::new();
            for root in &self.roots {
                let entries = match fs::read_dir(root) {
                    Ok(entries) => entries,
                    Err(e) => {
                        log::debug!("skipping {}: {}", root.display(), e);
                        continue;
                    }
                };
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if !name.starts_with(catalog::LIBRARY_PREFIX) {
                        continue;
                    }
                    if let Some((identity, version)) = catalog::identity_in(&name) {
                        if found.iter().any(|f| f.identity == identity) {
                            continue;
                        }
                        log::debug!(
                            "found {} ({}) at {}",
                            identity,
                            version,
                            entry.path().display()
                        );
                        found.push(InstalledLibrary {
                            identity,
                            version,
                            path: entry.path(),
                        });
                    }
                }
            }
            found
        })
    }

    /// The generations with at least one library installed, oldest first.
    pub fn driver_candidates(&self) -> Vec<DriverVersion> {
        let mut candidates: Vec<DriverVersion> = self
            .installed_libraries()
            .iter()
            .map(|l| l.version)
            .collect();
        candidates.sort();
        candidates.dedup();
        candidates
    }

    /// The newest installed generation.
    pub fn automatic_selection(&self) -> Result<DriverVersion> {
        self.driver_candidates()
            .into_iter()
            .max()
            .ok_or_else(|| Error::NoLibraryFound {
                roots: self.roots_for_display(),
                recognized: catalog::recognized_libraries(),
            })
    }

    /// The generation named by the override, if one is set.
    ///
    /// An empty or unset override selects nothing. A named generation must
    /// have its library installed.
    pub fn override_selection(&self) -> Result<Option<DriverVersion>> {
        let value = match &self.source {
            OverrideSource::Env => std::env::var(VERSION_OVERRIDE_ENV).ok(),
            OverrideSource::Fixed(v) => v.clone(),
        };
        let value = match value {
            Some(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let version: DriverVersion = value.parse()?;
        if !self.driver_candidates().contains(&version) {
            return Err(self.not_installed(version));
        }
        Ok(Some(version))
    }

    /// The error describing a generation whose library is not installed.
    pub(crate) fn not_installed(&self, version: DriverVersion) -> Error {
        Error::LibraryNotInstalled {
            version,
            required: catalog::required_libraries(version),
            installed: self
                .installed_libraries()
                .iter()
                .map(|l| l.identity.to_string())
                .collect(),
            roots: self.roots_for_display(),
        }
    }

    /// The generation to drive: the override when set, otherwise the
    /// newest installed.
    ///
    /// Decided once; later calls return the cached result.
    pub fn resolve(&self) -> Result<DriverVersion> {
        self.selection
            .get_or_init(|| {
                let selected = match self.override_selection()? {
                    Some(version) => {
                        log::info!("driver version {} selected by override", version);
                        version
                    }
                    None => {
                        let version = self.automatic_selection()?;
                        log::info!("driver version {} selected automatically", version);
                        version
                    }
                };
                Ok(selected)
            })
            .clone()
    }

    /// The installed library file backing a generation.
    pub fn library_for(&self, version: DriverVersion) -> Option<&InstalledLibrary> {
        self.installed_libraries()
            .iter()
            .find(|l| l.version == version)
    }
}
