// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Constructs the line driver matching the resolved libgpiod generation.

use super::dl::{v1::V1Lib, v2::V2Lib, V1Api, V2Api};
use super::driver::{LineDriver, V1Driver, V2Driver};
use super::events::{ObserverConfig, ObserverFactory};
use super::resolver::{InstalledLibrary, Resolver};
use super::{DriverVersion, Result};
use std::sync::Arc;

/// Produces the per-generation API from an installed library.
///
/// The production loader opens the library file; tests substitute fakes
/// so driver construction and selection are exercised without libgpiod
/// installed.
pub trait ApiLoader: Send + Sync {
    fn load_v1(&self, library: &InstalledLibrary) -> Result<Arc<dyn V1Api>>;

    fn load_v2(&self, library: &InstalledLibrary) -> Result<Arc<dyn V2Api>>;
}

/// Loads the installed library file via the system loader.
#[derive(Debug, Default)]
pub struct DlLoader;

impl ApiLoader for DlLoader {
    fn load_v1(&self, library: &InstalledLibrary) -> Result<Arc<dyn V1Api>> {
        Ok(Arc::new(V1Lib::load(&library.path.to_string_lossy())?))
    }

    fn load_v2(&self, library: &InstalledLibrary) -> Result<Arc<dyn V2Api>> {
        Ok(Arc::new(V2Lib::load(&library.path.to_string_lossy())?))
    }
}

/// Builds line drivers for chips, resolving the libgpiod generation
/// first.
///
/// With default construction the factory scans the standard library
/// directories, honors the environment override, and loads the selected
/// library with `dlopen`. Each piece is substitutable for tests or
/// special deployments.
pub struct DriverFactory {
    resolver: Resolver,
    loader: Arc<dyn ApiLoader>,
    observer_config: ObserverConfig,
    observer_factory: Option<ObserverFactory>,
}

impl Default for DriverFactory {
    fn default() -> DriverFactory {
        DriverFactory::new()
    }
}

impl DriverFactory {
    pub fn new() -> DriverFactory {
        DriverFactory::with_resolver(Resolver::new())
    }

    /// A factory deciding the generation with the given resolver.
    pub fn with_resolver(resolver: Resolver) -> DriverFactory {
        DriverFactory {
            resolver,
            loader: Arc::new(DlLoader),
            observer_config: ObserverConfig::default(),
            observer_factory: None,
        }
    }

    /// Replace the library loader.
    pub fn with_loader(mut self, loader: Arc<dyn ApiLoader>) -> DriverFactory {
        self.loader = loader;
        self
    }

    /// Tune the edge observers of the constructed drivers.
    pub fn with_observer_config(mut self, config: ObserverConfig) -> DriverFactory {
        self.observer_config = config;
        self
    }

    /// Replace how the v2 driver starts its edge observers.
    pub fn with_observer_factory(mut self, factory: ObserverFactory) -> DriverFactory {
        self.observer_factory = Some(factory);
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The generation [`create`](DriverFactory::create) would drive.
    pub fn select_version(&self) -> Result<DriverVersion> {
        self.resolver.resolve()
    }

    /// A driver for the chip at `chip_index`, speaking the resolved
    /// generation.
    pub fn create(&self, chip_index: u32) -> Result<Box<dyn LineDriver>> {
        let version = self.resolver.resolve()?;
        self.build(chip_index, version)
    }

    /// A driver for the chip at `chip_index` speaking the given
    /// generation, regardless of the resolution.
    ///
    /// The generation's library must still be installed.
    pub fn create_for_version(
        &self,
        chip_index: u32,
        version: DriverVersion,
    ) -> Result<Box<dyn LineDriver>> {
        if !self.resolver.driver_candidates().contains(&version) {
            return Err(self.resolver.not_installed(version));
        }
        self.build(chip_index, version)
    }

    fn build(&self, chip_index: u32, version: DriverVersion) -> Result<Box<dyn LineDriver>> {
        let library = self
            .resolver
            .library_for(version)
            .ok_or_else(|| self.resolver.not_installed(version))?;
        log::debug!(
            "loading {} for driver version {}",
            library.path.display(),
            version
        );
        match version {
            DriverVersion::V1 => {
                let api = self.loader.load_v1(library)?;
                Ok(Box::new(V1Driver::new(
                    api,
                    chip_index,
                    self.observer_config,
                )?))
            }
            DriverVersion::V2 => {
                let api = self.loader.load_v2(library)?;
                Ok(Box::new(V2Driver::new(
                    api,
                    chip_index,
                    self.observer_config,
                    self.observer_factory.clone(),
                )?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn create_with_nothing_installed() {
        let dir = tempfile::tempdir().unwrap();
        let factory =
            DriverFactory::with_resolver(Resolver::with_roots([dir.path()]).with_override(None));
        let e = factory.create(0).unwrap_err();
        assert!(matches!(e, Error::NoLibraryFound { .. }));
    }

    #[test]
    fn create_for_missing_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("libgpiod.so.2")).unwrap();
        let factory =
            DriverFactory::with_resolver(Resolver::with_roots([dir.path()]).with_override(None));
        let e = factory.create_for_version(0, DriverVersion::V2).unwrap_err();
        assert!(matches!(
            e,
            Error::LibraryNotInstalled {
                version: DriverVersion::V2,
                ..
            }
        ));
    }

    #[test]
    fn invalid_override_fails_create() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("libgpiod.so.3")).unwrap();
        let factory = DriverFactory::with_resolver(
            Resolver::with_roots([dir.path()]).with_override(Some("V9")),
        );
        let e = factory.create(0).unwrap_err();
        assert!(matches!(e, Error::InvalidVersionOverride { .. }));
    }
}
