// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A library for accessing GPIO lines on Linux platforms through
//! libgpiod, without linking any particular libgpiod at build time.
//!
//! Two ABI-incompatible generations of libgpiod exist in the wild. The
//! [`Resolver`] scans the well known library directories for the sonames
//! of either generation and decides which [`DriverVersion`] to use, the
//! newest installed by default, or the one named by the
//! [`VERSION_OVERRIDE_ENV`](resolver::VERSION_OVERRIDE_ENV) environment
//! variable. The [`DriverFactory`] then loads the matching library and
//! constructs a [`LineDriver`] for a chip.
//!
//! Line values are read and written synchronously through the driver.
//! Edge events are delivered asynchronously: subscribing a handler to a
//! line arms a background observer that waits on the native request in
//! bounded slices and dispatches events, so subscribing and unsubscribing
//! stay responsive while a wait is in flight.

/// Types and loading for the dynamically loaded native layer.
pub use gpiod_dyn_dl as dl;

pub mod catalog;
pub mod driver;
pub mod events;
pub mod factory;
pub mod handle;
pub mod line;
pub mod resolver;

pub use crate::driver::LineDriver;
pub use crate::factory::DriverFactory;
pub use crate::handle::NativeHandle;
pub use crate::resolver::Resolver;

use std::fmt;
use std::str::FromStr;

/// The generation of the libgpiod API a driver speaks.
///
/// Ordered by recency, so the newest installed generation is the maximum
/// of the candidates.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DriverVersion {
    /// libgpiod v1, shipped as `libgpiod.so.0`, `.so.1` and `.so.2`.
    V1,
    /// libgpiod v2, shipped as `libgpiod.so.3`.
    V2,
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverVersion::V1 => write!(f, "V1"),
            DriverVersion::V2 => write!(f, "V2"),
        }
    }
}

impl FromStr for DriverVersion {
    type Err = Error;

    // Matching is case sensitive; "v2" is not a valid override value.
    fn from_str(s: &str) -> Result<DriverVersion> {
        match s {
            "V1" => Ok(DriverVersion::V1),
            "V2" => Ok(DriverVersion::V2),
            _ => Err(Error::InvalidVersionOverride { value: s.into() }),
        }
    }
}

/// Errors returned when resolving, constructing or driving lines.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The driver version override does not name a known generation.
    #[error("unrecognized driver version {value:?}, valid values are V1, V2")]
    InvalidVersionOverride { value: String },

    /// No recognized libgpiod library is installed.
    #[error(
        "no libgpiod library found under {} (looked for {})",
        roots.join(", "),
        recognized.join(", ")
    )]
    NoLibraryFound {
        roots: Vec<String>,
        recognized: Vec<&'static str>,
    },

    /// The requested generation's library is not installed.
    #[error(
        "libgpiod for driver version {version} is not installed: needs one of {} but found {} under {}",
        required.join(", "),
        if installed.is_empty() { "none".to_string() } else { installed.join(", ") },
        roots.join(", ")
    )]
    LibraryNotInstalled {
        version: DriverVersion,
        required: Vec<&'static str>,
        installed: Vec<String>,
        roots: Vec<String>,
    },

    /// The operation is not available on this driver generation.
    #[error("{operation} is not supported by the {version} driver")]
    Unsupported {
        version: DriverVersion,
        operation: &'static str,
    },

    /// An argument does not satisfy the operation's requirements.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The edge observer could not be started.
    #[error("failed to start edge observer: {0}")]
    Observer(String),

    /// An error from the native layer.
    #[error(transparent)]
    Ffi(#[from] dl::Error),
}

/// The result of operations on chips, lines and resolvers.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    mod driver_version {
        use super::*;

        #[test]
        fn ordering() {
            assert!(DriverVersion::V1 < DriverVersion::V2);
            assert_eq!(
                [DriverVersion::V1, DriverVersion::V2].into_iter().max(),
                Some(DriverVersion::V2)
            );
        }

        #[test]
        fn parse() {
            assert_eq!("V1".parse::<DriverVersion>().unwrap(), DriverVersion::V1);
            assert_eq!("V2".parse::<DriverVersion>().unwrap(), DriverVersion::V2);
        }

        #[test]
        fn parse_is_case_sensitive() {
            assert!("v2".parse::<DriverVersion>().is_err());
            assert!(" V1".parse::<DriverVersion>().is_err());
        }

        #[test]
        fn parse_unrecognized() {
            let e = "V3".parse::<DriverVersion>().unwrap_err();
            assert_eq!(
                e,
                Error::InvalidVersionOverride {
                    value: "V3".into()
                }
            );
            let msg = e.to_string();
            assert!(msg.contains("V3"));
            assert!(msg.contains("V1, V2"));
        }

        #[test]
        fn display() {
            assert_eq!(DriverVersion::V1.to_string(), "V1");
            assert_eq!(DriverVersion::V2.to_string(), "V2");
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn no_library_found_names_all_roots() {
            let e = Error::NoLibraryFound {
                roots: vec!["/lib".into(), "/usr/lib".into(), "/usr/local/lib".into()],
                recognized: vec!["libgpiod.so.3"],
            };
            let msg = e.to_string();
            assert!(msg.contains("/lib"));
            assert!(msg.contains("/usr/lib"));
            assert!(msg.contains("/usr/local/lib"));
            assert!(msg.contains("libgpiod.so.3"));
        }

        #[test]
        fn library_not_installed_names_found() {
            let e = Error::LibraryNotInstalled {
                version: DriverVersion::V2,
                required: vec!["libgpiod.so.3"],
                installed: vec!["libgpiod.so.2".into()],
                roots: vec!["/lib".into()],
            };
            let msg = e.to_string();
            assert!(msg.contains("V2"));
            assert!(msg.contains("libgpiod.so.3"));
            assert!(msg.contains("libgpiod.so.2"));
        }

        #[test]
        fn library_not_installed_none_found() {
            let e = Error::LibraryNotInstalled {
                version: DriverVersion::V1,
                required: vec!["libgpiod.so.0", "libgpiod.so.1", "libgpiod.so.2"],
                installed: vec![],
                roots: vec!["/lib".into()],
            };
            assert!(e.to_string().contains("found none"));
        }
    }
}
