//! Static mapping from source packages to watched paths and affected services

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{DockhandError, DockhandResult};

#[derive(Debug, Clone)]
struct PackageSpec {
    /// Absolute root of the package's watched subtree
    root: PathBuf,
    services: BTreeSet<String>,
}

/// Lookup table built once per watch session from the configuration.
/// Only packages present in both `package_dir` and `package_services`
/// participate; a package listed in one map but not the other is ignored.
#[derive(Debug, Clone)]
pub struct ServiceMap {
    packages: BTreeMap<String, PackageSpec>,
}

impl ServiceMap {
    pub fn from_config(config: &Config) -> Self {
        let source_root = config.source_root();
        let packages = config
            .package_services
            .iter()
            .filter_map(|(package, services)| {
                let dir = config.package_dir.get(package)?;
                Some((
                    package.clone(),
                    PackageSpec {
                        root: source_root.join(dir),
                        services: services.clone(),
                    },
                ))
            })
            .collect();
        Self { packages }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        entries: impl IntoIterator<Item = (String, PathBuf, BTreeSet<String>)>,
    ) -> Self {
        let packages = entries
            .into_iter()
            .map(|(package, root, services)| (package, PackageSpec { root, services }))
            .collect();
        Self { packages }
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn package_ids(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Services restarted when the given package changes
    pub fn services_for(&self, package: &str) -> DockhandResult<&BTreeSet<String>> {
        self.packages
            .get(package)
            .map(|spec| &spec.services)
            .ok_or_else(|| DockhandError::UnknownPackage {
                name: package.to_string(),
            })
    }

    /// Absolute root of the package's watched subtree
    pub fn path_for(&self, package: &str) -> DockhandResult<&Path> {
        self.packages
            .get(package)
            .map(|spec| spec.root.as_path())
            .ok_or_else(|| DockhandError::UnknownPackage {
                name: package.to_string(),
            })
    }

    /// Package owning the given event path, by deepest matching root
    pub fn package_for_path(&self, path: &Path) -> Option<&str> {
        self.packages
            .iter()
            .filter(|(_, spec)| path.starts_with(&spec.root))
            .max_by_key(|(_, spec)| spec.root.components().count())
            .map(|(package, _)| package.as_str())
    }
}
