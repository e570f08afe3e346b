//! Application package metadata.
//!
//! Provisioning decides whether an application must be (re)installed by
//! comparing the manifest of the bundled package file with what the device
//! reports for the installed package.

/// Identity and version of an Android application package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub package_name: String,
    pub version_code: String,
    pub version_name: String,
}

/// Version of a package as installed on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub version_code: String,
    pub version_name: String,
}

impl PackageManifest {
    /// Returns `true` when `installed` has the same version code *and* name.
    pub fn matches(&self, installed: &InstalledPackage) -> bool {
        self.version_code == installed.version_code && self.version_name == installed.version_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> PackageManifest {
        PackageManifest {
            package_name: "com.github.uiautomator".into(),
            version_code: "25".into(),
            version_name: "2.3.3".into(),
        }
    }

    #[test]
    fn test_matches_requires_both_fields() {
        let m = manifest();
        assert!(m.matches(&InstalledPackage {
            version_code: "25".into(),
            version_name: "2.3.3".into(),
        }));
        assert!(!m.matches(&InstalledPackage {
            version_code: "25".into(),
            version_name: "2.3.2".into(),
        }));
        assert!(!m.matches(&InstalledPackage {
            version_code: "24".into(),
            version_name: "2.3.3".into(),
        }));
    }
}
