//! Parsers for the text payloads returned by the bridge and by device
//! shell commands.
//!
//! All parsers are lenient: lines they do not understand are skipped rather
//! than turned into errors, because the bridge and Android builds vary in the
//! noise they print around the data we care about.

use crate::domain::device::{DeviceRecord, DeviceStatus, ForwardRule};
use crate::domain::package::{InstalledPackage, PackageManifest};

/// Parses a `host:devices` / `host:track-devices` payload.
///
/// Each line is `serial<TAB>status`.  Lines without a tab are skipped.
pub fn parse_device_table(payload: &str) -> Vec<DeviceRecord> {
    payload
        .lines()
        .filter_map(|line| {
            let (serial, status) = line.trim().split_once('\t')?;
            if serial.is_empty() {
                return None;
            }
            Some(DeviceRecord::new(serial, DeviceStatus::from_wire(status)))
        })
        .collect()
}

/// Parses a `host:list-forward` payload.
///
/// Each line is `serial local remote`.  Lines that do not split into exactly
/// three whitespace-separated fields are skipped.
pub fn parse_forward_list(payload: &str) -> Vec<ForwardRule> {
    payload
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [serial, local, remote] => Some(ForwardRule {
                    serial: serial.to_string(),
                    local: local.to_string(),
                    remote: remote.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Splits an ABI list property (`ro.product.cpu.abilist`), falling back to
/// the primary ABI when the list is empty.
pub fn parse_abi_list(abilist: &str, primary: &str) -> Vec<String> {
    let list = abilist.trim();
    let source = if list.is_empty() { primary.trim() } else { list };
    source
        .split(',')
        .map(str::trim)
        .filter(|abi| !abi.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extracts the installed version from `dumpsys package <name>` output.
///
/// Returns `None` when the package is not installed (no `versionCode=` /
/// `versionName=` entries).
pub fn parse_dumpsys_package(output: &str) -> Option<InstalledPackage> {
    let mut version_code = None;
    let mut version_name = None;
    for token in output.split_whitespace() {
        if version_code.is_none() {
            if let Some(code) = token.strip_prefix("versionCode=") {
                version_code = Some(code.to_string());
            }
        }
        if version_name.is_none() {
            if let Some(name) = token.strip_prefix("versionName=") {
                version_name = Some(name.to_string());
            }
        }
    }
    Some(InstalledPackage {
        version_code: version_code?,
        version_name: version_name?,
    })
}

/// Extracts the manifest identity from `aapt dump badging <apk>` output.
///
/// The relevant line looks like
/// `package: name='com.example' versionCode='25' versionName='2.3.3' ...`.
pub fn parse_badging(output: &str) -> Option<PackageManifest> {
    let line = output.lines().find(|l| l.starts_with("package:"))?;
    Some(PackageManifest {
        package_name: quoted_attr(line, "name")?,
        version_code: quoted_attr(line, "versionCode")?,
        version_name: quoted_attr(line, "versionName").unwrap_or_default(),
    })
}

fn quoted_attr(line: &str, key: &str) -> Option<String> {
    let needle = format!(" {key}='");
    let start = line.find(&needle)? + needle.len();
    let rest = &line[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
