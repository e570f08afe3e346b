//! What gets pushed to a device, and where.
//!
//! Provisioning needs three helper binaries from the STF bundle (screen
//! capture library and binary, touch injector), chosen by the device's
//! primary ABI and SDK level, plus the on-device agent from the agent bundle,
//! chosen by the first supported entry of the device's ABI list.

use std::path::PathBuf;

use crate::domain::config::ProvisioningSection;
use crate::infrastructure::artifacts::Bundle;

/// Agent build for each supported ABI.  64-bit ARM devices run the 32-bit
/// build.
const AGENT_ARTIFACTS: &[(&str, &str)] = &[
    ("armeabi-v7a", "atx-agent-armv7"),
    ("arm64-v8a", "atx-agent-armv7"),
    ("armeabi", "atx-agent-armv6"),
    ("x86", "atx-agent-386"),
];

/// Architecture facts read from the device's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAbi {
    /// `ro.product.cpu.abi`
    pub abi: String,
    /// `ro.product.cpu.abilist`, or just `abi` when the list is empty.
    pub abis: Vec<String>,
    /// `ro.build.version.sdk`
    pub sdk: String,
}

/// One file to place on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpec {
    pub bundle: Bundle,
    /// Entry name inside the bundle.
    pub entry: String,
    /// Absolute path on the device.
    pub dest: String,
    pub mode: u32,
}

/// Returns the agent artifact for the first ABI in `abis` that has one.
pub fn agent_artifact(abis: &[String]) -> Option<&'static str> {
    abis.iter().find_map(|abi| {
        AGENT_ARTIFACTS
            .iter()
            .find(|(supported, _)| *supported == abi.as_str())
            .map(|(_, artifact)| *artifact)
    })
}

/// Device-independent provisioning settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningPlan {
    pub stf_prefix: String,
    pub agent_path: String,
    pub agent_port: u16,
    pub input_port: u16,
    pub apks: Vec<PathBuf>,
}

impl ProvisioningPlan {
    pub fn from_config(section: &ProvisioningSection) -> Self {
        Self {
            stf_prefix: section.stf_prefix.clone(),
            agent_path: section.agent_path.clone(),
            agent_port: section.agent_port,
            input_port: section.input_port,
            apks: section.apks.clone(),
        }
    }

    /// The binaries for `device`, or `None` when no agent build supports any
    /// of its ABIs.
    pub fn binaries(&self, device: &DeviceAbi) -> Option<Vec<BinarySpec>> {
        let agent = agent_artifact(&device.abis)?;
        let prefix = &self.stf_prefix;
        let abi = &device.abi;
        let sdk = &device.sdk;

        Some(vec![
            BinarySpec {
                bundle: Bundle::Stf,
                entry: format!("{prefix}minicap-prebuilt/prebuilt/{abi}/lib/android-{sdk}/minicap.so"),
                dest: "/data/local/tmp/minicap.so".to_string(),
                mode: 0o644,
            },
            BinarySpec {
                bundle: Bundle::Stf,
                entry: format!("{prefix}minicap-prebuilt/prebuilt/{abi}/bin/minicap"),
                dest: "/data/local/tmp/minicap".to_string(),
                mode: 0o755,
            },
            BinarySpec {
                bundle: Bundle::Stf,
                entry: format!("{prefix}minitouch-prebuilt/prebuilt/{abi}/bin/minitouch"),
                dest: "/data/local/tmp/minitouch".to_string(),
                mode: 0o755,
            },
            BinarySpec {
                bundle: Bundle::Agent,
                entry: agent.to_string(),
                dest: self.agent_path.clone(),
                mode: 0o755,
            },
        ])
    }

    pub fn agent_stop_command(&self) -> String {
        format!("{} server --stop", self.agent_path)
    }

    pub fn agent_start_command(&self) -> String {
        format!("{} server --nouia -d", self.agent_path)
    }
}

impl Default for ProvisioningPlan {
    fn default() -> Self {
        Self::from_config(&ProvisioningSection::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
