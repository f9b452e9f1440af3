use crate::apk::installed::InstalledPackage;
use crate::constants::TOOL_NAME;
use serde::{Deserialize, Serialize};

const NOASSERTION: &str = "NOASSERTION";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub spdx_version: String,
    pub data_license: String,
    #[serde(rename = "SPDXID")]
    pub spdx_id: String,
    pub name: String,
    pub document_namespace: String,
    pub creation_info: CreationInfo,
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationInfo {
    pub created: String,
    pub creators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(rename = "SPDXID")]
    pub spdx_id: String,
    pub name: String,
    pub version_info: String,
    pub download_location: String,
    pub license_concluded: String,
    pub license_declared: String,
    pub copyright_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    pub external_refs: Vec<ExternalRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRef {
    pub reference_category: String,
    pub reference_type: String,
    pub reference_locator: String,
}

/// SPDX identifiers allow letters, digits, `.` and `-` only.
pub fn spdx_ref(prefix: &str, name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    format!("SPDXRef-{}-{}", prefix, cleaned)
}

pub fn purl(pkg: &InstalledPackage, arch: &str) -> String {
    let arch = pkg.arch.as_deref().unwrap_or(arch);
    format!("pkg:apk/alpine/{}@{}?arch={}", pkg.name, pkg.version, arch)
}

impl Package {
    pub fn from_installed(pkg: &InstalledPackage, arch: &str) -> Self {
        let license = pkg.license.clone().unwrap_or_else(|| NOASSERTION.to_string());
        Self {
            spdx_id: spdx_ref("Package", &pkg.name),
            name: pkg.name.clone(),
            version_info: pkg.version.clone(),
            download_location: NOASSERTION.to_string(),
            license_concluded: license.clone(),
            license_declared: license,
            copyright_text: NOASSERTION.to_string(),
            description: pkg.description.clone(),
            homepage: pkg.url.clone(),
            external_refs: vec![ExternalRef {
                reference_category: "PACKAGE_MANAGER".to_string(),
                reference_type: "purl".to_string(),
                reference_locator: purl(pkg, arch),
            }],
        }
    }
}

impl Document {
    /// Build a document whose bytes depend only on the inputs.
    pub fn new(name: &str, namespace_digest: &str, created: String, mut packages: Vec<Package>) -> Self {
        packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version_info.cmp(&b.version_info)));
        Self {
            spdx_version: "SPDX-2.2".to_string(),
            data_license: "CC0-1.0".to_string(),
            spdx_id: "SPDXRef-DOCUMENT".to_string(),
            name: name.to_string(),
            document_namespace: format!("https://spdx.org/spdxdocs/{}/{}", TOOL_NAME, namespace_digest),
            creation_info: CreationInfo {
                created,
                creators: vec![format!("Tool: {}-{}", TOOL_NAME, env!("CARGO_PKG_VERSION"))],
            },
            packages,
        }
    }
}
