use crate::config::ImageConfiguration;
use crate::constants::{DEFAULT_PATH, S6_SVSCAN, SUPERVISION_DIR, TOOL_NAME};
use crate::export::layer::LayerInfo;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct OCIConfig {
    pub created: String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub os: String,
    pub config: OCIImageConfig,
    pub rootfs: OCIRootFS,
    pub history: Vec<OCIHistory>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OCIImageConfig {
    #[serde(rename = "User", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "Env")]
    pub env: Vec<String>,
    #[serde(rename = "Entrypoint", skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(rename = "Labels", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OCIRootFS {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OCIHistory {
    pub created: String,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

/// Map an apk architecture to OCI `(architecture, variant)`.
pub fn oci_platform(arch: &str) -> (String, Option<String>) {
    let (name, variant) = match arch {
        "x86_64" => ("amd64", None),
        "aarch64" => ("arm64", None),
        "armv7" => ("arm", Some("v7")),
        "armhf" => ("arm", Some("v6")),
        "x86" => ("386", None),
        other => (other, None),
    };
    (name.to_string(), variant.map(str::to_string))
}

fn split_command(command: &str) -> Option<Vec<String>> {
    let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

fn entrypoint(config: &ImageConfiguration) -> Option<Vec<String>> {
    if config.entrypoint.is_service_bundle() {
        return Some(vec![S6_SVSCAN.to_string(), format!("/{}", SUPERVISION_DIR)]);
    }
    config.entrypoint.command.as_deref().and_then(split_command)
}

fn environment(config: &ImageConfiguration) -> Vec<String> {
    let mut env = Vec::with_capacity(config.environment.len() + 1);
    if !config.environment.contains_key("PATH") {
        env.push(format!("PATH={}", DEFAULT_PATH));
    }
    env.extend(config.environment.iter().map(|(k, v)| format!("{}={}", k, v)));
    env
}

pub fn create_config(
    config: &ImageConfiguration,
    layer: &LayerInfo,
    arch: &str,
    build_date: DateTime<Utc>,
) -> OCIConfig {
    let created = build_date.to_rfc3339_opts(SecondsFormat::Secs, true);
    let (architecture, variant) = oci_platform(arch);

    OCIConfig {
        created: created.clone(),
        architecture,
        variant,
        os: "linux".to_string(),
        config: OCIImageConfig {
            user: config.accounts.run_as.clone(),
            env: environment(config),
            entrypoint: entrypoint(config),
            cmd: config.cmd.as_deref().and_then(split_command),
            working_dir: config.work_dir.clone(),
            labels: config.annotations.clone(),
        },
        rootfs: OCIRootFS {
            fs_type: "layers".to_string(),
            diff_ids: vec![layer.diff_id.clone()],
        },
        history: vec![OCIHistory {
            created,
            created_by: format!("{} {}", TOOL_NAME, env!("CARGO_PKG_VERSION")),
            empty_layer: None,
        }],
    }
}
