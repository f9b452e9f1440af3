use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declarative description of the image to build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageConfiguration {
    #[serde(default)]
    pub contents: ImageContents,
    #[serde(default)]
    pub entrypoint: ImageEntrypoint,
    /// Default arguments, split on whitespace
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub accounts: ImageAccounts,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// apk architectures the image may be built for; the first one is the default
    #[serde(default)]
    pub archs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageContents {
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Local key files or http(s) URLs
    #[serde(default)]
    pub keyring: Vec<String>,
    /// The declared world
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageEntrypoint {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    /// Service name to command, used by `service-bundle` entrypoints
    #[serde(default)]
    pub services: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageAccounts {
    #[serde(default)]
    pub run_as: Option<String>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct User {
    pub username: String,
    pub uid: u32,
    /// Primary group; defaults to the uid
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Group {
    pub groupname: String,
    pub gid: u32,
    #[serde(default)]
    pub members: Vec<String>,
}

impl User {
    pub fn primary_gid(&self) -> u32 {
        self.gid.unwrap_or(self.uid)
    }

    pub fn home_dir(&self) -> String {
        self.home
            .clone()
            .unwrap_or_else(|| format!("/home/{}", self.username))
    }
}

impl ImageEntrypoint {
    pub fn is_service_bundle(&self) -> bool {
        self.kind.as_deref() == Some(crate::constants::SERVICE_BUNDLE_TYPE)
    }
}
