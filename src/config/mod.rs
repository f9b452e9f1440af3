//! Image configuration: YAML loading and structural validation.
//!
//! A configuration must pass [`ImageConfiguration::validate`] before the
//! pipeline touches the workspace. Every stage treats it as read-only.

mod types;

pub use types::{Group, ImageAccounts, ImageConfiguration, ImageContents, ImageEntrypoint, User};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration declares no packages")]
    EmptyWorld,

    #[error("invalid package specification {0:?}")]
    InvalidPackage(String),

    #[error("invalid repository entry {0:?}")]
    InvalidRepository(String),

    #[error("invalid account name {0:?}")]
    InvalidAccountName(String),

    #[error("user {user:?} has invalid home directory {home:?}: expected a normalized absolute path")]
    InvalidHome { user: String, home: String },

    #[error("user {user:?} has invalid shell {shell:?}: expected an absolute path")]
    InvalidShell { user: String, shell: String },

    #[error("user {0:?} is declared more than once")]
    DuplicateUser(String),

    #[error("uid {0} is assigned to more than one user")]
    DuplicateUid(u32),

    #[error("group {0:?} is declared more than once")]
    DuplicateGroup(String),

    #[error("gid {0} is assigned to more than one group")]
    DuplicateGid(u32),

    #[error("run-as {0:?} is neither a numeric id nor a declared user")]
    UnknownRunAs(String),

    #[error("service-bundle entrypoint declares no services")]
    EmptyServiceBundle,

    #[error("services are declared but the entrypoint type is not service-bundle")]
    ServicesWithoutBundle,

    #[error("invalid service name {0:?}")]
    InvalidServiceName(String),

    #[error("invalid environment variable name {0:?}")]
    InvalidEnvironment(String),

    #[error("annotation keys must not be empty")]
    InvalidAnnotation,

    #[error("work-dir {0:?} must be an absolute path")]
    RelativeWorkDir(String),

    #[error("invalid build date {value:?}: expected epoch seconds or RFC 3339")]
    InvalidBuildDate { value: String },

    #[error(transparent)]
    Other(anyhow::Error),
}

impl ImageConfiguration {
    /// Load and parse a YAML configuration file. Validation is separate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Check that the configuration is non-empty and internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_contents()?;
        self.validate_accounts()?;
        self.validate_entrypoint()?;

        for key in self.environment.keys() {
            if key.is_empty() || key.contains('=') || key.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidEnvironment(key.clone()));
            }
        }

        if self.annotations.keys().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidAnnotation);
        }

        if let Some(dir) = &self.work_dir {
            if !dir.starts_with('/') {
                return Err(ConfigError::RelativeWorkDir(dir.clone()));
            }
        }

        Ok(())
    }

    fn validate_contents(&self) -> Result<(), ConfigError> {
        if self.contents.packages.is_empty() {
            return Err(ConfigError::EmptyWorld);
        }

        for pkg in &self.contents.packages {
            if pkg.trim().is_empty() || pkg.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidPackage(pkg.clone()));
            }
        }

        for repo in &self.contents.repositories {
            if repo.trim().is_empty() || repo.contains('\n') {
                return Err(ConfigError::InvalidRepository(repo.clone()));
            }
        }

        Ok(())
    }

    fn validate_accounts(&self) -> Result<(), ConfigError> {
        let accounts = &self.accounts;

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for group in &accounts.groups {
            check_account_name(&group.groupname)?;
            if !names.insert(group.groupname.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.groupname.clone()));
            }
            if !ids.insert(group.gid) {
                return Err(ConfigError::DuplicateGid(group.gid));
            }
            for member in &group.members {
                check_account_name(member)?;
            }
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for user in &accounts.users {
            check_account_name(&user.username)?;
            if !names.insert(user.username.as_str()) {
                return Err(ConfigError::DuplicateUser(user.username.clone()));
            }
            if !ids.insert(user.uid) {
                return Err(ConfigError::DuplicateUid(user.uid));
            }
            if let Some(home) = &user.home {
                if !is_passwd_path(home) {
                    return Err(ConfigError::InvalidHome {
                        user: user.username.clone(),
                        home: home.clone(),
                    });
                }
            }
            if let Some(shell) = &user.shell {
                if !is_passwd_path(shell) {
                    return Err(ConfigError::InvalidShell {
                        user: user.username.clone(),
                        shell: shell.clone(),
                    });
                }
            }
        }

        if let Some(run_as) = &accounts.run_as {
            let numeric = !run_as.is_empty() && run_as.chars().all(|c| c.is_ascii_digit());
            if !numeric && run_as != "root" && !names.contains(run_as.as_str()) {
                return Err(ConfigError::UnknownRunAs(run_as.clone()));
            }
        }

        Ok(())
    }

    fn validate_entrypoint(&self) -> Result<(), ConfigError> {
        let entrypoint = &self.entrypoint;

        if entrypoint.is_service_bundle() {
            if entrypoint.services.is_empty() {
                return Err(ConfigError::EmptyServiceBundle);
            }
        } else if !entrypoint.services.is_empty() {
            return Err(ConfigError::ServicesWithoutBundle);
        }

        for name in entrypoint.services.keys() {
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(ConfigError::InvalidServiceName(name.clone()));
            }
        }

        Ok(())
    }
}

fn check_account_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains(':') || name.contains(',') || name.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidAccountName(name.to_string()));
    }
    Ok(())
}

/// An absolute path without `.`/`..` segments that fits in one passwd field.
fn is_passwd_path(value: &str) -> bool {
    value.starts_with('/')
        && !value.contains(|c: char| c == ':' || c.is_control())
        && value.split('/').all(|segment| segment != "." && segment != "..")
}
