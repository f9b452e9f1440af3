//! Reader for apk's installed-package database (`lib/apk/db/installed`).
//!
//! Records are blocks of `K:value` lines separated by blank lines.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub arch: Option<String>,
    pub license: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub origin: Option<String>,
    /// `Q1`-prefixed base64 SHA-1 of the control segment
    pub checksum: Option<String>,
}

pub fn parse_installed(content: &str) -> Vec<InstalledPackage> {
    let mut packages = Vec::new();
    let mut current = InstalledPackage::default();

    for line in content.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !current.name.is_empty() {
                packages.push(std::mem::take(&mut current));
            } else {
                current = InstalledPackage::default();
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.to_string();
        match key {
            "P" => current.name = value,
            "V" => current.version = value,
            "A" => current.arch = Some(value),
            "L" => current.license = Some(value),
            "T" => current.description = Some(value),
            "U" => current.url = Some(value),
            "o" => current.origin = Some(value),
            "C" => current.checksum = Some(value),
            _ => {}
        }
    }

    packages
}
