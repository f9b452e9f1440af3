//! `/etc/passwd` and `/etc/group` records.

use anyhow::{bail, Context, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub password: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl UserEntry {
    pub fn root() -> Self {
        Self {
            name: "root".to_string(),
            password: "x".to_string(),
            uid: 0,
            gid: 0,
            gecos: "root".to_string(),
            home: "/root".to_string(),
            shell: crate::constants::DEFAULT_SHELL.to_string(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 {
            bail!("malformed passwd entry {:?}", line);
        }
        Ok(Self {
            name: fields[0].to_string(),
            password: fields[1].to_string(),
            uid: fields[2].parse().with_context(|| format!("invalid uid in {:?}", line))?,
            gid: fields[3].parse().with_context(|| format!("invalid gid in {:?}", line))?,
            gecos: fields[4].to_string(),
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        })
    }
}

impl fmt::Display for UserEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.name, self.password, self.uid, self.gid, self.gecos, self.home, self.shell
        )
    }
}

impl GroupEntry {
    pub fn root() -> Self {
        Self {
            name: "root".to_string(),
            password: "x".to_string(),
            gid: 0,
            members: vec!["root".to_string()],
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 4 {
            bail!("malformed group entry {:?}", line);
        }
        Ok(Self {
            name: fields[0].to_string(),
            password: fields[1].to_string(),
            gid: fields[2].parse().with_context(|| format!("invalid gid in {:?}", line))?,
            members: fields[3]
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

impl fmt::Display for GroupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.name, self.password, self.gid, self.members.join(","))
    }
}

/// Parse a file of entries, skipping blank lines and comments.
pub fn parse_all<T>(content: &str, parse: fn(&str) -> Result<T>) -> Result<Vec<T>> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(parse)
        .collect()
}

pub fn render_all<T: fmt::Display>(entries: &[T]) -> String {
    entries.iter().map(|e| format!("{}\n", e)).collect()
}
