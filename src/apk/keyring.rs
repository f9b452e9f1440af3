use anyhow::{bail, Context, Result};
use std::path::Path;

pub fn is_remote(source: &str) -> bool {
    source.starts_with("https://") || source.starts_with("http://")
}

/// File name a key is stored under in `etc/apk/keys`: the last path or URL segment.
pub fn key_file_name(source: &str) -> Result<String> {
    let trimmed = source.split(['?', '#']).next().unwrap_or(source);
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name.to_string()),
        _ => bail!("cannot derive a key file name from {:?}", source),
    }
}

/// Read a signing key from disk (relative to `base_dir`) or download it.
pub async fn fetch_key(client: &reqwest::Client, source: &str, base_dir: &Path) -> Result<Vec<u8>> {
    if is_remote(source) {
        let response = client
            .get(source)
            .send()
            .await
            .with_context(|| format!("failed to fetch key {}", source))?
            .error_for_status()
            .with_context(|| format!("failed to fetch key {}", source))?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read key {}", source))?;
        return Ok(body.to_vec());
    }

    let path = base_dir.join(source);
    tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read key {}", path.display()))
}
