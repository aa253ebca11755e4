//! Aliases for A2A agents that are not managed by synapse.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    a2a_client::A2aClient,
    helpers::{read_json_file, write_json_atomic},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAgent {
    pub alias: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

fn valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub struct ExternalRegistry {
    dir: PathBuf,
}

impl ExternalRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{}.json", alias.to_ascii_lowercase()))
    }

    pub fn add(&self, agent: &ExternalAgent) -> Result<()> {
        if !valid_alias(&agent.alias) {
            bail!(
                "invalid alias '{}': use letters, digits, '-' or '_'",
                agent.alias
            );
        }
        write_json_atomic(&self.path_for(&agent.alias), agent)
            .with_context(|| format!("failed saving external agent {}", agent.alias))
    }

    /// Case-insensitive lookup by alias.
    pub fn get(&self, alias: &str) -> Option<ExternalAgent> {
        if !valid_alias(alias) {
            return None;
        }
        match read_json_file(&self.path_for(alias)) {
            Ok(agent) => agent,
            Err(error) => {
                tracing::warn!(target = "synapse::external", alias = %alias, error = %error, "unreadable external agent entry");
                None
            }
        }
    }

    /// Sorted by alias.
    pub fn list(&self) -> Vec<ExternalAgent> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut agents: Vec<ExternalAgent> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
            .filter_map(|path| match read_json_file::<ExternalAgent>(&path) {
                Ok(agent) => agent,
                Err(error) => {
                    tracing::warn!(target = "synapse::external", path = %path.display(), error = %error, "skipping corrupt external agent entry");
                    None
                }
            })
            .collect();
        agents.sort_by(|a, b| a.alias.cmp(&b.alias));
        agents
    }

    pub fn remove(&self, alias: &str) -> bool {
        valid_alias(alias) && std::fs::remove_file(self.path_for(alias)).is_ok()
    }

    pub fn touch(&self, alias: &str) {
        if let Some(mut agent) = self.get(alias) {
            agent.last_seen = Some(Utc::now());
            if let Err(error) = self.add(&agent) {
                tracing::debug!(target = "synapse::external", alias = %alias, error = %error, "failed updating last_seen");
            }
        }
    }

    /// Fetch the agent card at `url` and register it. The alias defaults to
    /// a slug of the card name.
    pub async fn discover(
        &self,
        client: &A2aClient,
        url: &str,
        alias: Option<&str>,
    ) -> Result<ExternalAgent> {
        let card = client
            .fetch_agent_card(url)
            .await
            .with_context(|| format!("failed to discover agent at {url}"))?;
        let alias = match alias {
            Some(alias) => alias.to_string(),
            None => slugify(&card.name),
        };
        let agent = ExternalAgent {
            alias,
            name: card.name,
            url: url.trim_end_matches('/').to_string(),
            description: card.description,
            added_at: Utc::now(),
            last_seen: Some(Utc::now()),
        };
        self.add(&agent)?;
        tracing::info!(target = "synapse::external", alias = %agent.alias, url = %agent.url, "external agent added");
        Ok(agent)
    }
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "external".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn agent(alias: &str) -> ExternalAgent {
        ExternalAgent {
            alias: alias.to_string(),
            name: format!("{alias} agent"),
            url: "http://example.test".to_string(),
            description: String::new(),
            added_at: Utc::now(),
            last_seen: None,
        }
    }

    #[test]
    fn add_get_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExternalRegistry::new(dir.path());
        registry.add(&agent("zeta")).unwrap();
        registry.add(&agent("alpha")).unwrap();

        assert_eq!(registry.get("ALPHA").unwrap().alias, "alpha");
        let aliases: Vec<String> = registry.list().into_iter().map(|a| a.alias).collect();
        assert_eq!(aliases, ["alpha", "zeta"]);

        assert!(registry.remove("zeta"));
        assert!(!registry.remove("zeta"));
        assert!(registry.get("zeta").is_none());
    }

    #[test]
    fn rejects_path_like_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExternalRegistry::new(dir.path());
        assert!(registry.add(&agent("../escape")).is_err());
        assert!(registry.get("../escape").is_none());
    }

    #[test]
    fn touch_updates_last_seen() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExternalRegistry::new(dir.path());
        registry.add(&agent("remote")).unwrap();
        registry.touch("remote");
        assert!(registry.get("remote").unwrap().last_seen.is_some());
    }

    #[tokio::test]
    async fn discover_reads_agent_card() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/.well-known/agent.json");
            then.status(200).json_body(json!({
                "name": "Research Bot",
                "description": "answers questions",
                "url": server.base_url(),
            }));
        });

        let dir = tempfile::tempdir().unwrap();
        let registry = ExternalRegistry::new(dir.path());
        let client = A2aClient::new().unwrap();
        let added = registry
            .discover(&client, &server.base_url(), None)
            .await
            .unwrap();
        assert_eq!(added.alias, "research-bot");
        assert_eq!(registry.get("research-bot").unwrap().description, "answers questions");
    }
}
