//! Container identity resolution
//!
//! Docker persists each container's configuration as
//! `<docker_root>/containers/<id>/config.v2.json`; reading it gives the
//! same name, image and labels as an inspect call without a daemon round trip.

use crate::models::ContainerIdentity;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

/// Resolves identity metadata for a container id
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    async fn inspect(&self, container_id: &str) -> Result<ContainerIdentity>;
}

#[derive(Debug, Deserialize)]
struct InspectDocument {
    #[serde(rename = "ID", alias = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Config")]
    config: Option<InspectConfig>,
}

#[derive(Debug, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image")]
    image: Option<String>,
    #[serde(rename = "Labels")]
    labels: Option<HashMap<String, String>>,
}

/// Inspector backed by the docker state directory
pub struct DockerConfigInspector {
    docker_root: PathBuf,
}

impl DockerConfigInspector {
    pub fn new(docker_root: impl Into<PathBuf>) -> Self {
        Self {
            docker_root: docker_root.into(),
        }
    }

    fn config_path(&self, container_id: &str) -> PathBuf {
        self.docker_root
            .join("containers")
            .join(container_id)
            .join("config.v2.json")
    }

    /// Parse an inspect document into an identity
    pub fn parse(content: &str) -> Result<ContainerIdentity> {
        let doc: InspectDocument =
            serde_json::from_str(content).context("Failed to parse container config")?;

        let (image, labels) = match doc.config {
            Some(config) => (config.image, config.labels),
            None => (None, None),
        };

        Ok(ContainerIdentity::from_runtime(
            doc.id,
            &doc.name,
            image,
            labels.as_ref(),
        ))
    }
}

#[async_trait]
impl ContainerInspector for DockerConfigInspector {
    async fn inspect(&self, container_id: &str) -> Result<ContainerIdentity> {
        let path = self.config_path(container_id);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::parse(&content)
    }
}
