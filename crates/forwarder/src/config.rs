//! Forwarder configuration
//!
//! Values are layered: defaults, then an optional config file, then
//! `FORWARDER_*` environment variables, then command line flags.

use anyhow::{Context, Result};
use clap::Parser;
use forwarder_lib::{dispatch::INSTANCE_ID_URL, ContainerFilter};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "ECS Custom";
const TEST_NAMESPACE: &str = "ECS Custom Test";
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;
const TEST_FLUSH_INTERVAL_SECS: u64 = 3;

/// Forward container resource usage to a metrics ingestion API
#[derive(Debug, Default, Parser)]
#[command(name = "stats-forwarder")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Metric namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Print the payload instead of sending it
    #[arg(long)]
    pub dry_run: bool,

    /// Exit after the first flush cycle
    #[arg(long)]
    pub once: bool,

    /// Use the test namespace and a short flush interval
    #[arg(long)]
    pub test: bool,

    /// Seconds between flush cycles
    #[arg(long)]
    pub flush_interval: Option<u64>,

    /// Seconds between resource samples
    #[arg(long)]
    pub sample_interval: Option<u64>,

    /// Ingestion API endpoint receiving the JSON payloads
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Only forward containers whose name matches this regex
    #[arg(long)]
    pub match_by_name: Option<String>,

    /// Only forward containers whose image matches this regex
    #[arg(long)]
    pub match_by_image: Option<String>,

    /// Skip containers whose name matches this regex
    #[arg(long)]
    pub skip_by_name: Option<String>,

    /// Skip containers whose image matches this regex
    #[arg(long)]
    pub skip_by_image: Option<String>,

    #[arg(long)]
    pub cgroup_root: Option<String>,

    #[arg(long)]
    pub docker_root: Option<String>,

    /// Port for the health and metrics server
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Host metadata URL returning the instance id
    #[arg(long)]
    pub instance_id_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    /// Explicit namespace; falls back to the (test) default
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub once: bool,

    #[serde(default)]
    pub test: bool,

    /// Explicit flush interval; falls back to the (test) default
    #[serde(default)]
    pub flush_interval_secs: Option<u64>,

    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub match_by_name: Option<String>,
    #[serde(default)]
    pub match_by_image: Option<String>,
    #[serde(default)]
    pub skip_by_name: Option<String>,
    #[serde(default)]
    pub skip_by_image: Option<String>,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    #[serde(default = "default_docker_root")]
    pub docker_root: PathBuf,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_instance_id_url")]
    pub instance_id_url: String,
}

fn default_sample_interval() -> u64 {
    5
}

fn default_endpoint() -> String {
    "http://localhost:4000/metrics".to_string()
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_docker_root() -> PathBuf {
    PathBuf::from("/var/lib/docker")
}

fn default_api_port() -> u16 {
    8080
}

fn default_instance_id_url() -> String {
    INSTANCE_ID_URL.to_string()
}

impl ForwarderConfig {
    /// Load configuration from file, environment and command line
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder = builder
            .add_source(config::Environment::with_prefix("FORWARDER"))
            .set_override_option("namespace", args.namespace.clone())?
            .set_override_option("dry_run", args.dry_run.then_some(true))?
            .set_override_option("once", args.once.then_some(true))?
            .set_override_option("test", args.test.then_some(true))?
            .set_override_option("flush_interval_secs", args.flush_interval)?
            .set_override_option("sample_interval_secs", args.sample_interval)?
            .set_override_option("endpoint", args.endpoint.clone())?
            .set_override_option("match_by_name", args.match_by_name.clone())?
            .set_override_option("match_by_image", args.match_by_image.clone())?
            .set_override_option("skip_by_name", args.skip_by_name.clone())?
            .set_override_option("skip_by_image", args.skip_by_image.clone())?
            .set_override_option("cgroup_root", args.cgroup_root.clone())?
            .set_override_option("docker_root", args.docker_root.clone())?
            .set_override_option("api_port", args.api_port.map(u64::from))?
            .set_override_option("instance_id_url", args.instance_id_url.clone())?;

        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn effective_namespace(&self) -> &str {
        match &self.namespace {
            Some(namespace) => namespace,
            None if self.test => TEST_NAMESPACE,
            None => DEFAULT_NAMESPACE,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        let secs = self.flush_interval_secs.unwrap_or(if self.test {
            TEST_FLUSH_INTERVAL_SECS
        } else {
            DEFAULT_FLUSH_INTERVAL_SECS
        });
        Duration::from_secs(secs.max(1))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs.max(1))
    }

    pub fn container_filter(&self) -> Result<ContainerFilter> {
        ContainerFilter::from_patterns(
            self.match_by_name.as_deref(),
            self.match_by_image.as_deref(),
            self.skip_by_name.as_deref(),
            self.skip_by_image.as_deref(),
        )
        .context("Invalid container filter pattern")
    }
}
