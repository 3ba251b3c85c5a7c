//! Resolution of the project and zone shared by every subcommand.
//!
//! Precedence, documented once here: command-line flag, then environment
//! variable (`BINAUTHZ_PROJECT` / `BINAUTHZ_ZONE`), then the optional YAML
//! defaults file. A value missing from all three sources is a usage error,
//! raised before any remote call is issued.

use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use serde::Deserialize;

pub const PROJECT_ENV: &str = "BINAUTHZ_PROJECT";
pub const ZONE_ENV: &str = "BINAUTHZ_ZONE";

/// Contents of the optional defaults file.
#[derive(Debug, Default, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
}

impl Defaults {
    /// Load the defaults file if it exists; a missing file is an empty set
    /// of defaults, not an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .context(format!("Unable to read the defaults file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .context(format!("Can't parse the defaults file {}", path.display()))
    }
}

/// The fully resolved project/zone pair the cluster subcommands act on.
#[derive(Debug, Clone)]
pub struct Target {
    pub project: String,
    pub zone: String,
}

pub fn resolve_target(
    flag_project: Option<String>,
    flag_zone: Option<String>,
    defaults: &Defaults,
) -> anyhow::Result<Target> {
    Ok(Target {
        project: resolve(
            "project",
            flag_project,
            PROJECT_ENV,
            defaults.project.clone(),
        )?,
        zone: resolve("zone", flag_zone, ZONE_ENV, defaults.zone.clone())?,
    })
}

pub fn resolve_project(
    flag_project: Option<String>,
    defaults: &Defaults,
) -> anyhow::Result<String> {
    resolve(
        "project",
        flag_project,
        PROJECT_ENV,
        defaults.project.clone(),
    )
}

fn resolve(
    name: &str,
    flag: Option<String>,
    env_key: &str,
    file_value: Option<String>,
) -> anyhow::Result<String> {
    flag.or_else(|| std::env::var(env_key).ok().filter(|v| !v.is_empty()))
        .or(file_value)
        .ok_or_else(|| {
            anyhow!(
                "No {name} configured. Pass --{name}, set {env_key}, or add `{name}:` to the defaults file."
            )
        })
}
