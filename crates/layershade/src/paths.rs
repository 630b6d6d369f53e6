use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

use crate::cli::Locations;

pub const ENV_CONFIG: &str = "LAYERSHADE_CONFIG";
pub const ENV_SHADER_DIR: &str = "LAYERSHADE_SHADER_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Layershade";
const APPLICATION: &str = "layershade";

const CONFIG_FILE: &str = "config.toml";
const SHADER_DIR: &str = "shaders";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    config_file: PathBuf,
    shader_dir: PathBuf,
}

impl AppPaths {
    /// Explicit locations (flags or environment) win over the platform
    /// config directory.
    pub fn resolve(locations: &Locations) -> Result<Self> {
        if let (Some(config_file), Some(shader_dir)) = (&locations.config, &locations.shader_dir) {
            return Ok(Self {
                config_file: config_file.clone(),
                shader_dir: shader_dir.clone(),
            });
        }
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        let defaults = Self::under(project_dirs.config_dir());
        Ok(Self {
            config_file: locations.config.clone().unwrap_or(defaults.config_file),
            shader_dir: locations.shader_dir.clone().unwrap_or(defaults.shader_dir),
        })
    }

    /// Default layout below one configuration directory.
    pub fn under(config_dir: &Path) -> Self {
        Self {
            config_file: config_dir.join(CONFIG_FILE),
            shader_dir: config_dir.join(SHADER_DIR),
        }
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    /// Directory relative background image paths resolve against.
    pub fn config_dir(&self) -> &Path {
        self.config_file.parent().unwrap_or_else(|| Path::new("."))
    }
}
