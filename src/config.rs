// Numus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The `numus.toml` configuration file.
//!
//! Every table and key is optional. A missing key takes its built-in default:
//!
//! ```toml
//! [engine]
//! host = "127.0.0.1"
//! port = 4560
//!
//! [dispatch]
//! managed_toggles = ["sub_fade", "texture_air", "texture_grain", "drop_gap", "snare_roll", "snare_fill"]
//! debug = true
//!
//! [playback]
//! pad_sweep_interval = 1.0
//! time_scale = 1.0
//!
//! [render]
//! binary = "fluidsynth"
//! soundfont = "SF/FluidR3_GM.sf2"
//! output_dir = "output/wav"
//! sample_rate = 44100
//! timeout_secs = 30
//! overlap = 0.1
//!
//! [library]
//! path = "segments"
//! ```

use crate::{
    engine::DEFAULT_ADDRESS,
    params::Rules,
    render::{RenderOptions, DEFAULT_SAMPLE_RATE},
};
use serde::Deserialize;
use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// The file looked for in the working directory when no path is given.
pub const DEFAULT_PATH: &str = "numus.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("reading {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub dispatch: DispatchConfig,
    pub playback: PlaybackConfig,
    pub render: RenderConfig,
    pub library: LibraryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ADDRESS.0.to_owned(),
            port: DEFAULT_ADDRESS.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub managed_toggles: Vec<String>,
    pub numeric_params: BTreeSet<String>,
    /// Send `/engine/debug` lines while playing.
    pub debug: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let rules = Rules::default();
        Self {
            managed_toggles: rules.managed_toggles,
            numeric_params: rules.numeric_params,
            debug: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub pad_sweep_interval: f64,
    pub time_scale: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pad_sweep_interval: 1.0,
            time_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub binary: PathBuf,
    pub soundfont: PathBuf,
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub timeout_secs: u64,
    pub overlap: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let options = RenderOptions::default();
        Self {
            binary: options.binary,
            soundfont: options.soundfont,
            output_dir: options.output_dir,
            sample_rate: DEFAULT_SAMPLE_RATE,
            timeout_secs: options.timeout.as_secs(),
            overlap: options.overlap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub path: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("segments"),
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_PATH`] is read if it exists in the
    /// working directory, and the defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) if !path.exists() => Err(ConfigError::NotFound(path.to_owned())),
            Some(path) => Config::read(path),
            None if Path::new(DEFAULT_PATH).exists() => Config::read(Path::new(DEFAULT_PATH)),
            None => {
                log::debug!("no config file found, using defaults");
                Ok(Config::default())
            }
        }
    }

    pub fn from_toml(text: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(text)
    }

    fn read(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Config::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn rules(&self) -> Rules {
        Rules {
            managed_toggles: self.dispatch.managed_toggles.clone(),
            numeric_params: self.dispatch.numeric_params.clone(),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        let render = &self.render;
        RenderOptions {
            binary: render.binary.clone(),
            soundfont: render.soundfont.clone(),
            output_dir: render.output_dir.clone(),
            sample_rate: render.sample_rate,
            timeout: Duration::from_secs(render.timeout_secs),
            overlap: render.overlap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
        assert_eq!(Config::default().rules(), Rules::default());
        assert_eq!(Config::default().render_options(), RenderOptions::default());
    }

    #[test]
    fn test_partial_tables() {
        let config = Config::from_toml(
            r#"
            [engine]
            port = 4557

            [dispatch]
            managed_toggles = ["drop_gap"]

            [render]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.host, "127.0.0.1");
        assert_eq!(config.engine.port, 4557);
        assert_eq!(config.rules().managed_toggles, vec!["drop_gap".to_owned()]);
        assert!(config.rules().numeric_params.contains("pad_cutoff"));
        assert_eq!(config.render_options().timeout, Duration::from_secs(5));
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new("numus-config").unwrap();
        let path = dir.path().join("numus.toml");
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::NotFound(_))));

        fs::write(&path, "[playback]\ntime_scale = 4.0\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().playback.time_scale, 4.0);

        fs::write(&path, "[playback\n").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }
}
