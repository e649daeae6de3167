//! Profile loading and validation.
//!
//! A profile is YAML or JSON, picked by file extension. Table files
//! referenced by tasks are loaded relative to the profile's directory and
//! inlined, so a loaded [`Profile`] is self-contained.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_tables;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{FerryError, Result};
use crate::orchestrator::{EngineSettings, Instance, Orchestrator, RunMode, Runner, Task};

/// Serialization format of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Format for a path: `.json` is JSON, anything else YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }

    fn parse<T: DeserializeOwned>(self, content: &str) -> std::result::Result<T, String> {
        match self {
            Format::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FerryError::Config(format!("{}: {}", path.display(), e)))?;
    Format::from_path(path)
        .parse(&content)
        .map_err(|e| FerryError::Config(format!("{}: {}", path.display(), e)))
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(|_| FerryError::Config(format!("invalid time of day '{}', expected HH:MM", s)))
}

impl Profile {
    /// Load, inline table files and validate a profile.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut profile: Profile = read_file(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        profile.inline_tables(&base)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Parse a profile from text. Table file paths resolve against `base`.
    pub fn from_str(content: &str, format: Format, base: &Path) -> Result<Self> {
        let mut profile: Profile = format.parse(content).map_err(FerryError::Config)?;
        profile.inline_tables(base)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Replace table file references with their contents.
    fn inline_tables(&mut self, base: &Path) -> Result<()> {
        for instance in &mut self.instances {
            for task in &mut instance.tasks {
                if let TableSource::File(file) = &task.tables {
                    let path: PathBuf = if file.is_absolute() {
                        file.clone()
                    } else {
                        base.join(file)
                    };
                    let tables: TableFile = read_file(&path)?;
                    let tables = tables.into_tables();
                    debug!(
                        "Loaded {} tables for {}/{} from {}",
                        tables.len(),
                        instance.name,
                        task.name,
                        path.display()
                    );
                    task.tables = TableSource::Inline(tables);
                }
            }
        }
        Ok(())
    }

    /// Validate the profile.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Effective worker count.
    pub fn threads(&self) -> usize {
        self.threads
            .unwrap_or_else(|| SystemResources::detect().default_threads())
    }

    /// Engine settings derived from the profile.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            threads: self.threads(),
            read_pages: self.read_pages.max(1),
        }
    }

    /// Parsed `daily_at`.
    pub fn daily_at_time(&self) -> Result<Option<NaiveTime>> {
        self.daily_at.as_deref().map(parse_time).transpose()
    }

    /// Build engine instances with idle state.
    pub fn instances(&self) -> Result<Vec<Instance>> {
        self.instances
            .iter()
            .map(|instance| {
                let tasks = instance
                    .tasks
                    .iter()
                    .map(|task| {
                        let tables = match &task.tables {
                            TableSource::Inline(tables) => {
                                tables.iter().map(TableConfig::to_table).collect()
                            }
                            TableSource::File(path) => {
                                return Err(FerryError::Config(format!(
                                    "{}/{}: table file {} was not loaded",
                                    instance.name,
                                    task.name,
                                    path.display()
                                )))
                            }
                        };
                        let built = Task::new(
                            task.name.clone(),
                            task.kind,
                            task.sources.clone(),
                            task.dest.clone(),
                            tables,
                        );
                        Ok(match task.threads {
                            Some(threads) => built.with_threads(threads),
                            None => built,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Instance::new(instance.name.clone(), tasks))
            })
            .collect()
    }

    /// Runner for the profile's mode.
    pub fn runner(&self, orchestrator: Orchestrator, force_once: bool) -> Result<Runner> {
        let mode = if force_once { RunMode::Once } else { self.mode };
        let mut runner = Runner::new(orchestrator, mode)
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_transaction(self.with_transaction);
        if let Some(at) = self.daily_at_time()? {
            runner = runner.with_daily_at(at);
        }
        Ok(runner)
    }
}
