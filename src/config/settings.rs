// src/config/settings.rs: environment-level settings, read once at startup

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use log::debug;

use crate::config::defs::{
    PipelineError, CACHE_DIR_VAR, JAVA_TAG, POLISHER_ARCHIVE_VAR, POLISHER_MEMORY_OPTIONS,
    REQUIRED_TOOLS, TOOL_PATH_VARS,
};


/// Settings that come from the environment rather than the command line.
#[derive(Debug, Clone, Default)]
pub struct ExternalSettings {
    /// Explicit per-tool executable overrides, keyed by tool tag.
    pub tool_overrides: HashMap<String, PathBuf>,
    /// PATH value used for the fallback executable search.
    pub search_path: Option<OsString>,
    /// Pilon jar handed to the JVM.
    pub polisher_archive: Option<PathBuf>,
    /// Directory holding downloaded SRA caches; enables cleanup when set.
    pub cache_dir: Option<PathBuf>,
}

impl ExternalSettings {
    /// Reads every recognised variable from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Builds the settings from an arbitrary variable lookup.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the value of an environment variable, if set.
    ///
    /// # Returns
    /// ExternalSettings with empty values treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let mut tool_overrides = HashMap::new();
        for tool in REQUIRED_TOOLS {
            if let Some(var) = TOOL_PATH_VARS.get(tool) {
                if let Some(value) = non_empty(var) {
                    debug!("{} overridden by {}={:?}", tool, var, value);
                    tool_overrides.insert(tool.to_string(), PathBuf::from(value));
                }
            }
        }

        ExternalSettings {
            tool_overrides,
            search_path: non_empty("PATH"),
            polisher_archive: non_empty(POLISHER_ARCHIVE_VAR).map(PathBuf::from),
            cache_dir: non_empty(CACHE_DIR_VAR).map(PathBuf::from),
        }
    }

    /// Fails unless the polisher archive is configured and present on disk.
    pub fn check_polisher_archive(&self) -> Result<PathBuf, PipelineError> {
        match &self.polisher_archive {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(PipelineError::DependencyMissing {
                tool: JAVA_TAG.to_string(),
                path: path.display().to_string(),
            }),
            None => Err(PipelineError::DependencyMissing {
                tool: JAVA_TAG.to_string(),
                path: format!("${}", POLISHER_ARCHIVE_VAR),
            }),
        }
    }
}


/// Checks that every runtime option passed to the polisher only sizes JVM memory.
///
/// # Arguments
///
/// * `options` - Raw options, e.g. `-Xmx16G`.
///
/// # Returns
/// The options unchanged, or InvalidOption for the first offender.
pub fn validate_polisher_options(options: &[String]) -> Result<Vec<String>, PipelineError> {
    for option in options {
        if !is_memory_option(option) {
            return Err(PipelineError::InvalidOption {
                option: option.clone(),
                allowed: POLISHER_MEMORY_OPTIONS.join(", "),
            });
        }
    }
    Ok(options.to_vec())
}

fn is_memory_option(option: &str) -> bool {
    POLISHER_MEMORY_OPTIONS.iter().any(|prefix| {
        option
            .strip_prefix(prefix)
            .map(is_memory_size)
            .unwrap_or(false)
    })
}

// digits, optionally followed by a single k/m/g/t unit
fn is_memory_size(size: &str) -> bool {
    let digits = size.trim_end_matches(|c: char| "kKmMgGtT".contains(c));
    let unit_len = size.len() - digits.len();
    !digits.is_empty() && unit_len <= 1 && digits.chars().all(|c| c.is_ascii_digit())
}
