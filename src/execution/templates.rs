//! Placeholder substitution for config files and control scripts
//!
//! Templates use shell-style placeholders: `$name` or `${name}`, where a name
//! starts with a letter or underscore. `$$` renders a literal `$`. Placeholders
//! whose name is not in the argument set are left untouched, so control
//! scripts keep their own `$1`, `$0` and environment references.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::config::TemplatesConfig;
use crate::types::{ConfigError, Result};

const BUILTIN_CONTROL_SCRIPT: &str = include_str!("../../templates/control.sh");
const BUILTIN_STORE_CONFIG: &str = include_str!("../../templates/redis.conf");

/// File names looked up in a configured template directory
pub const CONTROL_SCRIPT_TEMPLATE: &str = "control.sh";
pub const STORE_CONFIG_TEMPLATE: &str = "redis.conf";

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*)|\{([_A-Za-z][_A-Za-z0-9]*)\})")
            .expect("placeholder pattern is valid");
}

/// Named parameters substituted into templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateArgs {
    values: BTreeMap<String, String>,
}

impl TemplateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.values.insert(name.into(), value.to_string());
        self
    }

    /// Builder pattern: set a parameter
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Renders templates against a [`TemplateArgs`] set
///
/// Rendering is pure: identical template and arguments always produce
/// identical output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigRenderer;

impl ConfigRenderer {
    /// Substitute every known placeholder, leaving unknown ones verbatim
    pub fn render(template: &str, args: &TemplateArgs) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                if caps.get(1).is_some() {
                    return "$".to_string();
                }
                let name = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match args.get(name) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Placeholder names in `template` that `args` does not provide
    pub fn unresolved(template: &str, args: &TemplateArgs) -> Vec<String> {
        let mut names: Vec<String> = PLACEHOLDER
            .captures_iter(template)
            .filter_map(|caps| caps.get(2).or_else(|| caps.get(3)))
            .map(|m| m.as_str())
            .filter(|name| !args.contains(name))
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// The raw text templates an instance renders at deploy time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    pub control_script: String,
    pub store_config: String,
}

impl TemplateSet {
    /// Templates compiled into the crate
    pub fn builtin() -> Self {
        Self {
            control_script: BUILTIN_CONTROL_SCRIPT.to_string(),
            store_config: BUILTIN_STORE_CONFIG.to_string(),
        }
    }

    /// Load templates from the configured directory, or the built-in set
    pub fn load(config: &TemplatesConfig) -> Result<Self> {
        match &config.dir {
            Some(dir) => {
                debug!(dir = %dir.display(), "Loading templates from directory");
                Ok(Self {
                    control_script: read_template(&dir.join(CONTROL_SCRIPT_TEMPLATE))?,
                    store_config: read_template(&dir.join(STORE_CONFIG_TEMPLATE))?,
                })
            }
            None => Ok(Self::builtin()),
        }
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| {
        ConfigError::TemplateUnreadable {
            path: path.display().to_string(),
            source,
        }
        .into()
    })
}
