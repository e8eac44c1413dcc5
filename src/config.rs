//! The configured set of sources, loaded once at startup.

use std::fmt;
use std::ops::Index;
use std::path::Path;
use std::slice::Iter;
use std::sync::Arc;

use serde::Deserialize;

use crate::color::Rgb;
use crate::Error;

/// Stable identity of a source: its position in the [`Registry`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SourceId(usize);

impl SourceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of the `sources` list as written in the config document.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub bg: Option<Rgb>,
    #[serde(default)]
    pub fg: Option<Rgb>,
    #[serde(default)]
    pub truncate: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Reads and parses the JSON config document at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content).map_err(|source| Error::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

/// A configured stream input. Immutable once the registry is built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Source {
    id: SourceId,
    name: String,
    path: String,
    bg: Option<Rgb>,
    fg: Option<Rgb>,
    truncate: bool,
}

impl Source {
    pub fn new(id: SourceId, config: SourceConfig) -> Self {
        let SourceConfig {
            name,
            path,
            bg,
            fg,
            truncate,
        } = config;

        Source {
            id,
            name,
            path,
            bg,
            fg,
            truncate,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Display label used in the header badge.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The path exactly as configured. Also the input of derived colors.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn background(&self) -> Option<Rgb> {
        self.bg
    }

    pub fn foreground(&self) -> Option<Rgb> {
        self.fg
    }

    pub fn truncate(&self) -> bool {
        self.truncate
    }
}

/// The fixed set of sources for the lifetime of the process.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    sources: Vec<Arc<Source>>,
}

impl Registry {
    pub fn from_config(config: Config) -> Self {
        let sources = config
            .sources
            .into_iter()
            .enumerate()
            .map(|(idx, source)| Arc::new(Source::new(SourceId(idx), source)))
            .collect();

        Registry { sources }
    }

    pub fn get(&self, id: SourceId) -> Option<&Arc<Source>> {
        self.sources.get(id.0)
    }

    pub fn iter(&self) -> Iter<'_, Arc<Source>> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Index<SourceId> for Registry {
    type Output = Arc<Source>;

    fn index(&self, id: SourceId) -> &Self::Output {
        &self.sources[id.0]
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a Arc<Source>;
    type IntoIter = Iter<'a, Arc<Source>>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}
