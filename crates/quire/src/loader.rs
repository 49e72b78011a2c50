//! Template source loaders.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Where a compiled template's source came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub name: String,
    pub loader_name: Option<String>,
}

impl Origin {
    pub fn new(name: impl Into<String>, loader_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            loader_name: loader_name.map(str::to_string),
        }
    }

    pub(crate) fn from_string() -> Self {
        Self::new("<unknown source>", None)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A source of template text.
pub trait Loader: Send + Sync + fmt::Debug {
    /// Return the source and a display name, or
    /// [`Error::TemplateDoesNotExist`] when this loader has no such template.
    fn load_template_source(&self, name: &str, dirs: Option<&[PathBuf]>)
        -> Result<(String, String)>;

    fn name(&self) -> &'static str;

    /// Drop any cached state.
    fn reset(&self) {}
}

// ============================================================================
// Filesystem
// ============================================================================

/// Loads templates from a list of directories.
#[derive(Debug, Clone, Default)]
pub struct FilesystemLoader {
    dirs: Vec<PathBuf>,
}

impl FilesystemLoader {
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Candidate paths for `name`, one per directory it stays inside of.
    pub fn template_sources(&self, name: &str, dirs: Option<&[PathBuf]>) -> Vec<PathBuf> {
        let dirs = match dirs {
            Some(dirs) if !dirs.is_empty() => dirs,
            _ => &self.dirs,
        };
        dirs.iter().filter_map(|dir| safe_join(dir, name)).collect()
    }
}

impl Loader for FilesystemLoader {
    fn load_template_source(
        &self,
        name: &str,
        dirs: Option<&[PathBuf]>,
    ) -> Result<(String, String)> {
        let mut tried = Vec::new();
        for path in self.template_sources(name, dirs) {
            if !path.is_file() {
                tried.push(path.display().to_string());
                continue;
            }
            let source = fs::read_to_string(&path)?;
            return Ok((source, path.display().to_string()));
        }
        if tried.is_empty() {
            Err(Error::TemplateDoesNotExist(
                "Your TEMPLATE_DIRS setting is empty. Change it to point to at least one template directory."
                    .to_string(),
            ))
        } else {
            Err(Error::TemplateDoesNotExist(format!("Tried {tried:?}")))
        }
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

/// Join `name` onto `base`, refusing results that land outside `base`.
fn safe_join(base: &Path, name: &str) -> Option<PathBuf> {
    let root = base.canonicalize().ok()?;
    let mut joined = root.clone();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(segment) => joined.push(segment),
            Component::ParentDir => {
                if joined == root || !joined.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    // Symlinks may still lead out of the root. The missing tail below the
    // deepest existing ancestor is plain segments and cannot.
    let anchor = joined.ancestors().find(|path| path.exists())?;
    let resolved = anchor.canonicalize().ok()?;
    resolved.starts_with(&root).then_some(joined)
}

// ============================================================================
// Memory
// ============================================================================

/// Serves templates from an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: IndexMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryLoader {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            templates: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Loader for MemoryLoader {
    fn load_template_source(
        &self,
        name: &str,
        _dirs: Option<&[PathBuf]>,
    ) -> Result<(String, String)> {
        self.templates
            .get(name)
            .map(|source| (source.clone(), name.to_string()))
            .ok_or_else(|| Error::TemplateDoesNotExist(name.to_string()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Cached
// ============================================================================

/// Wraps other loaders and remembers the sources they found.
#[derive(Debug, Default)]
pub struct CachedLoader {
    loaders: Vec<Box<dyn Loader>>,
    cache: Mutex<HashMap<String, (String, String)>>,
}

impl CachedLoader {
    pub fn new(loaders: Vec<Box<dyn Loader>>) -> Self {
        Self {
            loaders,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(name: &str, dirs: Option<&[PathBuf]>) -> String {
        match dirs {
            Some(dirs) if !dirs.is_empty() => {
                let joined: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
                let digest = Sha256::digest(joined.join("|").as_bytes());
                format!("{name}-{}", hex::encode(digest))
            }
            _ => name.to_string(),
        }
    }
}

impl Loader for CachedLoader {
    fn load_template_source(
        &self,
        name: &str,
        dirs: Option<&[PathBuf]>,
    ) -> Result<(String, String)> {
        let key = Self::cache_key(name, dirs);
        if let Some(found) = self.cache.lock().get(&key) {
            log::debug!("template source cache hit: {name}");
            return Ok(found.clone());
        }
        for loader in &self.loaders {
            match loader.load_template_source(name, dirs) {
                Ok(found) => {
                    self.cache.lock().insert(key, found.clone());
                    return Ok(found);
                }
                Err(Error::TemplateDoesNotExist(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::TemplateDoesNotExist(name.to_string()))
    }

    fn name(&self) -> &'static str {
        "cached"
    }

    fn reset(&self) {
        self.cache.lock().clear();
        for loader in &self.loaders {
            loader.reset();
        }
    }
}
