use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use super::backend::DetectorSet;
use super::backends::{ReplayBackend, StubBackend};

/// Which detector backend to run, plus backend-specific inputs.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub backend: String,
    /// Required by the `replay` backend.
    pub replay_path: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: "stub".to_string(),
            replay_path: None,
        }
    }
}

type BackendFactory = Box<dyn Fn(&DetectorConfig) -> Result<DetectorSet> + Send + Sync>;

/// Registry of detector backends, keyed by name.
///
/// Backends are registered as factories so each session gets its own
/// detector instances.
pub struct DetectorRegistry {
    factories: BTreeMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in `stub` and `replay` backends; `stub` is the default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |_cfg| {
            Ok(DetectorSet::new(
                Box::new(StubBackend::new()),
                Box::new(StubBackend::new()),
            ))
        });
        registry.register("replay", |cfg| {
            let path = cfg
                .replay_path
                .as_ref()
                .ok_or_else(|| anyhow!("replay backend requires a replay_path"))?;
            let backend = ReplayBackend::from_path(path)?;
            log::info!(
                "replay backend loaded {} entries from {}",
                backend.len(),
                path.display()
            );
            Ok(DetectorSet::new(Box::new(backend.clone()), Box::new(backend)))
        });
        registry
    }

    /// Register a backend factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DetectorConfig) -> Result<DetectorSet> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the configured backend; an empty name selects the default.
    pub fn build(&self, cfg: &DetectorConfig) -> Result<DetectorSet> {
        let name = if cfg.backend.trim().is_empty() {
            self.default_name
                .clone()
                .ok_or_else(|| anyhow!("no detector backends registered"))?
        } else {
            cfg.backend.trim().to_string()
        };
        let factory = self.factories.get(&name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        let mut set = factory(cfg)?;
        set.warm_up()?;
        Ok(set)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builds_stub_by_default() -> Result<()> {
        let registry = DetectorRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["replay".to_string(), "stub".to_string()]);
        let set = registry.build(&DetectorConfig {
            backend: String::new(),
            replay_path: None,
        })?;
        assert_eq!(set.landmarks.name(), "stub");
        assert_eq!(set.objects.name(), "stub");
        Ok(())
    }

    #[test]
    fn replay_requires_path() {
        let registry = DetectorRegistry::with_builtin();
        let err = registry
            .build(&DetectorConfig {
                backend: "replay".to_string(),
                replay_path: None,
            })
            .err()
            .unwrap();
        assert!(err.to_string().contains("replay_path"));
    }

    #[test]
    fn replay_builds_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, r#"{{"faces": [], "objects": []}}"#)?;
        let registry = DetectorRegistry::with_builtin();
        let set = registry.build(&DetectorConfig {
            backend: "replay".to_string(),
            replay_path: Some(file.path().to_path_buf()),
        })?;
        assert_eq!(set.landmarks.name(), "replay");
        Ok(())
    }

    #[test]
    fn unknown_backend_lists_available() {
        let mut registry = DetectorRegistry::with_builtin();
        assert!(registry.set_default("onnx").is_err());
        let err = registry
            .build(&DetectorConfig {
                backend: "onnx".to_string(),
                replay_path: None,
            })
            .err()
            .unwrap();
        assert!(err.to_string().contains("available: replay, stub"));
    }
}
