use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::classify::Thresholds;
use crate::detect::DetectorConfig;
use crate::dispatch::DispatchConfig;
use crate::evidence::EvidenceConfig;
use crate::ingest::SourceConfig;
use crate::throttle::{CooldownScope, ThrottleState};
use crate::transport::BackendConfig;

const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_EVIDENCE_DIR: &str = "uploads";
const DEFAULT_COOLDOWN_SECS: u64 = 4;
const DEFAULT_SUSTAIN_FRAMES: u32 = 1;

#[derive(Debug, Deserialize, Default)]
struct ProctorConfigFile {
    backend: Option<BackendConfigFile>,
    evidence: Option<EvidenceConfigFile>,
    thresholds: Option<ThresholdsConfigFile>,
    throttle: Option<ThrottleConfigFile>,
    dispatch: Option<DispatchConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EvidenceConfigFile {
    root: Option<PathBuf>,
    public_base_url: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdsConfigFile {
    yaw_threshold_degrees: Option<f64>,
    pitch_threshold_degrees: Option<f64>,
    mouth_open_pixels: Option<f64>,
    phone_confidence_min: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ThrottleConfigFile {
    cooldown_secs: Option<u64>,
    scope: Option<String>,
    min_sustained_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DispatchConfigFile {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    replay_path: Option<PathBuf>,
}

/// Resolved `proctord` configuration: file (`PROCTOR_CONFIG`), then env, then validation.
#[derive(Debug, Clone)]
pub struct ProctorConfig {
    pub backend: BackendSettings,
    pub evidence: EvidenceSettings,
    pub thresholds: Thresholds,
    pub throttle: ThrottleSettings,
    pub dispatch: DispatchConfig,
    pub source: SourceConfig,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EvidenceSettings {
    pub root: PathBuf,
    /// Falls back to the backend url when unset.
    pub public_base_url: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    pub cooldown: Duration,
    pub scope: CooldownScope,
    pub min_sustained_frames: u32,
}

impl ProctorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PROCTOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ProctorConfigFile) -> Result<Self> {
        let backend_file = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            url: backend_file
                .url
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            api_key: backend_file.api_key.unwrap_or_default(),
            timeout: Duration::from_secs(backend_file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };

        let evidence_file = file.evidence.unwrap_or_default();
        let evidence = EvidenceSettings {
            root: evidence_file
                .root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVIDENCE_DIR)),
            public_base_url: evidence_file.public_base_url,
            enabled: evidence_file.enabled.unwrap_or(true),
        };

        let defaults = Thresholds::default();
        let thresholds_file = file.thresholds.unwrap_or_default();
        let thresholds = Thresholds {
            yaw_threshold_degrees: thresholds_file
                .yaw_threshold_degrees
                .unwrap_or(defaults.yaw_threshold_degrees),
            pitch_threshold_degrees: thresholds_file
                .pitch_threshold_degrees
                .unwrap_or(defaults.pitch_threshold_degrees),
            mouth_open_pixels: thresholds_file
                .mouth_open_pixels
                .unwrap_or(defaults.mouth_open_pixels),
            phone_confidence_min: thresholds_file
                .phone_confidence_min
                .unwrap_or(defaults.phone_confidence_min),
        };

        let throttle_file = file.throttle.unwrap_or_default();
        let throttle = ThrottleSettings {
            cooldown: Duration::from_secs(
                throttle_file.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            scope: match throttle_file.scope.as_deref() {
                Some(raw) => CooldownScope::parse(raw)?,
                None => CooldownScope::default(),
            },
            min_sustained_frames: throttle_file
                .min_sustained_frames
                .unwrap_or(DEFAULT_SUSTAIN_FRAMES),
        };

        let dispatch_defaults = DispatchConfig::default();
        let dispatch_file = file.dispatch.unwrap_or_default();
        let dispatch = DispatchConfig {
            workers: dispatch_file.workers.unwrap_or(dispatch_defaults.workers),
            queue_capacity: dispatch_file
                .queue_capacity
                .unwrap_or(dispatch_defaults.queue_capacity),
            shutdown_grace: dispatch_defaults.shutdown_grace,
        };

        let source_defaults = SourceConfig::default();
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file.url.unwrap_or(source_defaults.url),
            target_fps: source_file.target_fps.unwrap_or(source_defaults.target_fps),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorConfig {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DetectorConfig::default().backend),
            replay_path: detector_file.replay_path,
        };

        Ok(Self {
            backend,
            evidence,
            thresholds,
            throttle,
            dispatch,
            source,
            detector,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string("PROCTOR_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(key) = env_string("PROCTOR_API_KEY") {
            self.backend.api_key = key;
        }
        if let Some(secs) = env_parse::<u64>("PROCTOR_TIMEOUT_SECS")? {
            self.backend.timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = env_string("PROCTOR_EVIDENCE_DIR") {
            self.evidence.root = PathBuf::from(dir);
        }
        if let Some(url) = env_string("PROCTOR_PUBLIC_BASE_URL") {
            self.evidence.public_base_url = Some(url);
        }
        if let Some(raw) = env_string("PROCTOR_CAPTURE_EVIDENCE") {
            self.evidence.enabled = parse_bool("PROCTOR_CAPTURE_EVIDENCE", &raw)?;
        }
        if let Some(v) = env_parse::<f64>("PROCTOR_YAW_THRESHOLD")? {
            self.thresholds.yaw_threshold_degrees = v;
        }
        if let Some(v) = env_parse::<f64>("PROCTOR_PITCH_THRESHOLD")? {
            self.thresholds.pitch_threshold_degrees = v;
        }
        if let Some(v) = env_parse::<f64>("PROCTOR_MOUTH_OPEN_PIXELS")? {
            self.thresholds.mouth_open_pixels = v;
        }
        if let Some(v) = env_parse::<f32>("PROCTOR_PHONE_CONFIDENCE_MIN")? {
            self.thresholds.phone_confidence_min = v;
        }
        if let Some(secs) = env_parse::<u64>("PROCTOR_COOLDOWN_SECS")? {
            self.throttle.cooldown = Duration::from_secs(secs);
        }
        if let Some(raw) = env_string("PROCTOR_COOLDOWN_SCOPE") {
            self.throttle.scope = CooldownScope::parse(&raw)?;
        }
        if let Some(frames) = env_parse::<u32>("PROCTOR_SUSTAIN_FRAMES")? {
            self.throttle.min_sustained_frames = frames;
        }
        if let Some(workers) = env_parse::<usize>("PROCTOR_DISPATCH_WORKERS")? {
            self.dispatch.workers = workers;
        }
        if let Some(capacity) = env_parse::<usize>("PROCTOR_DISPATCH_QUEUE")? {
            self.dispatch.queue_capacity = capacity;
        }
        if let Some(url) = env_string("PROCTOR_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(fps) = env_parse::<u32>("PROCTOR_TARGET_FPS")? {
            self.source.target_fps = fps;
        }
        if let Some(backend) = env_string("PROCTOR_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_string("PROCTOR_REPLAY_PATH") {
            self.detector.replay_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.backend.api_key.trim().is_empty() {
            return Err(anyhow!(
                "backend api key is required (set PROCTOR_API_KEY or backend.api_key)"
            ));
        }
        self.backend_config()?;
        self.evidence_config()?;

        let t = &self.thresholds;
        for (name, value) in [
            ("yaw_threshold_degrees", t.yaw_threshold_degrees),
            ("pitch_threshold_degrees", t.pitch_threshold_degrees),
            ("mouth_open_pixels", t.mouth_open_pixels),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("threshold {} must be a positive number", name));
            }
        }
        if !(0.0..1.0).contains(&t.phone_confidence_min) {
            return Err(anyhow!("phone_confidence_min must be in [0, 1)"));
        }

        if self.throttle.cooldown.is_zero() {
            return Err(anyhow!("cooldown must be greater than zero"));
        }
        if self.throttle.min_sustained_frames == 0 {
            return Err(anyhow!("min_sustained_frames must be at least 1"));
        }
        self.dispatch.validate()?;
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        Ok(())
    }

    pub fn backend_config(&self) -> Result<BackendConfig> {
        BackendConfig::new(
            &self.backend.url,
            self.backend.api_key.clone(),
            self.backend.timeout,
        )
    }

    pub fn evidence_config(&self) -> Result<EvidenceConfig> {
        let base = self
            .evidence
            .public_base_url
            .as_deref()
            .unwrap_or(&self.backend.url);
        let mut cfg = EvidenceConfig::new(self.evidence.root.clone(), base)?;
        cfg.enabled = self.evidence.enabled;
        Ok(cfg)
    }

    pub fn throttle_state(&self) -> Result<ThrottleState> {
        ThrottleState::new(self.throttle.cooldown, self.throttle.scope)
    }
}

fn read_config_file(path: &Path) -> Result<ProctorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean, got '{}'", key, raw)),
    }
}
