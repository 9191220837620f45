use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use proctor_kernel::config::ProctorConfig;
use proctor_kernel::CooldownScope;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PROCTOR_CONFIG",
        "PROCTOR_BACKEND_URL",
        "PROCTOR_API_KEY",
        "PROCTOR_TIMEOUT_SECS",
        "PROCTOR_EVIDENCE_DIR",
        "PROCTOR_PUBLIC_BASE_URL",
        "PROCTOR_CAPTURE_EVIDENCE",
        "PROCTOR_YAW_THRESHOLD",
        "PROCTOR_PITCH_THRESHOLD",
        "PROCTOR_MOUTH_OPEN_PIXELS",
        "PROCTOR_PHONE_CONFIDENCE_MIN",
        "PROCTOR_COOLDOWN_SECS",
        "PROCTOR_COOLDOWN_SCOPE",
        "PROCTOR_SUSTAIN_FRAMES",
        "PROCTOR_DISPATCH_WORKERS",
        "PROCTOR_DISPATCH_QUEUE",
        "PROCTOR_SOURCE_URL",
        "PROCTOR_TARGET_FPS",
        "PROCTOR_DETECTOR",
        "PROCTOR_REPLAY_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_need_only_an_api_key() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PROCTOR_API_KEY", "k");

    let cfg = ProctorConfig::load().expect("load config");

    assert_eq!(cfg.backend.url, "http://localhost:8080");
    assert_eq!(cfg.backend.timeout, Duration::from_secs(5));
    assert_eq!(cfg.thresholds.yaw_threshold_degrees, 25.0);
    assert_eq!(cfg.thresholds.pitch_threshold_degrees, 15.0);
    assert_eq!(cfg.thresholds.mouth_open_pixels, 25.0);
    assert_eq!(cfg.thresholds.phone_confidence_min, 0.5);
    assert_eq!(cfg.throttle.cooldown, Duration::from_secs(4));
    assert_eq!(cfg.throttle.scope, CooldownScope::Global);
    assert_eq!(cfg.throttle.min_sustained_frames, 1);
    assert_eq!(cfg.source.url, "stub://camera");
    assert_eq!(cfg.detector.backend, "stub");
    assert!(cfg.evidence.enabled);

    let evidence = cfg.evidence_config().expect("evidence config");
    assert_eq!(evidence.public_base_url.as_str(), "http://localhost:8080/");

    clear_env();
}

#[test]
fn missing_api_key_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = ProctorConfig::load().unwrap_err();
    assert!(err.to_string().contains("PROCTOR_API_KEY"));

    clear_env();
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "backend": { "url": "http://grading:9090", "api_key": "from-file", "timeout_secs": 3 },
        "evidence": { "root": "/srv/uploads", "public_base_url": "https://cdn.example", "enabled": true },
        "thresholds": { "yaw_threshold_degrees": 20.0, "mouth_open_pixels": 30.0 },
        "throttle": { "cooldown_secs": 3, "scope": "per_kind", "min_sustained_frames": 5 },
        "dispatch": { "workers": 4, "queue_capacity": 32 },
        "source": { "url": "http://camera.local/stream", "target_fps": 15 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PROCTOR_CONFIG", file.path());
    std::env::set_var("PROCTOR_API_KEY", "from-env");
    std::env::set_var("PROCTOR_PITCH_THRESHOLD", "12.5");
    std::env::set_var("PROCTOR_CAPTURE_EVIDENCE", "off");

    let cfg = ProctorConfig::load().expect("load config");

    assert_eq!(cfg.backend.url, "http://grading:9090");
    assert_eq!(cfg.backend.api_key, "from-env");
    assert_eq!(cfg.backend.timeout, Duration::from_secs(3));
    assert_eq!(cfg.evidence.root.to_str(), Some("/srv/uploads"));
    assert!(!cfg.evidence.enabled);
    assert_eq!(cfg.thresholds.yaw_threshold_degrees, 20.0);
    assert_eq!(cfg.thresholds.pitch_threshold_degrees, 12.5);
    assert_eq!(cfg.thresholds.mouth_open_pixels, 30.0);
    assert_eq!(cfg.throttle.scope, CooldownScope::PerKind);
    assert_eq!(cfg.throttle.min_sustained_frames, 5);
    assert_eq!(cfg.dispatch.workers, 4);
    assert_eq!(cfg.dispatch.queue_capacity, 32);
    assert_eq!(cfg.source.target_fps, 15);

    let evidence = cfg.evidence_config().expect("evidence config");
    assert_eq!(evidence.public_base_url.as_str(), "https://cdn.example/");
    assert!(!evidence.enabled);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[backend]
api_key = "toml-key"

[throttle]
cooldown_secs = 10

[detector]
backend = "replay"
replay_path = "session.jsonl"
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());

    let cfg = ProctorConfig::load().expect("load config");
    assert_eq!(cfg.backend.api_key, "toml-key");
    assert_eq!(cfg.throttle.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.detector.backend, "replay");
    assert_eq!(
        cfg.detector.replay_path.as_deref().and_then(|p| p.to_str()),
        Some("session.jsonl")
    );

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("PROCTOR_COOLDOWN_SECS", "0"),
        ("PROCTOR_COOLDOWN_SCOPE", "sometimes"),
        ("PROCTOR_YAW_THRESHOLD", "-3"),
        ("PROCTOR_PHONE_CONFIDENCE_MIN", "1.5"),
        ("PROCTOR_DISPATCH_WORKERS", "0"),
        ("PROCTOR_BACKEND_URL", "not a url"),
        ("PROCTOR_TIMEOUT_SECS", "soon"),
        ("PROCTOR_CAPTURE_EVIDENCE", "maybe"),
    ] {
        clear_env();
        std::env::set_var("PROCTOR_API_KEY", "k");
        std::env::set_var(key, value);
        assert!(
            ProctorConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }

    clear_env();
}
