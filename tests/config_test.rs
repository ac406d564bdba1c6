use nats_tracing::config::{Config, DEFAULT_NATS_URL, DEFAULT_OTEL_ENDPOINT};
use nats_tracing::consumer::AckPolicy;
use secrecy::ExposeSecret;

// Environment variables are process-wide, so every case runs in one test.
#[test]
fn config_from_env_applies_defaults_and_overrides() {
    unsafe {
        std::env::remove_var("NATS_URL");
        std::env::remove_var("NATS_TOKEN");
        std::env::remove_var("OTEL_ENDPOINT");
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("MESSAGING_CONFIG");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.nats_url, DEFAULT_NATS_URL);
    assert_eq!(config.otel_endpoint, DEFAULT_OTEL_ENDPOINT);
    assert_eq!(config.log_level, "info");
    assert!(config.nats_token.is_none());
    assert_eq!(config.messaging.stream_name, "download");

    let path = std::env::temp_dir().join(format!("nats-tracing-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "stream_name = \"uploads\"\nsubject_prefix = \"events.upload\"\nack_policy = \"on_success\"\n",
    )
    .unwrap();

    unsafe {
        std::env::set_var("NATS_URL", "nats://localhost:4222");
        std::env::set_var("NATS_TOKEN", "s3cret");
        std::env::set_var("LOG_LEVEL", "debug");
        std::env::set_var("MESSAGING_CONFIG", &path);
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.nats_url, "nats://localhost:4222");
    assert_eq!(
        config.nats_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("s3cret".to_string())
    );
    assert!(!format!("{config:?}").contains("s3cret"));
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.messaging.stream_name, "uploads");
    assert_eq!(config.messaging.subject_prefix, "events.upload");
    assert_eq!(config.messaging.ack_policy, AckPolicy::OnSuccess);

    unsafe {
        std::env::set_var("MESSAGING_CONFIG", path.with_extension("missing"));
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("NATS_URL");
        std::env::remove_var("NATS_TOKEN");
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("MESSAGING_CONFIG");
    }
    std::fs::remove_file(&path).ok();
}
