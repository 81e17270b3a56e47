use std::time::Duration;
use warden::config::{Config, ReconnectConfig};

#[test]
fn test_reconnect_delay_doubles_up_to_cap() {
    let reconnect = ReconnectConfig::default();

    assert_eq!(reconnect.delay_for(1), Duration::from_millis(1000));
    assert_eq!(reconnect.delay_for(2), Duration::from_millis(2000));
    assert_eq!(reconnect.delay_for(3), Duration::from_millis(4000));
    assert_eq!(reconnect.delay_for(4), Duration::from_millis(5000));
    assert_eq!(reconnect.delay_for(60), Duration::from_millis(5000));
}

#[test]
fn test_live_update_url_follows_api_url() {
    let mut config = Config {
        api_url: "https://portal.example.org/".to_string(),
        ..Config::default()
    };
    assert_eq!(config.api_base(), "https://portal.example.org");
    assert_eq!(config.live_update_url(), "wss://portal.example.org/socket.io/?EIO=4&transport=websocket");

    config.api_url = "http://localhost:8001".to_string();
    assert_eq!(config.live_update_url(), "ws://localhost:8001/socket.io/?EIO=4&transport=websocket");

    config.ws_url = Some("ws://push.internal:9000/live".to_string());
    assert_eq!(config.live_update_url(), "ws://push.internal:9000/live");
}

#[test]
fn test_partial_config_file_uses_defaults() {
    let config: Config = toml::from_str(
        r#"
api_url = "http://portal.test"

[reconnect]
max_attempts = 3
"#,
    )
    .unwrap();

    assert_eq!(config.api_url, "http://portal.test");
    assert_eq!(config.request_timeout_seconds, 30);
    assert_eq!(config.reconnect.max_attempts, 3);
    assert_eq!(config.reconnect.initial_delay_ms, 1000);
    assert!(config.credentials_path.ends_with("credentials"));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = Config::default();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let parsed: Config = toml::from_str(&rendered).unwrap();

    assert_eq!(parsed.api_url, config.api_url);
    assert_eq!(parsed.reconnect, config.reconnect);
}
