#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use crate::{config::ServerConfig, types::MessengerError};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.outbound_queue_capacity, 1024);
        assert_eq!(config.client_id_param, "clientId");
        assert_eq!(
            config.slow_listener_threshold_duration(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = ServerConfig::default()
            .bind_addr("127.0.0.1:7000".parse().unwrap())
            .outbound_queue_capacity(8)
            .client_id_param("id")
            .slow_listener_threshold(Duration::from_secs(2));

        assert_eq!(config.bind_addr.port(), 7000);
        assert_eq!(config.outbound_queue_capacity, 8);
        assert_eq!(config.client_id_param, "id");
        assert_eq!(config.slow_listener_threshold_ms, 2000);
    }

    #[test]
    fn test_from_env_overlays_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("WSMESSENGER_BIND_ADDR", "127.0.0.1:9100"),
            ("WSMESSENGER_OUTBOUND_QUEUE_CAPACITY", " 64 "),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.outbound_queue_capacity, 64);
        assert_eq!(config.client_id_param, "clientId");
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let err = ServerConfig::from_lookup(lookup(&[("WSMESSENGER_BIND_ADDR", "nowhere")]))
            .unwrap_err();
        assert!(matches!(err, MessengerError::Config(ref msg) if msg.contains("WSMESSENGER_BIND_ADDR")));

        let err = ServerConfig::from_lookup(lookup(&[(
            "WSMESSENGER_OUTBOUND_QUEUE_CAPACITY",
            "0",
        )]))
        .unwrap_err();
        assert!(matches!(err, MessengerError::Config(_)));
    }

    #[test]
    fn test_from_json() {
        let config = ServerConfig::from_json(
            r#"{ "bind_addr": "127.0.0.1:9200", "slow_listener_threshold_ms": 50 }"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9200);
        assert_eq!(config.slow_listener_threshold_ms, 50);
        assert_eq!(config.outbound_queue_capacity, 1024);

        assert!(ServerConfig::from_json(r#"{ "unknown": 1 }"#).is_err());
        assert!(ServerConfig::from_json(r#"{ "client_id_param": " " }"#).is_err());
    }
}
