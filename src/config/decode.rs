//! Text to [`ConfigNode`].
//!
//! YAML is a superset of the JSON forms accepted here, so a single
//! `serde_yaml` pass handles both. Anchors and aliases are expanded by the
//! parser; `<<` merge keys are applied before conversion, so the core only
//! ever sees a tree.

use std::path::Path;
use std::time::Duration;

use tracing::trace;

use super::ConfigNode;
use crate::error::{Error, Result};

/// Decode config text into a node tree.
pub fn decode(text: &str) -> Result<ConfigNode> {
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| Error::Decode(format!("config is not valid YAML: {}", e)))?;
    value
        .apply_merge()
        .map_err(|e| Error::Decode(format!("failed to apply merge keys: {}", e)))?;
    let node = ConfigNode::try_from(value)?;
    trace!("Decoded config root of kind {}", node.kind_name());
    Ok(node)
}

/// Read and decode a config file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<ConfigNode> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
    decode(&content)
}

/// Parse a duration field such as `24h` or `1h 30m`.
pub fn parse_duration(path: &str, text: &str) -> Result<Duration> {
    humantime::parse_duration(text.trim())
        .map_err(|e| Error::schema(path, format!("{:?} is not a duration: {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_and_url() {
        let node = decode(r#"{"server": "example.com", "server_port": 4321}"#).unwrap();
        assert_eq!(node.get("server").and_then(|v| v.as_str()), Some("example.com"));

        let node = decode("ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpTRUNSRVQ@example.com:4321/").unwrap();
        assert!(node.as_str().unwrap().starts_with("ss://"));
    }

    #[test]
    fn test_decode_expands_anchors_and_merges() {
        let text = r#"
entry: &entry
  $type: shadowsocks
  endpoint: entry.example.com:4321
  cipher: chacha20-ietf-poly1305
  secret: SECRET
exit:
  <<: *entry
  endpoint: exit.example.com:4321
"#;
        let node = decode(text).unwrap();
        let exit = node.get("exit").unwrap();
        assert_eq!(exit.get("cipher").and_then(|v| v.as_str()), Some("chacha20-ietf-poly1305"));
        assert_eq!(exit.get("endpoint").and_then(|v| v.as_str()), Some("exit.example.com:4321"));
        assert!(!exit.has_key("<<"));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("interval", "24h").unwrap(), Duration::from_secs(24 * 3600));
        assert_eq!(parse_duration("interval", " 1h 30m ").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("interval", "250ms").unwrap(), Duration::from_millis(250));
        let err = parse_duration("interval", "daily").unwrap_err();
        assert!(err.to_string().starts_with("invalid interval:"), "{}", err);
    }

    #[test]
    fn test_load_reads_files() {
        let path = std::env::temp_dir().join(format!("hopwire-load-{}.yaml", std::process::id()));
        std::fs::write(&path, "transport: {$type: block}\n").unwrap();
        let node = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(node.get("transport").and_then(|t| t.get("$type")).and_then(|t| t.as_str()), Some("block"));

        let err = load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_decode_rejects_malformed_text() {
        let err = decode("transport: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
