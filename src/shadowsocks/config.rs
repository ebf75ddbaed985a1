//! Shadowsocks config normalization
//!
//! Four surface forms collapse into one [`ShadowsocksConfig`]:
//!
//! ```text
//! ss://BASE64URL(cipher:secret)@host:port/?prefix=..   SIP002 URL
//! ss://BASE64(cipher:secret@host:port)                 legacy URL
//! {server, server_port, method, password, prefix}      legacy object
//! {endpoint, cipher, secret, prefix}                   explicit object
//! ```

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use tracing::trace;
use url::Url;

use crate::common::Address;
use crate::config::ConfigNode;
use crate::error::{Error, Result};

use super::cipher::{CipherKind, EncryptionKey};

/// Normalized Shadowsocks settings. `endpoint` is still a config node and is
/// resolved through the endpoint registry.
const SCHEME: &str = "ss://";

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowsocksConfig {
    pub endpoint: ConfigNode,
    pub cipher: String,
    pub secret: String,
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExplicitForm {
    endpoint: ConfigNode,
    cipher: String,
    secret: String,
    #[serde(default)]
    prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyForm {
    #[serde(alias = "host")]
    server: String,
    #[serde(alias = "port")]
    server_port: u64,
    #[serde(alias = "cipher")]
    method: String,
    #[serde(alias = "secret")]
    password: String,
    #[serde(default)]
    prefix: String,
}

impl ShadowsocksConfig {
    /// Accept any of the four forms.
    pub fn parse(node: &ConfigNode) -> Result<Self> {
        let config = match node {
            ConfigNode::String(text) => Self::from_url(text)?,
            ConfigNode::Mapping(_) if node.has_key("endpoint") => {
                let form: ExplicitForm = node.decode_as("shadowsocks config")?;
                Self {
                    endpoint: form.endpoint,
                    cipher: form.cipher,
                    secret: form.secret,
                    prefix: form.prefix,
                }
            }
            ConfigNode::Mapping(_) if node.has_key("server") || node.has_key("host") => {
                let form: LegacyForm = node.decode_as("shadowsocks config")?;
                let port = u16::try_from(form.server_port)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| Error::Config(format!("invalid server_port {}", form.server_port)))?;
                Self {
                    endpoint: ConfigNode::String(join_host_port(&form.server, port)),
                    cipher: form.method,
                    secret: form.password,
                    prefix: form.prefix,
                }
            }
            ConfigNode::Mapping(_) => {
                return Err(Error::Config("shadowsocks config missing endpoint".into()));
            }
            other => {
                return Err(Error::Config(format!(
                    "shadowsocks config must be a string or mapping, got {}",
                    other.kind_name()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse an `ss://` URL, SIP002 first, then the legacy base64 form.
    /// The scheme is case-insensitive.
    pub fn from_url(text: &str) -> Result<Self> {
        let text = text.trim();
        let rest = match text.get(..SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => &text[SCHEME.len()..],
            _ => return Err(Error::Config(format!("{:?} is not an ss:// URL", redact(text)))),
        };
        let body = rest.split('#').next().unwrap_or_default();

        let sip002_err = match Self::from_sip002(text) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };
        match Self::from_legacy_url(body) {
            Ok(config) => Ok(config),
            Err(legacy_err) => {
                trace!("ss:// URL is not SIP002 ({}) nor legacy ({})", sip002_err, legacy_err);
                // Report against the form the URL most looks like.
                let authority = body.split(['?', '/']).next().unwrap_or_default();
                Err(if authority.contains('@') { sip002_err } else { legacy_err })
            }
        }
    }

    fn from_sip002(text: &str) -> Result<Self> {
        let url = Url::parse(text).map_err(|e| Error::Config(format!("invalid ss:// URL: {}", e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config("ss:// URL is missing a host".into()))?;
        let port = url
            .port()
            .ok_or_else(|| Error::Config("ss:// URL is missing a port".into()))?;
        let endpoint = format!("{}:{}", host, port);

        let user = percent_decode(url.username())?;
        let (cipher, secret) = match url.password() {
            Some(password) => (user, percent_decode(password)?),
            None => {
                let userinfo = decode_base64(&user).unwrap_or(user);
                split_userinfo(&userinfo)?
            }
        };

        let prefix = url
            .query_pairs()
            .find(|(k, _)| k == "prefix")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        Ok(Self {
            endpoint: ConfigNode::String(endpoint),
            cipher,
            secret,
            prefix,
        })
    }

    fn from_legacy_url(body: &str) -> Result<Self> {
        let (encoded, query) = match body.split_once('?') {
            Some((encoded, query)) => (encoded.trim_end_matches('/'), Some(query)),
            None => (body.trim_end_matches('/'), None),
        };
        let decoded = decode_base64(encoded)
            .ok_or_else(|| Error::Config("ss:// URL is neither SIP002 nor base64".into()))?;
        let (userinfo, endpoint) = decoded
            .rsplit_once('@')
            .ok_or_else(|| Error::Config("legacy ss:// URL is missing '@'".into()))?;
        let (cipher, secret) = split_userinfo(userinfo)?;

        let prefix = query
            .into_iter()
            .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
            .find(|(k, _)| k == "prefix")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        Ok(Self {
            endpoint: ConfigNode::String(endpoint.to_string()),
            cipher,
            secret,
            prefix,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.cipher.is_empty() {
            return Err(Error::Config("cipher must not be empty".into()));
        }
        if self.secret.is_empty() {
            return Err(Error::Config("secret must not be empty".into()));
        }
        let kind = CipherKind::from_name(&self.cipher)?;
        if let Some(address) = self.endpoint.as_str() {
            Address::parse(address)?;
        }
        let prefix = self.prefix_bytes()?;
        if prefix.len() > kind.salt_size() {
            return Err(Error::Config(format!(
                "prefix of {} bytes does not fit in a {}-byte salt",
                prefix.len(),
                kind.salt_size()
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> Result<EncryptionKey> {
        EncryptionKey::new(&self.cipher, &self.secret)
    }

    /// The salt prefix as raw bytes. Each character stands for one byte, so
    /// only U+0000..=U+00FF are allowed.
    pub fn prefix_bytes(&self) -> Result<Vec<u8>> {
        self.prefix
            .chars()
            .map(|c| u8::try_from(u32::from(c)).map_err(|_| Error::Config(format!("character out of range: {}", u32::from(c)))))
            .collect()
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn split_userinfo(userinfo: &str) -> Result<(String, String)> {
    let (cipher, secret) = userinfo
        .split_once(':')
        .ok_or_else(|| Error::Config("ss:// user info must be cipher:secret".into()))?;
    Ok((cipher.to_string(), secret.to_string()))
}

fn decode_base64(text: &str) -> Option<String> {
    [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Decode `%XX` escapes in URL user info.
fn percent_decode(text: &str) -> Result<String> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| Error::Config("ss:// user info is not UTF-8".into()))
}

/// Keep URLs with credentials out of error messages.
fn redact(text: &str) -> String {
    match text.split_once("://") {
        Some((scheme, _)) => format!("{}://…", scheme),
        None => "…".to_string(),
    }
}
