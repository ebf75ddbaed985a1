//! `http` reporter

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::common::Result;
use crate::config::{parse_duration, ConfigNode};
use crate::error::Error;
use crate::reporter::{HttpReporter, HttpRequest, SharedReporter};

use super::{Provider, ProviderBuilder};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpReporterConfig {
    request: RequestConfig,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    enable_cookies: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestConfig {
    url: String,
    #[serde(default)]
    method: String,
    /// Header name to its values, one line per value.
    #[serde(default)]
    headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    body: Option<String>,
}

pub(super) fn register(builder: ProviderBuilder) -> ProviderBuilder {
    builder.reporter("http", http_reporter)
}

fn http_reporter(_: &Provider, node: ConfigNode) -> Result<SharedReporter> {
    let config: HttpReporterConfig = node.decode_as("http reporter config")?;
    if config.enable_cookies {
        // A first-supported list can fall back to a cookieless reporter.
        return Err(Error::Unsupported("reporter cookies are not supported".into()));
    }

    let interval = match &config.interval {
        Some(text) => parse_duration("interval", text)?,
        None => Duration::ZERO,
    };
    Ok(Arc::new(HttpReporter::new(http_request(config.request)?, interval)))
}

fn http_request(config: RequestConfig) -> Result<HttpRequest> {
    let headers = config
        .headers
        .into_iter()
        .flat_map(|(name, values)| values.into_iter().map(move |v| (name.clone(), v)))
        .collect();
    HttpRequest::new(&config.url, &config.method, headers, config.body)
}
