//! Hopwire - check a tunnel config and optionally dial through it

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hopwire::config::{self, ConfigNode};
use hopwire::error::{Error, Result};
use hopwire::{compile_tunnel_config, Address, Client, PlatformError, Provider};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    info!("Hopwire v{} checking config", env!("CARGO_PKG_VERSION"));

    let compiled = read_config(args.config.as_deref())
        .map_err(PlatformError::from)
        .and_then(|node| compile_tunnel_config(&Provider::new(), node));
    let client = match compiled {
        Ok((client, summary)) => {
            println!("{}", serde_json::to_string_pretty(&summary).map_err(|e| Error::Config(e.to_string()))?);
            client
        }
        Err(err) => {
            report(&err);
            std::process::exit(1);
        }
    };

    if let Some(target) = args.dial {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let session = client.start_session();
            let result = match tokio::time::timeout(DIAL_TIMEOUT, dial_check(&client, &target)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            };
            session.end().await;
            result
        })?;
    }

    Ok(())
}

/// `RUST_LOG` directives, or `info` when unset or unparsable.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// The config file, or stdin when no file is given.
fn read_config(path: Option<&Path>) -> Result<ConfigNode> {
    match path {
        Some(path) => config::load(path),
        None => {
            let mut text = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut text)?;
            config::decode(text.trim())
        }
    }
}

fn report(err: &PlatformError) {
    error!("{}", err);
    println!("{}", err.to_json());
}

/// Open a stream to `target`, send an empty HTTP request and log how much
/// came back.
async fn dial_check(client: &Client, target: &str) -> Result<()> {
    info!("Dialing {} via {:?}", target, client.first_hop());
    let mut stream = client.dial_stream(target).await?;

    let host = Address::parse(target)?.host();
    let request = format!("HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let first_line = String::from_utf8_lossy(&buf[..n]);
    let first_line = first_line.lines().next().unwrap_or_default();
    info!("Received {} bytes from {}: {}", n, target, first_line);
    Ok(())
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    dial: Option<String>,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut dial = None;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--dial" => {
                    if i + 1 < args.len() {
                        dial = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self { config, dial, version }
    }
}

fn print_help() {
    println!(r#"Hopwire - compile and check outbound tunnel configs

USAGE:
    hopwire [OPTIONS] [FILE]

OPTIONS:
    -c, --config <FILE>     Tunnel config to read (default: stdin)
    --dial <HOST:PORT>      After compiling, open a stream to HOST:PORT through the tunnel
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    hopwire -c tunnel.yaml
    echo 'ss://...' | hopwire
    hopwire tunnel.yaml --dial example.com:80

ENVIRONMENT:
    RUST_LOG                Log filter, e.g. debug or hopwire=trace (default: info)
"#);
}

fn print_version() {
    println!("Hopwire v{}", env!("CARGO_PKG_VERSION"));
    println!("Outbound path compiler for Shadowsocks, WebSocket and IP-routed transports");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(None).to_string(), "info");
        assert_eq!(log_filter(Some("hopwire=trace".into())).to_string(), "hopwire=trace");
        assert_eq!(log_filter(Some("hopwire=loud".into())).to_string(), "info");
    }

    #[test]
    fn test_config_file_compiles_once_into_client_and_summary() {
        let path = std::env::temp_dir().join(format!("hopwire-main-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "transport: {$type: shadowsocks, endpoint: example.com:4321, cipher: chacha20-ietf-poly1305, secret: SECRET}\n",
        )
        .unwrap();
        let node = read_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        let (client, summary) = compile_tunnel_config(&Provider::new(), node).unwrap();
        assert_eq!(summary.first_hop, "example.com:4321");
        assert_eq!(client.first_hop(), summary.first_hop);
        assert!(!client.has_reporter());

        let err = read_config(Some(Path::new("/nonexistent/hopwire.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{}", err);
    }
}
