// Copyright (c) 2025 Zensical and contributors

// SPDX-License-Identifier: MIT
// Third-party contributions licensed under DCO

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NON-INFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

// ----------------------------------------------------------------------------

//! WebSocket relay server.

use anyhow::Context as _;
use clap::Parser;
use kiln_serve::{Config, Engine};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod relay;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// WebSocket relay server.
///
/// Every text message a client sends is relayed to all other clients, and
/// named events sent as `{"event": "<name>", "data": <data>}` are relayed to
/// all clients including the sender.
#[derive(Debug, Parser)]
#[command(author, version)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Host to bind to, overriding the configuration file.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind to, overriding the configuration file.
    #[arg(short, long)]
    port: Option<u16>,
    /// Log filter, used unless `RUST_LOG` is set.
    #[arg(long, default_value = "info")]
    log: String,
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Loads the configuration, applying command line overrides.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let content = fs::read_to_string(path).with_context(|| {
                format!("failed to read {}", path.display())
            })?;
            toml::from_str(&content).with_context(|| {
                format!("failed to parse {}", path.display())
            })?
        }
        None => Config::default(),
    };

    // Command line arguments take precedence
    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

/// Sets up logging, preferring the filter from the environment.
fn setup_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_tracing(&args.log);
    let config = load_config(&args)?;

    // Create engine and run until stopped
    let mut engine = Engine::new(relay::server(&config), &config)?;
    engine
        .listen(config.addr())
        .with_context(|| format!("failed to listen on {}", config.addr()))?;
    engine.run()?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("kiln-{}-{name}.toml", process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_config_defaults() {
        let args = Args::try_parse_from(["kiln"]).unwrap();
        assert_eq!(load_config(&args).unwrap(), Config::default());
    }

    #[test]
    fn test_load_config_file() {
        let path = write_config("file", "port = 9000\nmax_frame_size = 64\n");
        let config = path.to_str().unwrap();
        let args = Args::try_parse_from(["kiln", "--config", config]).unwrap();
        let config = load_config(&args).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_frame_size, 64);
        assert_eq!(config.host, Config::default().host);
    }

    #[test]
    fn test_load_config_overrides() {
        let content = "host = \"0.0.0.0\"\nport = 9000\n";
        let path = write_config("overrides", content);
        let config = path.to_str().unwrap();
        let args = Args::try_parse_from([
            "kiln", "--config", config, "--host", "::1", "-p", "9001",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.host, "::1");
        assert_eq!(config.port, 9001);
    }

    #[test]
    fn test_load_config_errors() {
        let path = write_config("invalid", "port = \"none\"\n");
        let config = path.to_str().unwrap();
        let args = Args::try_parse_from(["kiln", "--config", config]).unwrap();
        let err = load_config(&args).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(err.to_string().starts_with("failed to parse"));

        // Missing files are reported as well
        let missing = "/nonexistent/kiln.toml";
        let args = Args::try_parse_from(["kiln", "-c", missing]).unwrap();
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().starts_with("failed to read"));
    }
}
