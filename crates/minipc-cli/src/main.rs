#![deny(unsafe_code)]

//! minipc CLI: sample server and command-line client.

mod sample;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use minipc_config::AppConfig;
use minipc_core::{Link, LinkOptions, Request, Value, ident};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// minipc: minimal RPC over Unix-domain sockets.
#[derive(Parser)]
#[command(name = "minipc", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "minipc.toml")]
    config: PathBuf,

    /// Override the socket directory.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sample server exporting `sum` and `gettimeofday`.
    Serve {
        /// Link name; defaults to `server.name` from the config.
        #[arg(long)]
        name: Option<String>,
    },

    /// Call `sum` on a running server.
    Sum {
        a: i32,
        b: i32,
        #[arg(long)]
        name: Option<String>,
    },

    /// Call `gettimeofday` on a running server.
    Tod {
        #[arg(long)]
        name: Option<String>,
    },

    /// Send raw words to any function and print the raw response.
    Call {
        /// Identifier: `0x`-prefixed hex, or up to four ASCII characters.
        function: String,
        /// Argument words, decimal (possibly negative) or `0x` hex.
        #[arg(allow_negative_numbers = true)]
        words: Vec<String>,
        #[arg(long)]
        name: Option<String>,
        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;

    let filter = log_filter(cli.verbose, &config);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(dir) = &cli.base_dir {
        config.link.base_dir = dir.display().to_string();
    }

    match cli.command {
        Commands::Serve { name } => cmd_serve(&config, name)?,
        Commands::Sum { a, b, name } => cmd_sum(&config, name, a, b)?,
        Commands::Tod { name } => cmd_tod(&config, name)?,
        Commands::Call {
            function,
            words,
            name,
            json,
        } => cmd_call(&config, name, &function, &words, json)?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

fn cmd_serve(config: &AppConfig, name: Option<String>) -> Result<()> {
    let name = name.unwrap_or_else(|| config.server.name.clone());
    let mut server = Link::create_server_with(&name, 0, LinkOptions::from(&config.link))
        .with_context(|| format!("failed to start server {name:?}"))?;
    if config.logging.trace_to_stderr {
        server.set_log_sink(Some(Box::new(std::io::stderr())))?;
    }
    sample::export_all(&mut server)?;
    info!(name = %name, path = %server.socket_path()?.display(), "serving");

    let poll_timeout = Some(config.server.poll_timeout());
    loop {
        let events = server.server_action(poll_timeout)?;
        if events > 0 {
            debug!(events, clients = server.client_count()?, "handled events");
        }
    }
}

fn connect(config: &AppConfig, name: Option<String>) -> Result<Link> {
    let name = name.unwrap_or_else(|| config.server.name.clone());
    let mut client = Link::create_client_with(&name, 0, LinkOptions::from(&config.link))
        .with_context(|| format!("failed to connect to {name:?}"))?;
    if config.logging.trace_to_stderr {
        client.set_log_sink(Some(Box::new(std::io::stderr())))?;
    }
    Ok(client)
}

fn cmd_sum(config: &AppConfig, name: Option<String>, a: i32, b: i32) -> Result<()> {
    let mut client = connect(config, name)?;
    let value = client.invoke(&sample::sum_prototype(), &[Value::Int32(a), Value::Int32(b)])?;
    match value {
        Value::Int32(sum) => println!("{sum}"),
        other => bail!("unexpected return value {other:?}"),
    }
    Ok(())
}

fn cmd_tod(config: &AppConfig, name: Option<String>) -> Result<()> {
    let mut client = connect(config, name)?;
    let value = client.invoke(&sample::tod_prototype(), &[])?;
    let (secs, micros) = value
        .as_bytes()
        .and_then(sample::decode_timeval)
        .with_context(|| format!("unexpected return value {value:?}"))?;
    println!("{secs}.{micros:06}");
    Ok(())
}

fn cmd_call(
    config: &AppConfig,
    name: Option<String>,
    function: &str,
    words: &[String],
    json: bool,
) -> Result<()> {
    let id = parse_function(function)?;
    let args = words
        .iter()
        .map(|w| parse_word(w))
        .collect::<Result<Vec<_>>>()?;

    let mut client = connect(config, name)?;
    let response = client.call_raw(&Request::new(id, args))?;
    if json {
        let out = serde_json::json!({
            "id": response.id,
            "status": format!("{:?}", response.status),
            "payload": response.payload,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        let payload: Vec<String> = response.payload.iter().map(|w| format!("{w:#010x}")).collect();
        println!("{:#010x} {:?} [{}]", response.id, response.status, payload.join(" "));
    }
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        println!("{}", config.to_toml()?);
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
    } else {
        debug!(path = %path.display(), "config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

/// `-v` flags win over `logging.level`; `RUST_LOG` wins over both.
fn log_filter(verbose: u8, config: &AppConfig) -> &str {
    match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

fn parse_function(s: &str) -> Result<u32> {
    if let Some(hex) = s.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16).with_context(|| format!("bad identifier {s:?}"));
    }
    if s.is_empty() || s.len() > 4 || !s.is_ascii() {
        bail!("identifier {s:?} must be 0x-hex or one to four ASCII characters");
    }
    Ok(ident(s.as_bytes()))
}

fn parse_word(s: &str) -> Result<u32> {
    if let Some(hex) = s.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16).with_context(|| format!("bad word {s:?}"));
    }
    if s.starts_with('-') {
        return s
            .parse::<i32>()
            .map(|v| v as u32)
            .with_context(|| format!("bad word {s:?}"));
    }
    s.parse::<u32>().with_context(|| format!("bad word {s:?}"))
}
