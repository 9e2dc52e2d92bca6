#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use alice_relay::agent::{self, EchoHandler};
use alice_relay::config::{Config, CONFIG_DIR_ENV};
use alice_relay::gateway;
use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// Relay between a Yandex Alice skill and a PC agent.
#[derive(Parser, Debug)]
#[command(name = "alice-relay")]
#[command(version)]
#[command(about = "Forward Alice voice commands to a PC agent over WebSocket.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay gateway (Alice webhook + agent WebSocket)
    #[command(long_about = "\
Start the relay gateway.

Serves POST /alice/webhook for the Yandex Alice skill, GET /ws for the \
PC agent, and GET /health. TLS is enabled when both TLS_CERT and TLS_KEY \
(or [gateway] tls_cert / tls_key) are set.

Examples:
  alice-relay gateway                 # use config defaults
  alice-relay gateway -p 9000
  alice-relay gateway --host 127.0.0.1 -p 0")]
    Gateway {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Run a PC agent that links to the relay and echoes commands back
    #[command(long_about = "\
Run a PC agent.

Connects to the relay WebSocket, answers every command with its own text, \
and reconnects after [agent] reconnect_delay_secs when the link drops.

Examples:
  alice-relay agent
  alice-relay agent --server-url wss://relay.example.com/ws")]
    Agent {
        /// Relay WebSocket URL; defaults to config agent.server_url
        #[arg(long)]
        server_url: Option<String>,
    },

    /// Manage configuration
    #[command(long_about = "\
Manage alice-relay configuration.

Use 'schema' to dump the full JSON Schema for config.toml, which \
documents every available key, type, and default value.

Examples:
  alice-relay config schema
  alice-relay config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `alice-relay`.

Examples:
  source <(alice-relay completions bash)
  alice-relay completions zsh > ~/.zfunc/_alice-relay")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Both ring and webpki roots are compiled in; pick the provider explicitly.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var(CONFIG_DIR_ENV, config_dir);
    }

    match cli.command {
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(Config);
                println!("{}", serde_json::to_string_pretty(&schema)?);
                Ok(())
            }
        },

        Commands::Gateway { port, host } => {
            init_logging()?;
            let config = Config::load().await?;
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting Alice relay on {host} (random port)");
            } else {
                info!("Starting Alice relay on {host}:{port}");
            }
            gateway::run_gateway(&host, port, config).await
        }

        Commands::Agent { server_url } => {
            init_logging()?;
            let mut agent_config = Config::load().await?.agent;
            if let Some(url) = server_url {
                if url.trim().is_empty() {
                    bail!("--server-url cannot be empty");
                }
                agent_config.server_url = url;
            }
            agent::run(agent_config, Arc::new(EchoHandler)).await
        }

        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout().lock();
            write_shell_completion(shell, &mut stdout)
        }
    }
}

/// Respects RUST_LOG, defaults to INFO.
fn init_logging() -> Result<()> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn gateway_accepts_port_and_host() {
        let cli = Cli::try_parse_from(["alice-relay", "gateway", "-p", "0", "--host", "127.0.0.1"])
            .expect("gateway invocation should parse");

        match cli.command {
            Commands::Gateway { port, host } => {
                assert_eq!(port, Some(0));
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
            }
            other => panic!("expected gateway command, got {other:?}"),
        }
    }

    #[test]
    fn config_dir_is_global() {
        let cli = Cli::try_parse_from([
            "alice-relay",
            "agent",
            "--config-dir",
            "/tmp/relay",
            "--server-url",
            "ws://10.0.0.2:8443/ws",
        ])
        .expect("agent invocation should parse");

        assert_eq!(cli.config_dir.as_deref(), Some("/tmp/relay"));
        match cli.command {
            Commands::Agent { server_url } => {
                assert_eq!(server_url.as_deref(), Some("ws://10.0.0.2:8443/ws"));
            }
            other => panic!("expected agent command, got {other:?}"),
        }
    }

    #[test]
    fn completions_cli_parses_supported_shells() {
        for shell in ["bash", "fish", "zsh", "powershell", "elvish"] {
            let cli = Cli::try_parse_from(["alice-relay", "completions", shell])
                .expect("completions invocation should parse");
            assert!(matches!(cli.command, Commands::Completions { .. }));
        }
    }

    #[test]
    fn completion_generation_mentions_binary_name() {
        let mut output = Vec::new();
        write_shell_completion(CompletionShell::Bash, &mut output)
            .expect("completion generation should succeed");
        let script = String::from_utf8(output).expect("completion output should be valid UTF-8");
        assert!(script.contains("alice-relay"));
    }
}
