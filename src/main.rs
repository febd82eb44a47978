// ABOUTME: Entry point for the halyard CLI application.
// ABOUTME: Builds connections from flags and dispatches run/sudo/forward.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use halyard::{
    CommandOutput, Config, Connection, Gateway, Group, LocalForward, Result, RunOptions,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let gateway = match (&cli.gateway, &cli.proxy_command) {
        (Some(host), _) => {
            let mut builder = Connection::builder(host).config(config.clone());
            if let Some(identity) = &cli.identity {
                builder = builder.key_path(identity);
            }
            Some(Gateway::Chain(Arc::new(builder.build()?)))
        }
        (None, Some(command)) => Some(Gateway::ProxyCommand(command.clone())),
        (None, None) => None,
    };

    let connections = cli
        .hosts
        .iter()
        .map(|host| {
            let mut builder = Connection::builder(host).config(config.clone());
            if let Some(port) = cli.port {
                builder = builder.port(port);
            }
            if let Some(identity) = &cli.identity {
                builder = builder.key_path(identity);
            }
            if let Some(gateway) = &gateway {
                builder = builder.gateway(gateway.clone());
            }
            builder.build()
        })
        .collect::<Result<Vec<_>>>()?;
    let group = Group::from_connections(connections);

    match &cli.command {
        Commands::Run { command } => {
            let mut failed = false;
            for conn in &group {
                let output = conn.run(command, &RunOptions::new()).await?;
                print_output(&conn.host_string(), &output);
                failed |= !output.success();
            }
            group.close().await;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Sudo { command } => {
            let mut failed = false;
            for conn in &group {
                let output = conn.sudo(command, &RunOptions::new()).await?;
                print_output(&conn.host_string(), &output);
                failed |= !output.success();
            }
            group.close().await;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Forward {
            local_port,
            remote_port,
            remote_host,
            local_host,
        } => {
            let conn = &group[0];
            let mut fwd = LocalForward::port(*local_port)
                .remote_host(remote_host.clone())
                .local_host(local_host.clone());
            if let Some(port) = remote_port {
                fwd = fwd.remote_port(*port);
            }

            let forward = conn.forward_local(fwd).await?;
            println!(
                "Forwarding {} -> {}:{} via {} (ctrl-c to stop)",
                forward.local_addr(),
                remote_host,
                remote_port.unwrap_or(*local_port),
                conn.host_string(),
            );
            tokio::signal::ctrl_c().await?;
            forward.stop().await;
            conn.close().await;
        }
    }

    Ok(())
}

fn print_output(host: &str, output: &CommandOutput) {
    println!("── {host} (exit {})", output.exit_code);
    if !output.stdout.is_empty() {
        print!("{}", output.stdout);
    }
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
}
