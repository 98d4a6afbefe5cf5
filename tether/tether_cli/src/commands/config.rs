//! The `show-config` and `server-config` commands

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use std::thread;
use tether_concurrency::config::EnvSource;
use tether_concurrency::once::{ServerConfig, ServerDefaults};
use tether_concurrency::{GuardedInitializer, ToolkitConfig};

/// Implementation of the show-config command
pub fn show(toolkit: &ToolkitConfig) -> Result<()> {
    let text = toolkit
        .to_toml_string()
        .context("rendering configuration")?;
    print!("{}", text);
    Ok(())
}

/// Arguments for the server-config command
#[derive(Args)]
pub struct ServerConfigArgs {
    /// Number of threads racing to resolve the settings
    #[clap(long, default_value_t = 8)]
    callers: usize,

    /// Port used when TT_PORT is absent or malformed
    #[clap(long, default_value_t = 8080)]
    default_port: i64,

    /// Server used when TT_SERVER_URL is absent
    #[clap(long, default_value = "")]
    default_server: String,
}

/// Implementation of the server-config command
pub fn execute_server(args: &ServerConfigArgs) -> Result<()> {
    let init = Arc::new(GuardedInitializer::with_name("server"));
    let defaults = Arc::new(ServerDefaults {
        server: args.default_server.clone(),
        port: args.default_port,
    });

    let handles: Vec<_> = (0..args.callers.max(1))
        .map(|_| {
            let init = Arc::clone(&init);
            let defaults = Arc::clone(&defaults);
            thread::spawn(move || ServerConfig::shared(&init, &EnvSource, &defaults).clone())
        })
        .collect();

    let mut resolved = Vec::with_capacity(handles.len());
    for handle in handles {
        let config = handle
            .join()
            .map_err(|_| anyhow::anyhow!("resolver thread panicked"))?;
        resolved.push(config);
    }

    let first = &resolved[0];
    let agreed = resolved.iter().all(|config| config == first);

    println!("server = {:?}", first.server);
    println!("port = {}", first.port);
    println!(
        "resolved by {} callers, setup ran {} time(s), all agree: {}",
        resolved.len(),
        init.init_count(),
        agreed
    );
    Ok(())
}
