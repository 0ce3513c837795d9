mod cli;
mod output;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use brokerauth::observability::{apply_logging_level, init_tracing};
use brokerauth::{
    AccessLevel, AuthEngine, AuthSettings, DylibLoader, LogLevel, build_engine, load_options,
};
use brokerauth_backends::{builtin_registry, hash_password};
use clap::Parser;

use cli::{Cli, Commands};
use output::{print_decision, print_error, print_field};

/// Exit status for a denied check.
const EXIT_DENIED: i32 = 2;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_DENIED),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

/// Returns `false` when a check was denied.
async fn run() -> Result<bool> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::HashPassword(args) => {
            let hash = hash_password(&args.password)
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;
            println!("{hash}");
            Ok(true)
        }
        Commands::ShowConfig => {
            let settings = load_settings(cli.config.as_deref(), cli.grace)?;
            show_settings(&settings);
            Ok(true)
        }
        Commands::CheckUser(args) => {
            let engine = start_engine(&cli).await?;
            let granted = engine.authenticate(&args.username, &args.password).await;
            engine.shutdown().await;
            print_decision(granted, &format!("user {}", args.username));
            Ok(granted)
        }
        Commands::CheckAcl(args) => {
            let engine = start_engine(&cli).await?;
            let access: AccessLevel = args.access.into();
            let granted = engine
                .authorize(&args.client_id, &args.username, &args.topic, access)
                .await;
            engine.shutdown().await;
            print_decision(
                granted,
                &format!("{} {} on {}", args.username, access, args.topic),
            );
            Ok(granted)
        }
    }
}

fn load_settings(path: Option<&Path>, grace: bool) -> Result<AuthSettings> {
    let path = path.context("No options file given. Pass --config or set BROKERAUTH_CONFIG")?;
    let options = load_options(path)?;
    let mut settings = AuthSettings::from_options(&options)
        .with_context(|| format!("Invalid options in {}", path.display()))?;
    if !grace {
        settings.startup_grace = Duration::ZERO;
    }
    Ok(settings)
}

async fn start_engine(cli: &Cli) -> Result<AuthEngine> {
    let settings = load_settings(cli.config.as_deref(), cli.grace)?;
    init_tracing(&settings.logging);
    if cli.verbose {
        apply_logging_level(LogLevel::Debug);
    }

    let engine = build_engine(&settings, &builtin_registry(), &DylibLoader::new())
        .await
        .context("Failed to start auth engine")?;
    Ok(engine)
}

fn show_settings(settings: &AuthSettings) {
    print_field("Backends", settings.backends.join(", "));
    print_field("Log level", settings.logging.level);
    print_field("Log destination", format!("{:?}", settings.logging.destination));
    print_field("Cache", format!("{:?}", settings.cache));
    match &settings.prefixes {
        Some(prefixes) if settings.check_prefix => print_field("Prefixes", prefixes.join(", ")),
        _ => print_field("Prefixes", "(disabled)"),
    }
    print_field(
        "Plugin path",
        settings.plugin_path.as_deref().unwrap_or("(not set)"),
    );
    print_field(
        "Grace window",
        format!("{}s", settings.startup_grace.as_secs()),
    );
    print_field("Check superuser", settings.check_superuser);

    let mut keys: Vec<_> = settings.options.keys().collect();
    keys.sort();
    for key in keys {
        let value = if is_secret_option(key) {
            "***"
        } else {
            settings.options[key].as_str()
        };
        print_field(&format!("  {key}"), value);
    }
}

/// Option keys whose values are credentials, e.g. `cache_password`.
fn is_secret_option(key: &str) -> bool {
    const SECRET_SUFFIXES: [&str; 3] = ["password", "_secret", "_token"];
    SECRET_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_options() {
        assert!(is_secret_option("cache_password"));
        assert!(is_secret_option("plugin_opt_api_secret"));
        assert!(is_secret_option("http_bearer_token"));
        assert!(!is_secret_option("password_path"));
        assert!(!is_secret_option("acl_path"));
    }
}
