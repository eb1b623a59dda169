//! Command-line interface
//!
//! Every command except `watch` builds a registry, runs one scan and returns
//! its output as a string; `watch` streams events until interrupted.

use crate::output::{self, OutputFormat};
use crate::tracing_support::TracingFormat;
use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use permwatch_host::{
    config::DEFAULT_APP_NAME, inventory::default_inventory_dir, store::default_store_path,
    ApplicationView, ChannelObserver, InventoryWatcher, Registry, RegistryPresets, WatcherConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Audit log file name, kept next to the ignore-rule store
pub const AUDIT_FILE: &str = "audit.jsonl";

/// Find installed apps holding dangerous permissions and manage warnings
#[derive(Parser, Debug)]
#[command(name = "permwatch", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Inventory directory (permissions.json + apps/*.json)
    #[arg(long, global = true, env = "PERMWATCH_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Ignore-rule store file
    #[arg(long, global = true, env = "PERMWATCH_STORE")]
    pub store: Option<PathBuf>,

    /// Application name used for default paths
    #[arg(long, global = true, default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// Additional package id prefix that is never scanned
    #[arg(long = "reserve-prefix", global = true, value_name = "PREFIX")]
    pub reserved_prefixes: Vec<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    pub log_format: TracingFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan and list apps with warnable permissions
    Scan,

    /// Show one app's permissions
    Show {
        /// Package id
        package: String,
    },

    /// Stop warning about a permission
    Ignore(PermissionArgs),

    /// Resume warning about a permission
    Unignore(PermissionArgs),

    /// Put an app on the ignore list
    IgnoreApp {
        /// Package id
        package: String,
    },

    /// Take an app off the ignore list
    UnignoreApp {
        /// Package id
        package: String,
    },

    /// Print the persisted ignore rules
    Rules,

    /// Watch the inventory and print registry events until Ctrl-C
    Watch {
        /// Also rescan every N seconds
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
}

#[derive(Args, Debug)]
pub struct PermissionArgs {
    /// Permission id
    pub permission: String,

    /// Only for this package (otherwise for every app)
    #[arg(long, value_name = "PACKAGE")]
    pub app: Option<String>,
}

/// Resolved runtime context for one invocation
pub struct Context {
    pub registry: Registry,
    pub inventory: PathBuf,
    pub format: OutputFormat,
}

impl Context {
    /// Resolve paths and build the registry
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let inventory = args
            .inventory
            .clone()
            .unwrap_or_else(|| default_inventory_dir(&args.app_name));
        let store = args
            .store
            .clone()
            .unwrap_or_else(|| default_store_path(&args.app_name));
        let audit = store.with_file_name(AUDIT_FILE);

        let mut config = RegistryPresets::persistent_at(&inventory, &store, &audit)
            .with_context(|| format!("failed to open store {}", store.display()))?;
        config
            .policy
            .reserved_prefixes
            .extend(args.reserved_prefixes.iter().cloned());

        tracing::debug!(
            inventory = %inventory.display(),
            store = %store.display(),
            "Resolved paths"
        );

        Ok(Self {
            registry: Registry::new(config),
            inventory,
            format: OutputFormat::from_json_flag(args.json),
        })
    }

    async fn scanned(&self) -> Result<()> {
        self.registry
            .rescan()
            .await
            .with_context(|| format!("failed to scan {}", self.inventory.display()))?;
        Ok(())
    }

    async fn view(&self) -> Result<String> {
        let view = ApplicationView::from_snapshot(self.registry.snapshot().await);
        Ok(output::render_view(
            &view,
            self.registry.last_scan_at(),
            self.format,
        )?)
    }
}

/// Run one command, returning what should be printed on stdout
pub async fn execute(cli: Cli) -> Result<String> {
    let ctx = Context::from_args(&cli.global)?;

    match cli.command {
        Command::Scan => {
            ctx.scanned().await?;
            ctx.view().await
        }
        Command::Show { package } => {
            ctx.scanned().await?;
            match ctx.registry.by_package_id(&package).await {
                Some(app) => Ok(output::render_application(&app, ctx.format)?),
                None => bail!("{} has no dangerous permissions to warn about", package),
            }
        }
        Command::Ignore(args) => ignore(&ctx, args).await,
        Command::Unignore(args) => unignore(&ctx, args).await,
        Command::IgnoreApp { package } => {
            ctx.scanned().await?;
            let Some(app) = ctx.registry.by_package_id(&package).await else {
                bail!("{} has no dangerous permissions to warn about", package);
            };
            ctx.registry.add_to_ignore_list(&app).await?;
            ctx.view().await
        }
        Command::UnignoreApp { package } => {
            ctx.scanned().await?;
            match ctx.registry.by_package_id(&package).await {
                Some(app) => {
                    ctx.registry.remove_from_ignore_list(&app).await?;
                }
                None => {
                    // Not listed any more, so only the stored rule is left
                    if ctx.registry.ignore_rules().remove_temporary_ignore(&package)? {
                        ctx.scanned().await?;
                    }
                }
            }
            ctx.view().await
        }
        Command::Rules => {
            let rules = ctx.registry.ignore_rules().rule_set()?;
            Ok(output::render_rules(&rules, ctx.format)?)
        }
        Command::Watch { interval } => {
            watch(ctx, interval.map(Duration::from_secs)).await?;
            Ok(String::new())
        }
    }
}

async fn ignore(ctx: &Context, args: PermissionArgs) -> Result<String> {
    let Some(package) = args.app else {
        ctx.registry
            .ignore_global_permission(&args.permission)
            .await?;
        return ctx.view().await;
    };

    ctx.scanned().await?;
    match ctx
        .registry
        .ignore_app_permission(&package, &args.permission)
        .await?
    {
        Some(app) => Ok(output::render_application(&app, ctx.format)?),
        None => bail!(
            "{} is not a warnable permission of {}",
            args.permission,
            package
        ),
    }
}

async fn unignore(ctx: &Context, args: PermissionArgs) -> Result<String> {
    let Some(package) = args.app else {
        ctx.registry
            .unignore_global_permission(&args.permission)
            .await?;
        return ctx.view().await;
    };

    ctx.scanned().await?;
    if let Some(app) = ctx
        .registry
        .unignore_app_permission(&package, &args.permission)
        .await?
    {
        return Ok(output::render_application(&app, ctx.format)?);
    }

    // An app whose every warning was ignored drops out of the list, so
    // remove the stored rule directly and rescan
    if ctx
        .registry
        .ignore_rules()
        .remove_app_ignore(&package, &args.permission)?
    {
        ctx.scanned().await?;
        return ctx.view().await;
    }

    bail!("{} is not ignored for {}", args.permission, package)
}

async fn watch(ctx: Context, interval: Option<Duration>) -> Result<()> {
    let (observer, mut events) = ChannelObserver::new();
    ctx.registry.subscribe(Arc::new(observer));

    let watcher = InventoryWatcher::new(
        ctx.registry.clone(),
        &ctx.inventory,
        WatcherConfig {
            rescan_interval: interval,
            ..WatcherConfig::default()
        },
    )
    .await?;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!("{}", output::render_event(&event, ctx.format)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    watcher.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignore_for_app() {
        let cli = Cli::try_parse_from([
            "permwatch",
            "--inventory",
            "/tmp/inv",
            "ignore",
            "CAMERA",
            "--app",
            "com.example.a",
        ])
        .unwrap();

        assert_eq!(cli.global.inventory, Some(PathBuf::from("/tmp/inv")));
        match cli.command {
            Command::Ignore(args) => {
                assert_eq!(args.permission, "CAMERA");
                assert_eq!(args.app.as_deref(), Some("com.example.a"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "permwatch",
            "scan",
            "--json",
            "--log-format",
            "json",
            "--reserve-prefix",
            "com.vendor.",
        ])
        .unwrap();

        assert!(cli.global.json);
        assert_eq!(cli.global.log_format, TracingFormat::Json);
        assert_eq!(cli.global.reserved_prefixes, vec!["com.vendor."]);
        assert_eq!(cli.global.app_name, DEFAULT_APP_NAME);
    }

    #[test]
    fn test_watch_interval() {
        let cli = Cli::try_parse_from(["permwatch", "watch", "--interval", "1800"]).unwrap();
        assert!(matches!(cli.command, Command::Watch { interval: Some(1800) }));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["permwatch"]).is_err());
    }
}
