use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pageship binary.
#[derive(Debug, Parser)]
#[command(
    name = "pageship",
    version,
    about = "Build, publish, prune and warm a static site on Cloudflare Pages"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PAGESHIP_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the full pipeline for one pushed branch.
    Run(RunArgs),
    /// Delete deployments beyond the retention window.
    Prune(PruneArgs),
    /// Fetch the sitemap and homepage assets to populate the edge cache.
    Warm(WarmArgs),
    /// Purge every cached object in the zone.
    Purge(PurgeArgs),
    /// Listen for push webhooks and run the pipeline per branch.
    Serve(ServeArgs),
}

impl Command {
    pub fn common(&self) -> &CommonOverrides {
        match self {
            Self::Run(args) => &args.common,
            Self::Prune(args) => &args.common,
            Self::Warm(args) => &args.common,
            Self::Purge(args) => &args.common,
            Self::Serve(args) => &args.common,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Prune(_) => "prune",
            Self::Warm(_) => "warm",
            Self::Purge(_) => "purge",
            Self::Serve(_) => "serve",
        }
    }
}

/// Overrides accepted by every subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the public base URL of the site.
    #[arg(long = "base-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub base_url: Option<String>,

    /// Override the Pages project name.
    #[arg(long = "project-name", value_name = "NAME")]
    pub project_name: Option<String>,

    /// Path to a file holding the API token (takes precedence over env).
    #[arg(
        long = "api-token-file",
        env = "PAGESHIP_API_TOKEN_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub api_token_file: Option<PathBuf>,

    /// API token from the conventional CI variable.
    #[arg(long = "api-token-env", hide = true, env = "CLOUDFLARE_API_TOKEN")]
    pub api_token_env: Option<String>,

    /// Account identifier from the conventional CI variable.
    #[arg(long = "account-id", env = "CLOUDFLARE_ACCOUNT_ID", value_name = "ID")]
    pub account_id: Option<String>,

    /// Zone identifier from the conventional CI variable.
    #[arg(long = "zone-id", env = "CLOUDFLARE_ZONE_ID", value_name = "ID")]
    pub zone_id: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Branch whose push triggered this run.
    #[arg(long, env = "PAGESHIP_BRANCH", value_name = "BRANCH")]
    pub branch: String,

    /// Override the checked-out content tree handed to the site builder.
    #[arg(long = "source-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub source_dir: Option<PathBuf>,

    #[command(flatten)]
    pub prune: PruneOverrides,

    #[command(flatten)]
    pub warm: WarmOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct PruneArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    #[command(flatten)]
    pub prune: PruneOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PruneOverrides {
    /// Override how many production deployments are kept.
    #[arg(long = "prune-production-keep", value_name = "COUNT")]
    pub production_keep: Option<u32>,

    /// Override how many secondary-branch deployments are kept.
    #[arg(long = "prune-secondary-keep", value_name = "COUNT")]
    pub secondary_keep: Option<u32>,

    /// Override how many listing pages are inspected.
    #[arg(long = "prune-max-pages", value_name = "COUNT")]
    pub max_pages: Option<u32>,

    /// Override the pause between deletion requests.
    #[arg(long = "prune-delete-delay-ms", value_name = "MILLIS")]
    pub delete_delay_ms: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    #[command(flatten)]
    pub warm: WarmOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmOverrides {
    /// Override the number of concurrent warm-up fetches.
    #[arg(long = "warm-concurrency", value_name = "COUNT")]
    pub concurrency: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub common: CommonOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Override the webhook listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the webhook listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the repository cloned for every run.
    #[arg(long = "repository", value_name = "URL")]
    pub repository: Option<String>,
}
