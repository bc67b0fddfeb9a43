//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    fs,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::deployments::{Branches, RetentionPolicy};

mod cli;

pub use cli::{
    CliArgs, Command, CommonOverrides, PruneArgs, PruneOverrides, PurgeArgs, RunArgs, ServeArgs,
    WarmArgs, WarmOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pageship";
const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4/";
const DEFAULT_PRODUCTION_BRANCH: &str = "main";
const DEFAULT_SECONDARY_BRANCH: &str = "develop";
const DEFAULT_PRODUCTION_KEEP: u32 = 7;
const DEFAULT_SECONDARY_KEEP: u32 = 1;
const DEFAULT_PAGE_SIZE: u32 = 25;
const DEFAULT_MAX_PAGES: u32 = 1;
const DEFAULT_DELETE_DELAY_MS: u64 = 500;
const DEFAULT_WARM_CONCURRENCY: u32 = 10;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BUILD_COMMAND: &str = "hugo";
const DEFAULT_BUILD_ARGS: &[&str] = &["--minify"];
const DEFAULT_OUTPUT_DIR: &str = "public";
const DEFAULT_PUBLISH_COMMAND: &str = "wrangler";
const DEFAULT_PUBLISH_ARGS: &[&str] = &[
    "pages",
    "deploy",
    "{output_dir}",
    "--project-name={project}",
    "--branch={branch}",
];
const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
const DEFAULT_SERVER_PORT: u16 = 8787;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub branches: Branches,
    pub cloudflare: CloudflareSettings,
    pub build: BuildSettings,
    pub publish: PublishSettings,
    pub prune: PruneSettings,
    pub warm: WarmSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Public origin without a trailing slash, e.g. `https://blog.example.com`.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloudflareSettings {
    pub api_base: Url,
    pub api_token: Option<String>,
    pub account_id: Option<String>,
    pub zone_id: Option<String>,
    pub project_name: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub command: String,
    pub args: Vec<String>,
    pub source_dir: PathBuf,
    /// Relative paths are resolved against `source_dir`.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PruneSettings {
    pub retention: RetentionPolicy,
    pub page_size: NonZeroU32,
    pub max_pages: NonZeroU32,
    pub delete_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct WarmSettings {
    pub concurrency: NonZeroUsize,
    pub request_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub webhook_secret: Option<String>,
    pub repository: Option<String>,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("missing required configuration `{key}`")]
    Missing { key: &'static str },
    #[error("failed to read token file {path}: {source}")]
    TokenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

fn required<'a>(value: Option<&'a str>, key: &'static str) -> Result<&'a str, LoadError> {
    value.ok_or(LoadError::Missing { key })
}

impl SiteSettings {
    pub fn require_base_url(&self) -> Result<&str, LoadError> {
        required(self.base_url.as_deref(), "site.base_url")
    }
}

impl CloudflareSettings {
    pub fn require_token(&self) -> Result<&str, LoadError> {
        required(self.api_token.as_deref(), "cloudflare.api_token")
    }

    pub fn require_account(&self) -> Result<&str, LoadError> {
        required(self.account_id.as_deref(), "cloudflare.account_id")
    }

    pub fn require_zone(&self) -> Result<&str, LoadError> {
        required(self.zone_id.as_deref(), "cloudflare.zone_id")
    }

    pub fn require_project(&self) -> Result<&str, LoadError> {
        required(self.project_name.as_deref(), "cloudflare.project_name")
    }
}

impl ServerSettings {
    pub fn require_webhook_secret(&self) -> Result<&str, LoadError> {
        required(self.webhook_secret.as_deref(), "server.webhook_secret")
    }

    pub fn require_repository(&self) -> Result<&str, LoadError> {
        required(self.repository.as_deref(), "server.repository")
    }
}

impl Settings {
    /// Fail early when a command would need settings that were never provided.
    pub fn ensure_ready_for(&self, command: &Command) -> Result<(), LoadError> {
        let cf = &self.cloudflare;
        match command {
            Command::Run(_) | Command::Serve(_) => {
                cf.require_token()?;
                cf.require_account()?;
                cf.require_project()?;
                cf.require_zone()?;
                self.site.require_base_url()?;
                if let Command::Serve(_) = command {
                    self.server.require_webhook_secret()?;
                    self.server.require_repository()?;
                }
            }
            Command::Prune(_) => {
                cf.require_token()?;
                cf.require_account()?;
                cf.require_project()?;
            }
            Command::Warm(_) => {
                self.site.require_base_url()?;
            }
            Command::Purge(_) => {
                cf.require_token()?;
                cf.require_zone()?;
            }
        }
        Ok(())
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("PAGESHIP")
            .separator("__")
            .try_parsing(true)
            .list_separator(" ")
            .with_list_parse_key("build.args")
            .with_list_parse_key("publish.args"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_command(&cli.command);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    branches: RawBranchSettings,
    cloudflare: RawCloudflareSettings,
    build: RawBuildSettings,
    publish: RawPublishSettings,
    prune: RawPruneSettings,
    warm: RawWarmSettings,
    server: RawServerSettings,
}

impl RawSettings {
    fn apply_command(&mut self, command: &Command) {
        self.apply_common_overrides(command.common());
        match command {
            Command::Run(args) => {
                if let Some(dir) = args.source_dir.as_ref() {
                    self.build.source_dir = Some(dir.clone());
                }
                self.apply_prune_overrides(&args.prune);
                self.apply_warm_overrides(&args.warm);
            }
            Command::Prune(args) => self.apply_prune_overrides(&args.prune),
            Command::Warm(args) => self.apply_warm_overrides(&args.warm),
            Command::Purge(_) => {}
            Command::Serve(args) => {
                if let Some(host) = args.server_host.as_ref() {
                    self.server.host = Some(host.clone());
                }
                if let Some(port) = args.server_port {
                    self.server.port = Some(port);
                }
                if let Some(repository) = args.repository.as_ref() {
                    self.server.repository = Some(repository.clone());
                }
            }
        }
    }

    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(base_url) = overrides.base_url.as_ref() {
            self.site.base_url = Some(base_url.clone());
        }
        if let Some(project) = overrides.project_name.as_ref() {
            self.cloudflare.project_name = Some(project.clone());
        }
        if let Some(token) = overrides.api_token_env.as_ref() {
            self.cloudflare.api_token = Some(token.clone());
        }
        if let Some(path) = overrides.api_token_file.as_ref() {
            self.cloudflare.api_token_file = Some(path.clone());
        }
        if let Some(account) = overrides.account_id.as_ref() {
            self.cloudflare.account_id = Some(account.clone());
        }
        if let Some(zone) = overrides.zone_id.as_ref() {
            self.cloudflare.zone_id = Some(zone.clone());
        }
    }

    fn apply_prune_overrides(&mut self, overrides: &PruneOverrides) {
        if let Some(keep) = overrides.production_keep {
            self.prune.production_keep = Some(keep);
        }
        if let Some(keep) = overrides.secondary_keep {
            self.prune.secondary_keep = Some(keep);
        }
        if let Some(pages) = overrides.max_pages {
            self.prune.max_pages = Some(pages);
        }
        if let Some(delay) = overrides.delete_delay_ms {
            self.prune.delete_delay_ms = Some(delay);
        }
    }

    fn apply_warm_overrides(&mut self, overrides: &WarmOverrides) {
        if let Some(concurrency) = overrides.concurrency {
            self.warm.concurrency = Some(concurrency);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            site,
            branches,
            cloudflare,
            build,
            publish,
            prune,
            warm,
            server,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            site: build_site_settings(site)?,
            branches: build_branches(branches)?,
            cloudflare: build_cloudflare_settings(cloudflare)?,
            build: build_build_settings(build)?,
            publish: build_publish_settings(publish)?,
            prune: build_prune_settings(prune)?,
            warm: build_warm_settings(warm)?,
            server: build_server_settings(server)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let Some(raw) = non_empty(site.base_url) else {
        return Ok(SiteSettings { base_url: None });
    };

    let parsed = Url::parse(&raw)
        .map_err(|err| LoadError::invalid("site.base_url", format!("failed to parse: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "site.base_url",
            "scheme must be http or https",
        ));
    }

    Ok(SiteSettings {
        base_url: Some(raw.trim_end_matches('/').to_string()),
    })
}

fn build_branches(branches: RawBranchSettings) -> Result<Branches, LoadError> {
    let production = non_empty(branches.production)
        .unwrap_or_else(|| DEFAULT_PRODUCTION_BRANCH.to_string());
    let secondary =
        non_empty(branches.secondary).unwrap_or_else(|| DEFAULT_SECONDARY_BRANCH.to_string());

    if production == secondary {
        return Err(LoadError::invalid(
            "branches.secondary",
            "must differ from the production branch",
        ));
    }

    Ok(Branches::new(production, secondary))
}

fn build_cloudflare_settings(
    cloudflare: RawCloudflareSettings,
) -> Result<CloudflareSettings, LoadError> {
    let mut api_base = match non_empty(cloudflare.api_base) {
        Some(raw) => Url::parse(&raw).map_err(|err| {
            LoadError::invalid("cloudflare.api_base", format!("failed to parse: {err}"))
        })?,
        None => Url::parse(DEFAULT_API_BASE)
            .map_err(|err| LoadError::invalid("cloudflare.api_base", err.to_string()))?,
    };
    if !api_base.path().ends_with('/') {
        let path = format!("{}/", api_base.path());
        api_base.set_path(&path);
    }

    let api_token = match cloudflare.api_token_file {
        Some(path) => {
            let token = fs::read_to_string(&path).map_err(|source| LoadError::TokenFile {
                path: path.display().to_string(),
                source,
            })?;
            non_empty(Some(token))
        }
        None => non_empty(cloudflare.api_token),
    };

    let timeout_secs = cloudflare
        .request_timeout_seconds
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "cloudflare.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CloudflareSettings {
        api_base,
        api_token,
        account_id: non_empty(cloudflare.account_id),
        zone_id: non_empty(cloudflare.zone_id),
        project_name: non_empty(cloudflare.project_name),
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_build_settings(build: RawBuildSettings) -> Result<BuildSettings, LoadError> {
    let command = non_empty(build.command).unwrap_or_else(|| DEFAULT_BUILD_COMMAND.to_string());
    let args = build
        .args
        .unwrap_or_else(|| DEFAULT_BUILD_ARGS.iter().map(ToString::to_string).collect());
    let source_dir = build.source_dir.unwrap_or_else(|| PathBuf::from("."));
    let output_dir = build
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    if output_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid("build.output_dir", "must not be empty"));
    }

    Ok(BuildSettings {
        command,
        args,
        source_dir,
        output_dir,
    })
}

fn build_publish_settings(publish: RawPublishSettings) -> Result<PublishSettings, LoadError> {
    let command =
        non_empty(publish.command).unwrap_or_else(|| DEFAULT_PUBLISH_COMMAND.to_string());
    let args = publish
        .args
        .unwrap_or_else(|| DEFAULT_PUBLISH_ARGS.iter().map(ToString::to_string).collect());
    if args.is_empty() {
        return Err(LoadError::invalid(
            "publish.args",
            "must name at least the output directory",
        ));
    }

    Ok(PublishSettings { command, args })
}

fn build_prune_settings(prune: RawPruneSettings) -> Result<PruneSettings, LoadError> {
    let production = prune.production_keep.unwrap_or(DEFAULT_PRODUCTION_KEEP);
    let secondary = prune.secondary_keep.unwrap_or(DEFAULT_SECONDARY_KEEP);
    if production == 0 {
        return Err(LoadError::invalid(
            "prune.production_keep",
            "must keep at least the live deployment",
        ));
    }
    if secondary == 0 {
        return Err(LoadError::invalid(
            "prune.secondary_keep",
            "must keep at least the live deployment",
        ));
    }

    let page_size = non_zero_u32(
        u64::from(prune.page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
        "prune.page_size",
    )?;
    let max_pages = non_zero_u32(
        u64::from(prune.max_pages.unwrap_or(DEFAULT_MAX_PAGES)),
        "prune.max_pages",
    )?;

    Ok(PruneSettings {
        retention: RetentionPolicy {
            production: production as usize,
            secondary: secondary as usize,
        },
        page_size,
        max_pages,
        delete_delay: Duration::from_millis(
            prune.delete_delay_ms.unwrap_or(DEFAULT_DELETE_DELAY_MS),
        ),
    })
}

fn build_warm_settings(warm: RawWarmSettings) -> Result<WarmSettings, LoadError> {
    let concurrency = non_zero_u32(
        u64::from(warm.concurrency.unwrap_or(DEFAULT_WARM_CONCURRENCY)),
        "warm.concurrency",
    )?;
    let concurrency = NonZeroUsize::new(concurrency.get() as usize)
        .ok_or_else(|| LoadError::invalid("warm.concurrency", "must be greater than zero"))?;

    let timeout_secs = warm
        .request_timeout_seconds
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "warm.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let user_agent = non_empty(warm.user_agent)
        .unwrap_or_else(|| concat!("pageship/", env!("CARGO_PKG_VERSION")).to_string());

    Ok(WarmSettings {
        concurrency,
        request_timeout: Duration::from_secs(timeout_secs),
        user_agent,
    })
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_SERVER_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        webhook_secret: non_empty(server.webhook_secret),
        repository: non_empty(server.repository),
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBranchSettings {
    production: Option<String>,
    secondary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCloudflareSettings {
    api_base: Option<String>,
    api_token: Option<String>,
    api_token_file: Option<PathBuf>,
    account_id: Option<String>,
    zone_id: Option<String>,
    project_name: Option<String>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuildSettings {
    command: Option<String>,
    args: Option<Vec<String>>,
    source_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPublishSettings {
    command: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPruneSettings {
    production_keep: Option<u32>,
    secondary_keep: Option<u32>,
    page_size: Option<u32>,
    max_pages: Option<u32>,
    delete_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmSettings {
    concurrency: Option<u32>,
    request_timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    webhook_secret: Option<String>,
    repository: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
