use std::{process, sync::Arc};

use pageship::{
    application::{
        coordinator::{PipelineLauncher, RunCoordinator},
        error::AppError,
        pipeline::{Pipeline, PipelineParts},
        providers::EdgeCache,
        prune::{DeploymentPruner, PruneConfig},
        warm::CacheWarmer,
    },
    config::{self, Command, RunArgs, Settings},
    infra::{
        cloudflare::{CloudflareClient, PagesDeployments, ZoneCache},
        fetcher::HttpFetcher,
        http::{self, HookState},
        process::{CommandPublisher, CommandSiteBuilder, GitCheckout},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let emit = || {
        error!(
            target = "pageship",
            stage = error.stage(),
            error = %error,
            chain = ?error.chain(),
            "run aborted"
        );
    };

    if dispatcher::has_been_set() {
        emit();
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, emit);
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    settings.ensure_ready_for(&cli_args.command)?;
    info!(
        target = "pageship",
        command = cli_args.command.name(),
        version = env!("CARGO_PKG_VERSION"),
        "starting"
    );

    match cli_args.command {
        Command::Run(args) => run_pipeline(&settings, &args).await,
        Command::Prune(_) => run_prune(&settings).await,
        Command::Warm(_) => run_warm(&settings).await,
        Command::Purge(_) => run_purge(&settings).await,
        Command::Serve(_) => run_serve(&settings).await,
    }
}

async fn run_pipeline(settings: &Settings, args: &RunArgs) -> Result<(), AppError> {
    let pipeline = build_pipeline(settings)?;
    pipeline
        .run(Uuid::new_v4(), &args.branch, &settings.build.source_dir)
        .await?;
    Ok(())
}

async fn run_prune(settings: &Settings) -> Result<(), AppError> {
    let outcome = build_pruner(settings)?.prune().await?;
    if !outcome.failed.is_empty() {
        warn!(
            target = "pageship",
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            "some deployments could not be deleted"
        );
    }
    Ok(())
}

async fn run_warm(settings: &Settings) -> Result<(), AppError> {
    let outcomes = build_warmer(settings)?.warm_all().await;
    let failed: usize = outcomes
        .iter()
        .map(|outcome| outcome.failures.len() + usize::from(outcome.seed_error.is_some()))
        .sum();
    info!(
        target = "pageship",
        attempted = outcomes.iter().map(|outcome| outcome.attempted).sum::<usize>(),
        failed,
        "warm-up finished"
    );
    Ok(())
}

async fn run_purge(settings: &Settings) -> Result<(), AppError> {
    build_zone_cache(settings)?
        .purge_everything()
        .await
        .map_err(AppError::Purge)?;
    info!(target = "pageship", "edge cache purged");
    Ok(())
}

async fn run_serve(settings: &Settings) -> Result<(), AppError> {
    let pipeline = build_pipeline(settings)?;
    let checkout = GitCheckout::new(settings.server.require_repository()?);
    let coordinator = RunCoordinator::new(Arc::new(PipelineLauncher::new(
        pipeline,
        Arc::new(checkout),
    )));

    let router = http::build_router(HookState {
        coordinator: coordinator.clone(),
        branches: settings.branches.clone(),
        secret: Arc::from(settings.server.require_webhook_secret()?),
    });

    http::serve(
        settings.server.addr,
        router,
        coordinator,
        settings.server.graceful_shutdown,
    )
    .await?;
    Ok(())
}

fn build_pipeline(settings: &Settings) -> Result<Pipeline, AppError> {
    let cf = &settings.cloudflare;
    let builder = CommandSiteBuilder::new(
        &settings.build.command,
        &settings.build.args,
        &settings.build.output_dir,
    );
    let publisher = CommandPublisher::new(
        &settings.publish.command,
        &settings.publish.args,
        cf.require_project()?,
        cf.require_token()?,
        cf.require_account()?,
    );

    Ok(Pipeline::new(PipelineParts {
        builder: Arc::new(builder),
        publisher: Arc::new(publisher),
        edge_cache: Arc::new(build_zone_cache(settings)?),
        pruner: build_pruner(settings)?,
        warmer: build_warmer(settings)?,
        branches: settings.branches.clone(),
    }))
}

fn cloudflare_client(settings: &Settings) -> Result<CloudflareClient, AppError> {
    let cf = &settings.cloudflare;
    Ok(CloudflareClient::new(
        cf.api_base.clone(),
        cf.require_token()?,
        cf.request_timeout,
    )?)
}

fn build_zone_cache(settings: &Settings) -> Result<ZoneCache, AppError> {
    Ok(ZoneCache::new(
        cloudflare_client(settings)?,
        settings.cloudflare.require_zone()?,
    ))
}

fn build_pruner(settings: &Settings) -> Result<DeploymentPruner, AppError> {
    let cf = &settings.cloudflare;
    let api = PagesDeployments::new(
        cloudflare_client(settings)?,
        cf.require_account()?,
        cf.require_project()?,
    );
    let prune = &settings.prune;
    Ok(DeploymentPruner::new(
        Arc::new(api),
        settings.branches.clone(),
        PruneConfig {
            retention: prune.retention,
            page_size: prune.page_size,
            max_pages: prune.max_pages,
            delete_delay: prune.delete_delay,
        },
    ))
}

fn build_warmer(settings: &Settings) -> Result<CacheWarmer, AppError> {
    let warm = &settings.warm;
    let fetcher = HttpFetcher::new(warm.request_timeout, &warm.user_agent)?;
    Ok(CacheWarmer::new(
        Arc::new(fetcher),
        settings.site.require_base_url()?,
        warm.concurrency,
    ))
}
