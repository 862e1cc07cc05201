// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod output;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::Parser;
use std::future::Future;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

use cli::{Args, Command, LoginCommand, OutputFormat};
use kubedeck::config::{self, Config};
use kubedeck::credentials::{AwsCredentials, GcpCredentials, ProviderCredentials};
use kubedeck::facade::{DeleteOutcome, FetchOutcome, KubeDeck};
use kubedeck::model::{Cluster, EntityType, NamespaceFilter};
use kubedeck::progress::{ProgressUpdate, create_progress_handle, create_spinner};
use kubedeck::state::StateDir;
use kubedeck::store::Store;
use output::{JsonFormatter, Listing};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // Rotate daily or at 10MB, keep 5 files
    let log_path = log_dir.join("kubedeck.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "kubedeck=debug" } else { "kubedeck=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if verbose {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Both kube and reqwest use rustls; pin the process-wide provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = Config::config_path()?;
    let config = Config::load_from(&config_path)?;
    if !config_path.exists()
        && let Err(e) = config.save_to(&config_path)
    {
        eprintln!("Warning: could not write default config: {:#}", e);
    }
    let state = StateDir::default_location()?;
    let store = Arc::new(Store::new());
    let summary = state.load_into(&store);
    for path in &summary.skipped {
        eprintln!("Warning: ignoring unreadable state file {}", path.display());
    }
    for path in &summary.set_aside {
        eprintln!("Warning: its contents were kept in {}", path.display());
    }

    let deck = KubeDeck::from_config(&config, store.clone(), create_progress_handle())
        .context("Failed to initialize")?;

    let result = run(&deck, &args).await;

    // Tokens and statuses change even when a command fails
    if let Err(e) = state.save_store(&store) {
        eprintln!(
            "Warning: could not save state in {}: {:#}",
            state.root().display(),
            e
        );
    }
    result
}

async fn run(deck: &KubeDeck, args: &Args) -> Result<()> {
    match &args.command {
        Command::Clusters { provider } => {
            deck.select_provider(*provider);
            let clusters = deck.clusters_for_current_provider();
            let listing = Listing::clusters(&clusters, deck.sessions());
            println!("{}", listing.format(&args.output, args.no_headers));
        }

        Command::Add {
            url,
            name,
            provider,
        } => {
            let replaced = deck.add_cluster(Cluster::new(url.as_str(), name.as_str(), *provider));
            let verb = if replaced { "Updated" } else { "Added" };
            println!("{} {} cluster '{}' ({})", verb, provider, name, url);
        }

        Command::Remove { cluster } => {
            let cluster = resolve_cluster(deck, cluster)?;
            deck.remove_cluster(&cluster.url);
            println!("Removed cluster '{}'", cluster.name);
        }

        Command::Check => {
            let checks = with_spinner(deck, "Checking clusters...", deck.check_all_clusters()).await;
            println!("{}", Listing::checks(&checks).format(&args.output, args.no_headers));
        }

        Command::Namespaces { cluster } => {
            let cluster = resolve_cluster(deck, cluster)?;
            let namespaces = with_spinner(
                deck,
                &format!("Fetching namespaces of {}...", cluster.name),
                deck.fetch_namespaces(&cluster.url),
            )
            .await?;
            let selected = deck
                .store()
                .registry
                .get(&cluster.url)
                .map(|c| c.current_namespace)
                .unwrap_or_default();
            let listing = Listing::namespaces(&namespaces, selected.as_str());
            println!("{}", listing.format(&args.output, args.no_headers));
        }

        Command::UseNamespace { cluster, namespace } => {
            let cluster = resolve_cluster(deck, cluster)?;
            let filter = NamespaceFilter::from(namespace.as_str());
            deck.select_namespace(&cluster.url, filter.clone())?;
            println!("Cluster '{}' now shows {}", cluster.name, filter);
        }

        Command::Get {
            cluster,
            entity_type,
            namespace,
        } => {
            let cluster = resolve_cluster(deck, cluster)?;
            deck.select_cluster(&cluster.url)?;
            deck.select_entity_type(*entity_type);
            refresh_entities(deck, &cluster, *entity_type).await?;

            let view = match namespace {
                Some(ns) => deck.entities_in(&cluster.url, *entity_type, NamespaceFilter::from(ns.as_str())),
                None => deck
                    .current_entities()
                    .ok_or_else(|| anyhow!("No cluster selected"))?,
            };
            match args.output {
                OutputFormat::Json => {
                    println!("{}", JsonFormatter::format_objects(view.iter().map(|r| &r.object)));
                }
                OutputFormat::Table => {
                    let listing = Listing::entities(&view, *entity_type, Utc::now());
                    println!("{}", listing.format(&args.output, args.no_headers));
                }
            }
        }

        Command::Delete {
            cluster,
            entity_type,
            name,
            namespace,
            yes,
        } => {
            if !yes {
                bail!("Refusing to delete {} '{}' without --yes", entity_type.kind(), name);
            }
            let cluster = resolve_cluster(deck, cluster)?;
            deck.select_cluster(&cluster.url)?;
            deck.select_entity_type(*entity_type);
            refresh_entities(deck, &cluster, *entity_type).await?;

            let filter = namespace
                .as_deref()
                .map(NamespaceFilter::from)
                .unwrap_or_default();
            let view = deck.entities_in(&cluster.url, *entity_type, filter);
            let matches: Vec<_> = view.iter().filter(|r| r.name() == Some(name.as_str())).collect();
            let record = match matches.as_slice() {
                [record] => (*record).clone(),
                [] => bail!("No {} named '{}' in '{}'", entity_type.kind(), name, cluster.name),
                _ => bail!(
                    "{} '{}' exists in several namespaces, pick one with --namespace",
                    entity_type.kind(),
                    name
                ),
            };

            deck.select_entity(Some(record.uid.clone()));
            let outcome = with_spinner(
                deck,
                &format!("Deleting {} {}...", entity_type.kind(), name),
                deck.delete_entity(&cluster.url, &record, *entity_type),
            )
            .await?;
            match outcome {
                DeleteOutcome::Deleted => println!("Deleted {} '{}'", entity_type.kind(), name),
                DeleteOutcome::AlreadyGone => {
                    println!("{} '{}' was already gone", entity_type.kind(), name)
                }
            }
        }

        Command::Login { provider } => {
            let credentials = match provider {
                LoginCommand::Aws {
                    access_key_id,
                    secret_access_key,
                    session_token,
                    region,
                } => ProviderCredentials::Aws(AwsCredentials {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: session_token.clone(),
                    region: region.clone(),
                }),
                LoginCommand::Gcp {
                    refresh_token,
                    client_id,
                    client_secret,
                } => ProviderCredentials::Gcp(GcpCredentials {
                    refresh_token: refresh_token.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                }),
            };
            let provider = credentials.provider();
            deck.set_credentials(credentials);
            println!("Stored {} credentials", provider);
        }

        Command::Logout { provider } => {
            if deck.remove_credentials(*provider) {
                println!("Removed {} credentials", provider);
            } else {
                println!("No {} credentials were stored", provider);
            }
        }
    }

    Ok(())
}

async fn refresh_entities(deck: &KubeDeck, cluster: &Cluster, entity_type: EntityType) -> Result<()> {
    let outcome = with_spinner(
        deck,
        &format!("Fetching {} from {}...", entity_type.label().to_lowercase(), cluster.name),
        deck.list_entities(&cluster.url, entity_type),
    )
    .await
    .with_context(|| format!("Failed to list {} on '{}'", entity_type, cluster.name))?;

    if outcome == FetchOutcome::Superseded {
        eprintln!("Warning: listing was superseded, showing cached results");
    }
    Ok(())
}

/// Find a cluster by url or by name
fn resolve_cluster(deck: &KubeDeck, name_or_url: &str) -> Result<Cluster> {
    let clusters = deck.list_clusters();
    if let Some(cluster) = clusters.iter().find(|c| c.url == name_or_url) {
        return Ok(cluster.clone());
    }
    let named: Vec<&Cluster> = clusters.iter().filter(|c| c.name == name_or_url).collect();
    match named.as_slice() {
        [cluster] => Ok((*cluster).clone()),
        [] => bail!("No cluster named '{}'. Run `kubedeck clusters` to list them.", name_or_url),
        _ => bail!("Several clusters are named '{}', use the url instead", name_or_url),
    }
}

/// Run `work` while rendering progress updates on a spinner
async fn with_spinner<T>(deck: &KubeDeck, message: &str, work: impl Future<Output = T>) -> T {
    let spinner = create_spinner(message);
    let mut progress_rx = deck.progress().subscribe();
    let mut work = std::pin::pin!(work);

    let result = loop {
        tokio::select! {
            biased;
            result = &mut work => {
                break result;
            }
            update = progress_rx.recv() => {
                match update {
                    Ok(ProgressUpdate::CheckingClusters { count }) => {
                        spinner.set_message(format!("Checking {} clusters...", count));
                    }
                    Ok(ProgressUpdate::ClusterChecked { .. }) => {
                        let (done, total) = deck.progress().progress();
                        spinner.set_message(format!("Checked {}/{} clusters", done, total));
                    }
                    Ok(ProgressUpdate::RefreshingToken { cluster }) => {
                        spinner.set_message(format!("Obtaining token for {}...", cluster));
                    }
                    Ok(ProgressUpdate::TokenRefreshed { cluster, elapsed_ms }) => {
                        spinner.set_message(format!("Token for {} ready ({}ms)", cluster, elapsed_ms));
                    }
                    Ok(ProgressUpdate::FetchingEntities { cluster, entity_type }) => {
                        spinner.set_message(format!("Fetching {} from {}...", entity_type, cluster));
                    }
                    Ok(ProgressUpdate::EntitiesFetched { entity_type, count, .. }) => {
                        spinner.set_message(format!("{} {} fetched", count, entity_type));
                    }
                    // The reporter lives as long as the deck, so only lag is possible
                    Ok(ProgressUpdate::FetchDiscarded { .. }) | Err(_) => {}
                }
            }
        }
    };

    spinner.finish_and_clear();
    result
}
