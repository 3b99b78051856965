use apistats_agent::agent::{gather_round, run_until, write_results};
use apistats_agent::config::{Config, PluginFile};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries metrics only
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.json_logs);

    let plugins = PluginFile::load(&config.config)?;
    let collectors = plugins.inputs.build()?;
    let global_tags = plugins.effective_tags(&config);

    tracing::info!(
        config = %config.config.display(),
        collectors = collectors.len(),
        interval_ms = config.collect_interval_ms,
        once = config.once,
        "apistats-agent starting"
    );
    if collectors.is_empty() {
        tracing::warn!("no inputs configured");
    }

    let (tx, rx) = mpsc::channel(config.channel_buffer_size.max(1));
    let sink = tokio::spawn(write_results(rx, global_tags, std::io::stdout()));

    if config.once {
        gather_round(&collectors, &tx).await;
    } else {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            tracing::info!("shutdown requested");
        };
        let rounds = run_until(&collectors, &tx, config.collect_interval(), shutdown).await;
        tracing::debug!(rounds, "collection loop stopped");
    }

    drop(tx);
    let stats = sink.await??;
    tracing::info!(
        written = stats.metrics_written,
        skipped = stats.metrics_skipped,
        errors = stats.errors,
        "apistats-agent stopped"
    );
    Ok(())
}
