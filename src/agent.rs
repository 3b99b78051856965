use crate::collectors::{timed_collect, CollectionResult, Collector};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior};

/// Totals reported by the sink when the channel closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub metrics_written: u64,
    pub metrics_skipped: u64,
    pub errors: u64,
}

/// Run every collector once, concurrently, forwarding each result to `tx`.
/// Returns once all collectors have finished.
pub async fn gather_round(collectors: &[Arc<dyn Collector>], tx: &mpsc::Sender<CollectionResult>) {
    let mut tasks = JoinSet::new();
    for collector in collectors {
        let collector = Arc::clone(collector);
        let tx = tx.clone();
        tasks.spawn(async move {
            match timed_collect(collector.as_ref()).await {
                Ok(result) => {
                    if tx.send(result).await.is_err() {
                        tracing::warn!(plugin = collector.name(), "sink closed, result dropped");
                    }
                }
                Err(e) => tracing::warn!(plugin = collector.name(), error = %e, "collection failed"),
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "collector task panicked");
        }
    }
}

/// Round timer. A round that overruns the period skips the missed ticks
/// instead of starting the next rounds back to back.
pub fn collection_interval(period: Duration) -> Interval {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

/// Gather a round every `period` until `shutdown` resolves. Returns the
/// number of rounds run.
pub async fn run_until<F>(
    collectors: &[Arc<dyn Collector>],
    tx: &mpsc::Sender<CollectionResult>,
    period: Duration,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    let mut tick = collection_interval(period);
    tokio::pin!(shutdown);
    let mut rounds = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tick.tick() => {
                gather_round(collectors, tx).await;
                rounds += 1;
            }
        }
    }
    rounds
}

/// Drain collection results, writing each metric as line protocol to `out`
/// with `global_tags` filled in where the metric lacks them.
pub async fn write_results<W: Write + Send>(
    mut rx: mpsc::Receiver<CollectionResult>,
    global_tags: BTreeMap<String, String>,
    mut out: W,
) -> std::io::Result<SinkStats> {
    let mut stats = SinkStats::default();

    while let Some(result) = rx.recv().await {
        tracing::debug!(
            plugin = %result.plugin,
            metrics = result.metrics.len(),
            errors = result.errors.len(),
            latency_us = result.latency_us,
            "collection finished"
        );
        for e in &result.errors {
            tracing::warn!(plugin = %result.plugin, error = %e, "collection error");
        }
        stats.errors += result.errors.len() as u64;

        for mut metric in result.metrics {
            for (k, v) in &global_tags {
                metric.add_tag_if_absent(k, v);
            }
            match metric.to_line() {
                Some(line) => {
                    writeln!(out, "{line}")?;
                    stats.metrics_written += 1;
                }
                None => stats.metrics_skipped += 1,
            }
        }
        out.flush()?;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CollectorError;
    use crate::parser::JsonLiteParser;
    use async_trait::async_trait;

    struct Canned {
        body: &'static str,
    }

    #[async_trait]
    impl Collector for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn collect(&self) -> Result<CollectionResult, CollectorError> {
            let mut tags = BTreeMap::new();
            tags.insert("host".to_string(), "plugin-set".to_string());
            let parser = JsonLiteParser::new("canned", vec!["n".into()], tags);
            let mut result = CollectionResult::new(self.name());
            result.absorb(parser.parse(self.body.as_bytes())?);
            Ok(result)
        }
    }

    struct Broken;

    #[async_trait]
    impl Collector for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn collect(&self) -> Result<CollectionResult, CollectorError> {
            Err(CollectorError::Auth {
                reason: "no token".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_sink() {
        let collectors: Vec<Arc<dyn Collector>> = vec![
            Arc::new(Canned {
                body: r#"[{"a": {"n": 1}}, {"a": {"n": 2}}, {"b": 3}]"#,
            }),
            Arc::new(Broken),
        ];
        let (tx, rx) = mpsc::channel(4);

        let mut global = BTreeMap::new();
        global.insert("host".to_string(), "agent".to_string());
        global.insert("env".to_string(), "test".to_string());
        let sink = tokio::spawn(write_results(rx, global, Vec::new()));

        gather_round(&collectors, &tx).await;
        drop(tx);
        let stats = sink.await.unwrap().unwrap();

        assert_eq!(stats.metrics_written, 2);
        // `{"b": 3}` flattens to nothing
        assert_eq!(stats.metrics_skipped, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_collection_interval_skips_missed_ticks() {
        let tick = collection_interval(Duration::from_secs(1));
        assert_eq!(tick.missed_tick_behavior(), MissedTickBehavior::Skip);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let collectors: Vec<Arc<dyn Collector>> = vec![Arc::new(Canned {
            body: r#"{"a": {"n": 1}}"#,
        })];
        let (tx, mut rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let _ = stop_tx.send(());
        });
        let rounds = run_until(&collectors, &tx, Duration::from_millis(20), async {
            let _ = stop_rx.await;
        })
        .await;
        stopper.await.unwrap();
        drop(tx);

        assert!(rounds >= 2, "only {rounds} rounds ran");
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, rounds);
    }

    #[tokio::test]
    async fn test_sink_output_lines() {
        let (tx, rx) = mpsc::channel(1);
        let mut global = BTreeMap::new();
        global.insert("host".to_string(), "agent".to_string());
        global.insert("env".to_string(), "test".to_string());

        let collector = Canned {
            body: r#"{"a": {"n": 7}}"#,
        };
        tx.send(collector.collect().await.unwrap()).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let stats = write_results(rx, global, &mut out).await.unwrap();
        assert_eq!(stats.metrics_written, 1);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("canned,env=test,host=plugin-set a_n=7 "));
        assert!(text.ends_with('\n'));
    }
}
