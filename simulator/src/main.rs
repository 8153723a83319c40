//! Simulate entanglement generation over a configured quantum network.
//!
//! For every link of the network, a program on the first endpoint issues `--requests` sequential
//! requests for `--pairs` pairs each (spaced by a normally distributed delay) while a program on the
//! second endpoint accepts them. Once every program is done, the number of pairs produced, the mean
//! latency of a request and the mean goodness of its pairs are printed per link.

use clap::{value_parser, Arg, Command};
use futures::StreamExt;
use qnet_link::{Error, LinkLayer, Network, NetworkConfig};
use qnet_runtime::{deterministic, Clock, Metrics, Runner, Spawner};
use rand_distr::{Distribution, Normal};
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tracing::{debug, error, info, warn, Level};

/// Returns the version of the crate.
fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Outcome of the requests issued over one link.
#[derive(Default)]
struct Stats {
    pairs: usize,
    failures: usize,
    latencies: Vec<f64>,
    goodness: Vec<f64>,
}

fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Issue `requests` sequential requests to `peer` and record how they went.
async fn create(
    mut context: deterministic::Context,
    mut layer: LinkLayer,
    peer: String,
    requests: u32,
    pairs: u32,
    spacing: Normal<f64>,
) -> Stats {
    let mut stats = Stats::default();
    for purpose in 0..requests {
        let delay = spacing.sample(&mut context).max(0.0);
        context.sleep(Duration::from_nanos(delay as u64)).await;
        let start = context.current();
        let mut stream = match layer.create_keep(&peer, purpose, pairs).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(?err, purpose, "request rejected");
                stats.failures += 1;
                continue;
            }
        };
        let mut last = start;
        while let Some(keep) = stream.next().await {
            let delivery = match keep {
                Ok(mut keep) => keep.label().await,
                Err(err) => Err(err),
            };
            match delivery {
                Ok(delivery) => {
                    stats.pairs += 1;
                    stats.goodness.push(delivery.goodness);
                    last = delivery.label_ready;
                }
                Err(err) => {
                    warn!(?err, purpose, "request failed");
                    stats.failures += 1;
                }
            }
        }
        let latency = last.duration_since(start).unwrap_or_default();
        stats.latencies.push(latency.as_nanos() as f64);
        debug!(%peer, purpose, latency = latency.as_nanos() as u64, "request done");
    }
    stats
}

/// Accept `requests` sequential requests from `peer`.
async fn receive(mut layer: LinkLayer, peer: String, requests: u32, pairs: u32) -> Result<(), Error> {
    for purpose in 0..requests {
        let mut stream = layer.recv_keep(&peer, purpose, pairs).await?;
        while let Some(keep) = stream.next().await {
            if let Ok(mut keep) = keep {
                keep.label().await?;
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Parse arguments
    let matches = Command::new("qnet-simulator")
        .about("Simulate entanglement generation over a configured quantum network.")
        .version(crate_version())
        .arg(
            Arg::new("config")
                .long("config")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the YAML network configuration"),
        )
        .arg(
            Arg::new("requests")
                .long("requests")
                .default_value("10")
                .value_parser(value_parser!(u32))
                .help("Number of requests issued over each link"),
        )
        .arg(
            Arg::new("pairs")
                .long("pairs")
                .default_value("1")
                .value_parser(value_parser!(u32).range(1..))
                .help("Number of pairs per request"),
        )
        .arg(
            Arg::new("spacing")
                .long("spacing")
                .default_value("1000")
                .value_parser(value_parser!(f64))
                .help("Mean delay (ns) between the end of a request and the next one"),
        )
        .arg(
            Arg::new("jitter")
                .long("jitter")
                .default_value("0")
                .value_parser(value_parser!(f64))
                .help("Standard deviation (ns) of the delay between requests"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Seed of the simulation"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .value_parser(value_parser!(String))
                .help("Maximum log level (trace, debug, info, warn, error)"),
        )
        .get_matches();

    // Create logger
    let level = matches.get_one::<String>("log-level").unwrap();
    let level = match level.parse::<Level>() {
        Ok(level) => level,
        Err(err) => {
            eprintln!("invalid log level {level}: {err}");
            return ExitCode::FAILURE;
        }
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Load network
    let path = matches.get_one::<PathBuf>("config").unwrap();
    let yaml = match std::fs::read_to_string(path) {
        Ok(yaml) => yaml,
        Err(err) => {
            error!(?err, path = %path.display(), "failed to read config");
            return ExitCode::FAILURE;
        }
    };
    let cfg = match NetworkConfig::from_yaml(&yaml) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(?err, "invalid config");
            return ExitCode::FAILURE;
        }
    };
    let requests = *matches.get_one::<u32>("requests").unwrap();
    let pairs = *matches.get_one::<u32>("pairs").unwrap();
    let seed = *matches.get_one::<u64>("seed").unwrap();
    let spacing = match Normal::new(
        *matches.get_one::<f64>("spacing").unwrap(),
        *matches.get_one::<f64>("jitter").unwrap(),
    ) {
        Ok(spacing) => spacing,
        Err(err) => {
            error!(?err, "invalid request spacing");
            return ExitCode::FAILURE;
        }
    };

    // Run simulation
    let executor = deterministic::Runner::seeded(seed);
    let result = executor.start(|context| async move {
        let network = Network::build(context.with_label("network"), &cfg)?;
        let mut jobs = Vec::new();
        for (a, b) in network.links() {
            let (Some(creator), Some(receiver)) = (network.link_layer(a), network.link_layer(b))
            else {
                continue;
            };
            let (peer_a, peer_b) = (a.clone(), b.clone());
            let receiver = context
                .with_label("receiver")
                .spawn(move |_| receive(receiver, peer_a, requests, pairs));
            let creator = context
                .with_label("creator")
                .spawn(move |context| create(context, creator, peer_b, requests, pairs, spacing));
            jobs.push((a.clone(), b.clone(), creator, receiver));
        }

        let mut results = Vec::new();
        for (a, b, creator, receiver) in jobs {
            let Ok(stats) = creator.await else {
                return Err(Error::Closed);
            };
            if let Ok(Err(err)) = receiver.await {
                warn!(?err, %a, %b, "receiver failed");
            }
            results.push((a, b, stats));
        }
        info!(elapsed = ?context.current().duration_since(std::time::UNIX_EPOCH), "simulation done");
        Ok(results)
    });
    let results = match result {
        Ok(results) => results,
        Err(err) => {
            error!(?err, "simulation failed");
            return ExitCode::FAILURE;
        }
    };

    // Report
    println!("link\tpairs\tfailures\tlatency (ns)\tgoodness");
    for (a, b, stats) in results {
        let latency = mean(&stats.latencies).map_or("-".to_string(), |l| format!("{l:.1}"));
        let goodness = mean(&stats.goodness).map_or("-".to_string(), |g| format!("{g:.4}"));
        println!(
            "{a}-{b}\t{}\t{}\t{latency}\t{goodness}",
            stats.pairs, stats.failures
        );
    }
    ExitCode::SUCCESS
}
