//! Reload-driven CLI wiring the rule store, pre-warm registry and a single
//! IO thread's pre-warm queue together. Structured after
//! `ferron/src/main.rs`'s `before_starting_server`/reload-loop split: load
//! config, build state, run until a reload is requested, loop.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use sni_core::config;
use sni_core::log::LogMessage;
use sni_core::prewarm::{PreWarmRegistry, SizingAlgorithm, ThreadQueue};
use sni_core::rulestore::RuleStore;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "sni-proxy-demo")]
struct Args {
  /// Path to the YAML rule/pre-warm configuration file.
  #[arg(short, long)]
  config: PathBuf,

  /// Parse and validate the configuration, then exit without running.
  #[arg(long)]
  validate_only: bool,

  /// Number of pre-warm ticks to run before exiting (0 = run forever).
  #[arg(long, default_value_t = 0)]
  ticks: u64,

  /// Delay between pre-warm ticks.
  #[arg(long, default_value_t = 250)]
  tick_interval_ms: u64,
}

async fn load_and_build(
  args: &Args,
  logger: &Option<async_channel::Sender<LogMessage>>,
) -> Result<(RuleStore, PreWarmRegistry, SizingAlgorithm)> {
  let yaml_text = tokio::fs::read_to_string(&args.config)
    .await
    .with_context(|| format!("failed to read config file {:?}", args.config))?;
  let loaded = config::load(&yaml_text, logger).await?;
  let registry = PreWarmRegistry::rebuild(&loaded.rules);
  let store = RuleStore::build(loaded.rules)?;
  Ok((store, registry, loaded.prewarm.sizing_algorithm))
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  let (log_sender, log_receiver) = async_channel::unbounded::<LogMessage>();
  tokio::spawn(async move {
    while let Ok(msg) = log_receiver.recv().await {
      let (text, is_error) = msg.get_message();
      if is_error {
        eprintln!("ERROR: {text}");
      } else {
        println!("{text}");
      }
    }
  });
  let logger = Some(log_sender);

  let (store, registry, sizing_algorithm) = match load_and_build(&args, &logger).await {
    Ok(result) => result,
    Err(err) => {
      eprintln!("FATAL ERROR: {err:#}");
      std::process::exit(1);
    }
  };

  println!(
    "loaded {} rule(s), {} pre-warm destination(s)",
    store.rule_count(),
    registry.entries().count()
  );

  if args.validate_only {
    return Ok(());
  }

  let mut queue = ThreadQueue::new(sizing_algorithm);
  for entry in registry.entries() {
    queue.reconfigure(entry.dst.clone(), entry.conf.clone(), entry.counters.clone());
  }

  let dialer = sni_core::prewarm::TokioDialer::new();
  let mut tick_count: u64 = 0;
  loop {
    queue.tick(&dialer).await;
    tick_count += 1;
    if args.ticks != 0 && tick_count >= args.ticks {
      break;
    }
    tokio::time::sleep(Duration::from_millis(args.tick_interval_ms)).await;
  }

  Ok(())
}
