mod console;

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bulkops_config::{ScriptValues, Settings, SettingsStore};
use bulkops_engine::{
  ChannelNotifier, Engine, EngineSettings, MutationItem, PREVIEW_LIMIT, Plan, PlanItem, RunEvent,
  RunOutcome,
};
use bulkops_transport::{DirectTransport, HostPolicy, ProxyTransport, Transport, redact};

/// Bulkops - bulk changes against a paginated REST API
#[derive(Parser)]
#[command(name = "bulkops")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.bulkops)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Bearer token, instead of the saved one
  #[arg(long, global = true, env = "BULKOPS_TOKEN", hide_env_values = true)]
  token: Option<String>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Show or change connection settings
  Config {
    #[command(subcommand)]
    action: ConfigAction,
  },

  /// List the available scripts
  Scripts,

  /// Describe a script's fields
  Fields { script: String },

  /// List the options of a field backed by reference data
  Options {
    script: String,
    field: String,
    #[command(flatten)]
    values: ValueArgs,
  },

  /// Show what a script would change, without changing anything
  Preview {
    script: String,
    #[command(flatten)]
    values: ValueArgs,
  },

  /// Plan and execute a script (Ctrl-C cancels)
  Run {
    script: String,
    #[command(flatten)]
    values: ValueArgs,
  },

  /// Reload the reference data a script caches
  Refresh {
    script: String,
    #[command(flatten)]
    values: ValueArgs,
  },

  /// Send a single request and print the response
  Request {
    /// GET, POST, PUT, PATCH, DELETE, HEAD or OPTIONS
    method: String,

    /// Path relative to the base URL, or an absolute URL
    path: String,

    /// Request header as 'Key: Value' (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request headers as a JSON object
    #[arg(long)]
    headers_json: Option<String>,

    /// Request body; read from stdin when omitted and stdin is piped
    #[arg(long)]
    body: Option<String>,
  },
}

#[derive(Subcommand)]
enum ConfigAction {
  /// Print the current settings
  Show,

  /// Change settings; unspecified ones keep their value
  Set(ConfigUpdate),

  /// Remove saved settings and token
  Clear,
}

#[derive(Args)]
struct ConfigUpdate {
  #[arg(long)]
  base_url: Option<String>,

  #[arg(long, conflicts_with = "direct")]
  proxy_url: Option<String>,

  /// Send requests directly instead of through the proxy
  #[arg(long)]
  direct: bool,

  /// Save the token given with --token to disk
  #[arg(long)]
  persist_token: Option<bool>,

  #[arg(long)]
  concurrency: Option<usize>,

  #[arg(long)]
  chunk_size: Option<usize>,

  #[arg(long)]
  timeout_ms: Option<u64>,

  #[arg(long)]
  max_attempts: Option<u32>,

  /// Host direct requests may reach (repeatable, replaces the list)
  #[arg(long = "allow-host")]
  allowed_hosts: Vec<String>,
}

#[derive(Args)]
struct ValueArgs {
  /// Field value as NAME=VALUE (repeatable); lists are comma separated
  #[arg(long = "set", value_name = "NAME=VALUE")]
  set: Vec<String>,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let mut token = cli.token.clone();
  match execute(cli, &mut token) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("error: {}", redact(&format!("{e:#}"), token.as_deref()));
      ExitCode::FAILURE
    }
  }
}

fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .with_target(false)
    .init();
}

fn execute(cli: Cli, token: &mut Option<String>) -> Result<()> {
  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory, pass --data-dir")?
      .join(".bulkops"),
  };
  let store = SettingsStore::new(data_dir);

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    if token.is_none() {
      *token = store
        .load_token()
        .await
        .context("failed to read the saved token")?;
    }
    dispatch(cli.command, &store, token.clone()).await
  })
}

async fn dispatch(command: Option<Commands>, store: &SettingsStore, token: Option<String>) -> Result<()> {
  let Some(command) = command else {
    println!("bulkops - use --help to see available commands");
    return Ok(());
  };

  match command {
    Commands::Config { action } => configure(action, store, token.as_deref()).await,
    Commands::Scripts => {
      let engine = build_engine(store, token).await?;
      for script in engine.registry().iter() {
        println!("{:<20} {}", script.id(), script.name());
      }
      Ok(())
    }
    Commands::Fields { script } => {
      let engine = build_engine(store, token).await?;
      print_fields(&engine, &script)
    }
    Commands::Options {
      script,
      field,
      values,
    } => {
      let engine = build_engine(store, token).await?;
      let values = parse_values(&values.set)?;
      let options = engine
        .load_options(&script, &field, values, &CancellationToken::new())
        .await
        .with_context(|| format!("failed to load options for '{field}'"))?;
      for option in options {
        println!("{:<10} {}", option.value, option.label);
      }
      Ok(())
    }
    Commands::Preview { script, values } => {
      let engine = build_engine(store, token).await?;
      let values = parse_values(&values.set)?;
      let plan = engine
        .preview(&script, values, &CancellationToken::new())
        .await
        .context("preview failed")?;
      print_plan(&plan);
      Ok(())
    }
    Commands::Run { script, values } => {
      let engine = build_engine(store, token.clone()).await?;
      let values = parse_values(&values.set)?;
      run_script(&engine, &script, values, token).await
    }
    Commands::Refresh { script, values } => {
      let engine = build_engine(store, token).await?;
      let values = parse_values(&values.set)?;
      engine
        .refresh(&script, values, &CancellationToken::new())
        .await
        .context("refresh failed")?;
      eprintln!("Reference data reloaded");
      Ok(())
    }
    Commands::Request {
      method,
      path,
      headers,
      headers_json,
      body,
    } => {
      let engine = build_engine(store, token).await?;
      let mut header_map = console::parse_headers(&headers.join("\n"))?;
      if let Some(json) = headers_json {
        header_map.extend(console::parse_headers(&json)?);
      }
      let body = match body {
        Some(body) => console::parse_body(&body),
        None => read_body_from_stdin()?,
      };

      let response = console::send(
        engine.client(),
        &method,
        &path,
        header_map,
        body,
        &CancellationToken::new(),
      )
      .await
      .context("request failed")?;
      println!("{}", console::render(&response));
      Ok(())
    }
  }
}

async fn configure(action: ConfigAction, store: &SettingsStore, token: Option<&str>) -> Result<()> {
  match action {
    ConfigAction::Show => {
      let settings = store.load().await.context("failed to load settings")?;
      println!("{}", serde_json::to_string_pretty(&settings)?);
      println!("token: {}", if token.is_some() { "set" } else { "not set" });
      println!("data dir: {}", store.root().display());
    }
    ConfigAction::Set(update) => {
      let mut settings = store.load().await.context("failed to load settings")?;
      apply_update(&mut settings, update);
      let settings = settings.normalized();

      store.save(&settings).await.context("failed to save settings")?;
      store
        .save_token(&settings, token)
        .await
        .context("failed to save the token")?;
      eprintln!("Settings saved to {}", store.root().display());
    }
    ConfigAction::Clear => {
      store.clear().await.context("failed to clear settings")?;
      eprintln!("Settings cleared");
    }
  }
  Ok(())
}

fn apply_update(settings: &mut Settings, update: ConfigUpdate) {
  if let Some(base_url) = update.base_url {
    settings.base_url = base_url;
  }
  if let Some(proxy_url) = update.proxy_url {
    settings.proxy_url = proxy_url;
  }
  if update.direct {
    settings.proxy_url.clear();
  }
  if let Some(persist) = update.persist_token {
    settings.persist_token = persist;
  }
  if let Some(concurrency) = update.concurrency {
    settings.concurrency = concurrency;
  }
  if let Some(chunk_size) = update.chunk_size {
    settings.chunk_size = chunk_size;
  }
  if let Some(timeout_ms) = update.timeout_ms {
    settings.timeout_ms = timeout_ms;
  }
  if let Some(max_attempts) = update.max_attempts {
    settings.max_attempts = max_attempts;
  }
  if !update.allowed_hosts.is_empty() {
    settings.allowed_hosts = update.allowed_hosts;
  }
}

async fn build_engine(store: &SettingsStore, token: Option<String>) -> Result<Arc<Engine>> {
  let settings = store.load().await.context("failed to load settings")?;
  let mut engine = Engine::new(transport_for(&settings, token), EngineSettings::from(&settings));
  engine.register_scripts(bulkops_scripts::all());
  Ok(Arc::new(engine))
}

/// The proxy when one is configured, direct requests otherwise.
fn transport_for(settings: &Settings, token: Option<String>) -> Arc<dyn Transport> {
  if settings.proxy_url.is_empty() {
    let policy = HostPolicy::new(&settings.allowed_hosts);
    Arc::new(DirectTransport::new(policy).with_token(token))
  } else {
    Arc::new(ProxyTransport::new(settings.proxy_url.clone()).with_token(token))
  }
}

/// Parse repeated `NAME=VALUE` flags. Values that parse as JSON keep their
/// type, anything else is a string.
fn parse_values(assignments: &[String]) -> Result<ScriptValues> {
  let mut values = ScriptValues::new();
  for assignment in assignments {
    let Some((name, raw)) = assignment.split_once('=') else {
      bail!("'{assignment}' is not in NAME=VALUE form");
    };
    let name = name.trim();
    if name.is_empty() {
      bail!("'{assignment}' has no field name");
    }
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    values.set(name, value);
  }
  Ok(values)
}

fn read_body_from_stdin() -> Result<Option<console::Body>> {
  if io::stdin().is_terminal() {
    return Ok(None);
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read body from stdin")?;
  Ok(console::parse_body(&input))
}

fn print_fields(engine: &Engine, script_id: &str) -> Result<()> {
  let script = engine.script(script_id)?;
  println!("{} ({})", script.name(), script.id());
  for field in script.fields() {
    let kind = format!("{:?}", field.kind).to_lowercase();
    let mut line = format!("  {:<22} {:<12} {}", field.name, kind, field.label);
    if field.required {
      line.push_str(" *");
    }
    if let Some(default) = &field.default {
      line.push_str(&format!(" [default: {default}]"));
    }
    if field.loads_options {
      line.push_str(" (options)");
    }
    println!("{line}");
  }
  Ok(())
}

fn print_plan(plan: &Plan) {
  if plan.is_empty() {
    println!("Nothing to change ({} records scanned)", plan.scanned);
    return;
  }

  println!("What will change:");
  for item in &plan.items {
    match item {
      PlanItem::Record(record) => println!("  {}", change_line(record)),
      PlanItem::Batch(batch) => {
        println!("  {}", item.label());
        for member in batch.members.iter().take(PREVIEW_LIMIT) {
          println!("    {}", change_line(member));
        }
        if batch.members.len() > PREVIEW_LIMIT {
          println!("    … and {} more", batch.members.len() - PREVIEW_LIMIT);
        }
      }
    }
  }
  println!(
    "{} items, {} records ({} scanned)",
    plan.items.len(),
    plan.record_count(),
    plan.scanned
  );
}

fn change_line(item: &MutationItem) -> String {
  let list = |labels: &[String]| {
    if labels.is_empty() {
      "(none)".to_string()
    } else {
      labels.join(", ")
    }
  };

  let mut line = format!(
    "{}: {} -> {}",
    item.label(),
    list(&item.summary.current),
    list(&item.summary.next)
  );
  if let Some(note) = &item.summary.note {
    line.push_str(&format!(" ({note})"));
  }
  line
}

async fn run_script(
  engine: &Arc<Engine>,
  script_id: &str,
  values: ScriptValues,
  token: Option<String>,
) -> Result<()> {
  // Fail on unknown ids before anything is spawned
  engine.script(script_id)?;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let handle = engine.start(script_id, values, Arc::new(ChannelNotifier::new(tx)));
  eprintln!("Run {} started", handle.run_id());

  let printer = tokio::spawn(async move {
    while let Some(event) = rx.recv().await {
      print_event(&event, token.as_deref());
    }
  });

  let cancel = handle.cancellation_token();
  let signal = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Cancelling, waiting for in-flight requests...");
      cancel.cancel();
    }
  });

  let summary = handle.wait().await;
  signal.abort();
  // The notifier is dropped with the run, which closes the channel
  let _ = printer.await;

  let summary = summary.context("run failed")?;
  let progress = summary.progress;
  eprintln!(
    "{} of {} done: {} ok, {} failed",
    progress.done, progress.total, progress.ok, progress.fail
  );

  match summary.outcome {
    RunOutcome::Completed if progress.fail == 0 => Ok(()),
    RunOutcome::Completed => bail!("{} items failed", progress.fail),
    RunOutcome::Cancelled => bail!("run cancelled"),
    RunOutcome::Aborted { item, error } => bail!("run aborted at {item}: {error}"),
  }
}

fn print_event(event: &RunEvent, token: Option<&str>) {
  match event {
    RunEvent::RunStarted { progress, .. } => {
      eprintln!("{} items to execute", progress.total);
    }
    RunEvent::ChunkStarted { chunk, chunks, size, .. } => {
      if *chunks > 1 {
        eprintln!("Chunk {chunk}/{chunks} ({size} items)");
      }
    }
    RunEvent::ItemSucceeded { label, progress, .. } => {
      eprintln!("[{}/{}] ok      {}", progress.done, progress.total, label);
    }
    RunEvent::ItemFailed {
      label,
      error,
      progress,
      ..
    } => {
      eprintln!(
        "[{}/{}] failed  {}: {}",
        progress.done,
        progress.total,
        label,
        redact(error, token)
      );
    }
    RunEvent::RunFinished { .. } => {}
  }
}
