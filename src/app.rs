// src/app.rs

//! Command handlers behind the CLI.
//!
//! This wires together:
//! - persistence (tasks, settings, cookies in the data dir)
//! - the portal transport, session, executor and network gate
//! - the runtime loop and Ctrl-C handling

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::AuthSession;
use crate::cli::{AddArgs, CliArgs, Command};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::config::Settings;
use crate::config::loader::default_data_dir;
use crate::engine::{Runtime, RuntimeOptions, Scheduler, SharedSink, TracingSink};
use crate::exec::ActionExecutor;
use crate::network::{NetworkGate, SystemNetwork, TracerouteProber};
use crate::persist::{FileStore, Persistence};
use crate::portal::HttpPortal;
use crate::task::{Task, TaskStore, parse_date, parse_time};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let data_dir: PathBuf = args.data_dir.clone().unwrap_or_else(default_data_dir);
    let mut store = FileStore::new(&data_dir);
    if let Some(config) = &args.config {
        store = store.with_settings_path(config);
    }
    let persistence: Arc<dyn Persistence> = Arc::new(store);
    let clock: SharedClock = Arc::new(SystemClock);

    match args.command {
        Command::Run { once } => run_scheduler(persistence, clock, once).await,
        Command::Add(add) => add_task(persistence.as_ref(), clock.as_ref(), add),
        Command::List { date } => list_tasks(persistence.as_ref(), date.as_deref()),
        Command::Reset { id } => edit_task(persistence.as_ref(), |store| {
            let id = store.resolve(&id)?;
            store.reset(id)?;
            println!("reset {}", id.short());
            Ok(())
        }),
        Command::Complete { id } => edit_task(persistence.as_ref(), |store| {
            let id = store.resolve(&id)?;
            store.complete(id)?;
            println!("completed {}", id.short());
            Ok(())
        }),
        Command::Remove { id } => edit_task(persistence.as_ref(), |store| {
            let id = store.resolve(&id)?;
            let task = store.remove(id)?;
            println!("removed {} ({})", id.short(), task.name);
            Ok(())
        }),
        Command::ClearRestrictions => edit_task(persistence.as_ref(), |store| {
            let cleared = store.clear_restrictions();
            println!("cleared {cleared} restriction(s)");
            Ok(())
        }),
        Command::Network => check_network(persistence.as_ref(), clock).await,
        Command::Login => test_login(persistence.as_ref(), clock).await,
    }
}

/// Network gate backed by the host's routing table and `traceroute`.
pub fn build_gate(settings: &Settings, clock: SharedClock) -> crate::errors::Result<NetworkGate> {
    NetworkGate::new(
        settings.network.clone(),
        Arc::new(SystemNetwork::new(settings.network.anchor_host.clone())),
        Arc::new(TracerouteProber),
        clock,
    )
}

/// Production scheduler: HTTP transport, system network, tracing sink.
pub fn build_scheduler(
    settings: &Settings,
    clock: SharedClock,
    sink: SharedSink,
) -> crate::errors::Result<Scheduler<HttpPortal>> {
    let transport = HttpPortal::from_settings(&settings.portal)?;
    let session = AuthSession::new(
        transport,
        settings.portal.clone(),
        settings.session.clone(),
        clock.clone(),
        sink.clone(),
    )?;
    let executor = ActionExecutor::new(settings, clock.clone(), sink.clone());
    let gate = build_gate(settings, clock.clone())?;
    Ok(Scheduler::new(
        settings.clone(),
        session,
        executor,
        gate,
        clock,
        sink,
    ))
}

async fn run_scheduler(
    persistence: Arc<dyn Persistence>,
    clock: SharedClock,
    once: bool,
) -> Result<()> {
    let settings = persistence.load_settings()?;
    if !settings.portal.has_credentials() {
        warn!("no portal credentials configured; actions will fail until they are set");
    }

    let tasks = persistence.load_tasks().context("loading tasks")?;
    info!(count = tasks.len(), "tasks loaded");
    let store = TaskStore::new(tasks).into_shared();

    let sink: SharedSink = Arc::new(TracingSink);
    let mut scheduler = build_scheduler(&settings, clock, sink)?;

    match persistence.load_cookies() {
        Ok(cookies) => scheduler.session_mut().seed_cookies(&cookies),
        Err(err) => warn!(error = %err, "ignoring unreadable cookie file"),
    }

    // Ctrl-C → graceful shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    let options = RuntimeOptions {
        exit_after_tick: once,
    };
    let runtime = Runtime::new(scheduler, store, persistence, shutdown_rx, options);
    let scheduler = runtime.run().await?;

    let stats = scheduler.stats();
    println!(
        "ticks: {}  attempts: {}  successes: {}  failures: {}  restricted: {}",
        stats.ticks, stats.attempts, stats.successes, stats.failures, stats.restricted
    );
    Ok(())
}

fn add_task(persistence: &dyn Persistence, clock: &dyn Clock, args: AddArgs) -> Result<()> {
    let date = match args.date.as_deref() {
        Some(raw) => parse_date(raw).map_err(anyhow::Error::msg)?,
        None => clock.now().date(),
    };
    let check_in = parse_time(&args.check_in).map_err(anyhow::Error::msg)?;
    let check_out = parse_time(&args.check_out).map_err(anyhow::Error::msg)?;

    let mut task = Task::new(args.name, date, check_in, check_out)?;
    task.notify = !args.no_notify;

    edit_task(persistence, |store| {
        let id = store.add(task);
        println!("added {}", id.short());
        Ok(())
    })
}

/// Load tasks, apply `edit`, save.
fn edit_task<F>(persistence: &dyn Persistence, edit: F) -> Result<()>
where
    F: FnOnce(&mut TaskStore) -> crate::errors::Result<()>,
{
    let mut store = TaskStore::new(persistence.load_tasks()?);
    edit(&mut store)?;
    if store.take_dirty() {
        persistence.save_tasks(store.tasks())?;
    }
    Ok(())
}

fn list_tasks(persistence: &dyn Persistence, date: Option<&str>) -> Result<()> {
    let filter: Option<NaiveDate> = date.map(parse_date).transpose().map_err(anyhow::Error::msg)?;

    let mut tasks = persistence.load_tasks()?;
    tasks.retain(|t| filter.is_none_or(|d| t.date() == d));
    tasks.sort_by_key(|t| (t.date(), t.check_in_time(), t.check_out_time()));

    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }

    for task in &tasks {
        println!(
            "{}  {}  {}-{}  {:<10}  {}",
            task.id().short(),
            task.date(),
            task.check_in_time().format("%H:%M"),
            task.check_out_time().format("%H:%M"),
            status_label(task),
            task.name
        );
    }
    Ok(())
}

fn status_label(task: &Task) -> String {
    if let Some(reason) = task.abnormal_reason().filter(|_| task.is_abnormal()) {
        return format!("abnormal ({reason})");
    }
    if task.is_restricted() {
        return "restricted".to_string();
    }
    match (task.check_in_done(), task.check_out_done()) {
        (true, true) => "done".to_string(),
        (true, false) => "in".to_string(),
        _ => "pending".to_string(),
    }
}

async fn check_network(persistence: &dyn Persistence, clock: SharedClock) -> Result<()> {
    let settings = persistence.load_settings()?;
    let gate = build_gate(&settings, clock)?;
    if !gate.is_enabled() {
        println!("network gate disabled; actions are always attempted");
        return Ok(());
    }

    let verdict = gate.refresh().await;
    gate.shutdown().await;
    println!("{verdict}");
    Ok(())
}

async fn test_login(persistence: &dyn Persistence, clock: SharedClock) -> Result<()> {
    let settings = persistence.load_settings()?;
    if !settings.portal.has_credentials() {
        bail!("no credentials: set [portal] username and password in the settings file");
    }

    let sink: SharedSink = Arc::new(TracingSink);
    let transport = HttpPortal::from_settings(&settings.portal)?;
    let mut session = AuthSession::new(
        transport,
        settings.portal.clone(),
        settings.session.clone(),
        clock,
        sink,
    )?;

    session.login(true).await?;
    println!("login ok{}", session.user().map(|u| format!(" as {u}")).unwrap_or_default());
    persistence.save_cookies(&session.cookies())?;
    Ok(())
}
