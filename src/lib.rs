// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod data;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod forecast;
pub mod fs;
pub mod job;
pub mod logging;
pub mod provider;
pub mod types;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, info};

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::cli::CliArgs;
use crate::config::{default_config_path, load_and_validate, ConfigFile};
use crate::dag::{execution_levels, to_dot, Analyser, AnalyserRequest};
use crate::data::{ParamValue, Task, TaskIdAllocator};
use crate::engine::{
    FanoutSink, JsonLinesSink, SchedulerBuilder, TaskOutcome, TaskReport, TracingSink,
    TransitionSink,
};
use crate::exec::{BackendRegistry, SimulatedKernel};
use crate::fs::{FileSystem, RealFileSystem};
use crate::provider::InMemoryDataProvider;
use crate::types::{CheckpointPolicy, DataKey, Direction};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - backends with simulated kernels, the in-memory data provider and the
///   optional checkpoint store
/// - the scheduler runtime and its transition sinks
/// - Ctrl-C handling
///
/// The workload is queued before the event loop starts, so an idle exit
/// can never happen before every task was seen.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    debug!(path = %config_path.display(), "loading config");
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        return print_dry_run(&cfg);
    }
    if cfg.tasks.is_empty() {
        println!("flowdag: no [[task]] entries; nothing to do");
        return Ok(());
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let workdir = cfg.scheduler.workdir.clone();

    let registry = BackendRegistry::default();
    let mut builder = SchedulerBuilder::new()
        .options(cfg.runtime_options())
        .block_size(cfg.checkpoint.block_size)
        .checkpoint_policy(cfg.checkpoint.policy)
        .selector(cfg.selector());

    for settings in &cfg.backends {
        let mut kernel = SimulatedKernel::new(Arc::clone(&fs), workdir.join(&settings.spec.name))
            .with_speedup(settings.speedup)
            .with_stage_ms(settings.stage_ms);
        for (core_element, base_ms) in &cfg.core_elements {
            kernel = kernel.with_base_ms(core_element.clone(), *base_ms);
        }
        let backend = registry.build(settings.spec.clone(), Arc::new(kernel))?;
        builder = builder.backend(backend)?;
    }

    let provider = InMemoryDataProvider::new(Arc::clone(&fs), workdir.join("data"));
    for (name, contents) in &cfg.data.objects {
        provider.seed(DataKey::Object(name.clone()), contents.as_bytes());
    }
    for (name, contents) in &cfg.data.files {
        provider.seed(DataKey::File(name.clone()), contents.as_bytes());
    }
    builder = builder.provider(Arc::new(provider));

    if cfg.checkpoint.policy != CheckpointPolicy::None {
        let store: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpointStore::new(Arc::clone(&fs), cfg.checkpoint.dir.clone()));
        builder = builder.checkpoint_store(store);
    }

    let mut sinks: Vec<Arc<dyn TransitionSink>> = vec![Arc::new(TracingSink)];
    if let Some(path) = &args.events {
        sinks.push(Arc::new(JsonLinesSink::create(path)?));
    }
    builder = builder.sink(Arc::new(FanoutSink::new(sinks)));

    let mut scheduler = builder.build()?;
    for spec in &cfg.tasks {
        let id = scheduler.submit(spec.clone())?;
        debug!(task = %id, core_element = %spec.core_element, "queued workload task");
    }
    info!(tasks = cfg.tasks.len(), backends = cfg.backends.len(), "starting scheduler");

    let (handle, mut reports, join) = scheduler.spawn();

    // Ctrl-C → stop the loop.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = handle.shutdown().await;
        });
    }

    let mut collected = Vec::new();
    while let Some(report) = reports.recv().await {
        collected.push(report);
    }
    join.await??;

    print_summary(&collected);

    let failed = collected.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        return Err(anyhow!("{failed} of {} tasks failed", collected.len()));
    }
    Ok(())
}

fn print_summary(reports: &[TaskReport]) {
    let mut sorted: Vec<&TaskReport> = reports.iter().collect();
    sorted.sort_by_key(|r| r.task);

    println!("flowdag run summary");
    for report in sorted {
        let backend = report.backend.as_deref().unwrap_or("-");
        match &report.outcome {
            TaskOutcome::Completed(profile) => println!(
                "  {:<5} {:<16} {:<12} completed in {:.1}ms, {:.1}ms after submission (energy {:.3}J, cost {:.4})",
                report.task.to_string(),
                report.core_element,
                backend,
                profile.elapsed_ms,
                profile.turnaround_ms().unwrap_or(profile.elapsed_ms),
                profile.energy_j,
                profile.cost
            ),
            TaskOutcome::Failed(failure) => println!(
                "  {:<5} {:<16} {:<12} failed ({:?}): {}",
                report.task.to_string(),
                report.core_element,
                backend,
                failure.kind,
                failure.message
            ),
        }
    }

    let completed = reports.iter().filter(|r| r.is_success()).count();
    println!(
        "  {} completed, {} failed",
        completed,
        reports.len() - completed
    );
}

/// Analyse the workload without executing it and print the resulting graph.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    println!("flowdag dry-run");
    println!(
        "  scheduler.max_concurrent_jobs = {}",
        cfg.scheduler
            .max_concurrent_jobs
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );
    println!("  checkpoint.block_size = {}", cfg.checkpoint.block_size);
    println!("  checkpoint.policy = {:?}", cfg.checkpoint.policy);
    println!();

    println!("backends ({}):", cfg.backends.len());
    for settings in &cfg.backends {
        let spec = &settings.spec;
        println!("  - {} ({}, {} slots)", spec.name, spec.kind, spec.slots);
        let mut impls: Vec<_> = spec.implementations.iter().collect();
        impls.sort();
        for (core_element, ids) in impls {
            println!("      {core_element}: {ids:?}");
        }
    }
    if !cfg.pins.is_empty() {
        println!("pins:");
        for (core_element, backend) in &cfg.pins {
            println!("  - {core_element} -> {backend}");
        }
    }
    println!();

    let mut analyser = Analyser::new(cfg.checkpoint.block_size, cfg.checkpoint.policy);
    let ids = TaskIdAllocator::new();

    println!("tasks ({}):", cfg.tasks.len());
    for spec in &cfg.tasks {
        let task = Task::from_spec(ids.allocate(), spec.clone());
        println!("  - {} {}", task.id, describe_task(&task));
        analyser.process(AnalyserRequest::NewTask(task))?;
    }
    println!();

    let graph = analyser.graph();
    println!("edges ({}):", graph.edge_count());
    for edge in graph.edges() {
        println!("  - {} -> {} [{}]", edge.from, edge.to, edge.entry);
    }
    println!();

    println!("levels:");
    for (level, tasks) in execution_levels(graph)?.iter().enumerate() {
        let names: Vec<String> = tasks.iter().map(|t| t.to_string()).collect();
        println!("  {level}: {}", names.join(" "));
    }
    println!();

    println!("{}", to_dot(graph));
    debug!("dry-run complete (no execution)");
    Ok(())
}

fn describe_task(task: &Task) -> String {
    let params: Vec<String> = task
        .params
        .iter()
        .map(|p| match &p.value {
            ParamValue::Basic(v) => format!("{v:?}"),
            ParamValue::Data(key) => {
                let direction = match p.direction {
                    Direction::In => "in",
                    Direction::Out => "out",
                    Direction::InOut => "inout",
                };
                format!("{direction} {key}")
            }
        })
        .collect();
    format!("{}({})", task.core_element, params.join(", "))
}
