//! Thin command-line front end over `migration_engine`. Argument parsing,
//! config/credential loading, and dashboard rendering live here; every
//! decision about *how* a migration runs lives in the engine — this binary
//! is an external collaborator, not part of the core orchestration logic.

mod clients;
mod config;
mod dashboard;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use migration_engine::error::EngineError;
use migration_engine::external::{CloudProviderClient, ObjectStorageClient, VSphereClient};
use migration_engine::orchestrator::BatchOrchestrator;
use migration_engine::plan::{self, Plan};
use migration_engine::state::{MigrationStatus, StateStore};
use migration_engine::vm::VmDescriptor;
use migration_engine::{catalogue::Catalogue, estimator};

use crate::clients::LocalClients;
use crate::config::Credentials;

#[derive(Parser)]
#[command(name = "vmmigrate", version, about = "Batch VM migration orchestrator", propagate_version = true)]
struct Cli {
    /// Path to a TOML config file (defaults to unset, i.e. built-in defaults + env overrides).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List VMs from an inventory fixture, optionally filtered by name glob or OS family.
    Inventory {
        #[arg(long)]
        inventory: PathBuf,
        #[arg(long)]
        name_glob: Option<String>,
        #[arg(long, value_enum)]
        os_family: Option<OsFamilyArg>,
    },
    /// Validate a plan against an inventory and print the expanded migration entries.
    InventoryPlan {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        inventory: PathBuf,
    },
    /// Migrate a single named VM without writing a plan file.
    Migrate {
        #[arg(long)]
        vm_name: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        inventory: PathBuf,
        #[arg(long)]
        zone: Option<String>,
        #[arg(long)]
        simulate: bool,
    },
    /// Batch operations driven by a plan file.
    #[command(subcommand)]
    Batch(BatchCommands),
}

#[derive(Subcommand)]
enum BatchCommands {
    /// Project duration, cost, and warnings for a plan without running it.
    Estimate {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        inventory: PathBuf,
        #[arg(long)]
        available_disk_gb: Option<f64>,
    },
    /// Prepare and run a new batch. `--id` defaults to a generated hex id
    /// when omitted.
    Run {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        inventory: PathBuf,
        #[arg(long)]
        simulate: bool,
    },
    /// Resume a previously-prepared batch from its persisted state.
    Resume {
        #[arg(long)]
        id: String,
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        inventory: PathBuf,
        #[arg(long)]
        simulate: bool,
    },
    /// Print the current wave/VM status of a batch.
    Status {
        #[arg(long)]
        id: String,
    },
    /// Print a plain-text end-of-run report for a batch.
    Report {
        #[arg(long)]
        id: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OsFamilyArg {
    Linux,
    Windows,
    Other,
}

impl From<OsFamilyArg> for migration_engine::vm::OsFamily {
    fn from(v: OsFamilyArg) -> Self {
        match v {
            OsFamilyArg::Linux => migration_engine::vm::OsFamily::Linux,
            OsFamilyArg::Windows => migration_engine::vm::OsFamily::Windows,
            OsFamilyArg::Other => migration_engine::vm::OsFamily::Other,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print().ok();
            std::process::exit(1);
        }
    };

    logging::init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let code = runtime.block_on(run(cli));
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            if e.downcast_ref::<Cancelled>().is_some() {
                eprintln!("cancelled");
                return 130;
            }
            eprintln!("error: {e:#}");
            match e.downcast_ref::<EngineError>() {
                Some(EngineError::Validation(_))
                | Some(EngineError::UnknownWave(_))
                | Some(EngineError::UnknownInstanceType(_))
                | Some(EngineError::Preflight { .. }) => 2,
                _ => 4,
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cancelled")]
struct Cancelled;

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Inventory { inventory, name_glob, os_family } => {
            cmd_inventory(&inventory, name_glob, os_family).await
        }
        Commands::InventoryPlan { plan, inventory } => cmd_inventory_plan(&plan, &inventory).await,
        Commands::Migrate { vm_name, target, inventory, zone, simulate } => {
            cmd_migrate(cli.config.as_deref(), &vm_name, &target, &inventory, zone, simulate).await
        }
        Commands::Batch(batch_cmd) => dispatch_batch(cli.config.as_deref(), batch_cmd).await,
    }
}

async fn cmd_inventory(
    inventory_path: &PathBuf,
    name_glob: Option<String>,
    os_family: Option<OsFamilyArg>,
) -> anyhow::Result<i32> {
    use migration_engine::filter::{self, Predicate};

    let inventory = clients::load_inventory(inventory_path)?;
    let mut predicates = Vec::new();
    if let Some(glob) = name_glob {
        predicates.push(Predicate::NameGlob(glob));
    }
    if let Some(family) = os_family {
        predicates.push(Predicate::OsFamily(family.into()));
    }

    let report = filter::filter(&inventory, &predicates);
    for vm in &report.matched {
        println!("{}\t{}\t{:?}\t{} vCPU\t{:.1} GB RAM", vm.name, vm.uuid, vm.guest_os_family, vm.cpu_count, vm.memory_gb());
    }
    if !report.rejected.is_empty() {
        eprintln!("{} VM(s) excluded:", report.rejected.len());
        for rejection in &report.rejected {
            eprintln!("  {} (failed {})", rejection.vm_name, rejection.failed_predicate);
        }
    }
    Ok(0)
}

async fn cmd_inventory_plan(plan_path: &PathBuf, inventory_path: &PathBuf) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    let inventory = clients::load_inventory(inventory_path)?;
    let catalogue = Catalogue::seed();
    plan.validate(&catalogue, &inventory)?;

    let expanded = plan::expand(&plan, &inventory);
    for entry in &expanded {
        println!(
            "{}\t-> {}\t(wave {}, zone {}, priority {})",
            entry.vm_name, entry.target, entry.wave, entry.zone, entry.priority
        );
    }
    println!("{} VM(s) expanded from {} migration rule(s)", expanded.len(), plan.migrations.len());
    Ok(0)
}

fn load_plan(path: &PathBuf) -> anyhow::Result<Plan> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading plan file '{}': {e}", path.display()))?;
    Ok(Plan::from_yaml(&text)?)
}

fn find_vm<'a>(inventory: &'a [VmDescriptor], name: &str) -> anyhow::Result<&'a VmDescriptor> {
    inventory
        .iter()
        .find(|vm| vm.name == name)
        .ok_or_else(|| anyhow::anyhow!("no VM named '{name}' in inventory"))
}

async fn cmd_migrate(
    config_path: Option<&std::path::Path>,
    vm_name: &str,
    target: &str,
    inventory_path: &PathBuf,
    zone: Option<String>,
    simulate: bool,
) -> anyhow::Result<i32> {
    let inventory = clients::load_inventory(inventory_path)?;
    let vm = find_vm(&inventory, vm_name)?;

    let mut plan = Plan { version: 1, ..Default::default() };
    plan.waves.push(plan::Wave {
        name: "default".to_string(),
        selector: vec![],
        pause_after: plan::PauseAfter::Continue,
    });
    plan.migrations.push(plan::MigrationEntry {
        selector: plan::Selector { vm_name: Some(vm_name.to_string()), vm_pattern: None },
        target: target.to_string(),
        zone,
        sizing_strategy: None,
        priority: 0,
        wave: "default".to_string(),
        tags: Default::default(),
        overrides: Default::default(),
    });

    let batch_id = format!("adhoc-{}-{}", vm_name, migration_engine::state::BatchState::generate_batch_id());
    run_batch_common(config_path, &batch_id, &plan, &inventory, simulate).await
}

async fn dispatch_batch(config_path: Option<&std::path::Path>, cmd: BatchCommands) -> anyhow::Result<i32> {
    match cmd {
        BatchCommands::Estimate { plan, inventory, available_disk_gb } => {
            let plan = load_plan(&plan)?;
            let inventory = clients::load_inventory(&inventory)?;
            let app_config = config::load_app_config(config_path)?;
            let catalogue = Catalogue::seed();
            let estimate = estimator::estimate_batch(&plan, &inventory, &catalogue, &app_config, available_disk_gb);

            println!("{} VM(s) to migrate", estimate.vm_count);
            println!("source disk: {:.1} GB, required workspace: {:.1} GB", estimate.total_source_disk_gb, estimate.required_workspace_gb);
            println!("estimated duration: {}", humanize(estimate.estimated_duration));
            println!("estimated monthly cost: {:.2}", estimate.estimated_monthly_cost);
            if !estimate.unmappable.is_empty() {
                println!("unmappable VMs: {}", estimate.unmappable.join(", "));
            }
            for warning in &estimate.warnings {
                println!("warning: {warning}");
            }
            Ok(0)
        }
        BatchCommands::Run { id, plan, inventory, simulate } => {
            let plan = load_plan(&plan)?;
            let inventory = clients::load_inventory(&inventory)?;
            let id = id.unwrap_or_else(migration_engine::state::BatchState::generate_batch_id);
            run_batch_common(config_path, &id, &plan, &inventory, simulate).await
        }
        BatchCommands::Resume { id, plan, inventory, simulate } => {
            let plan = load_plan(&plan)?;
            let inventory = clients::load_inventory(&inventory)?;
            resume_batch_common(config_path, &id, &plan, &inventory, simulate).await
        }
        BatchCommands::Status { id } => {
            let app_config = config::load_app_config(config_path)?;
            let state_store = StateStore::new(&app_config.work_dir);
            let batch = state_store.load(&id).await?;
            for (wave, status) in &batch.wave_status {
                println!("{wave}: {status:?}");
            }
            for state in batch.vm_states.values() {
                println!("  {} [{:?}] stage={:?}", state.vm_name, state.status, state.current_stage);
            }
            Ok(0)
        }
        BatchCommands::Report { id } => {
            let app_config = config::load_app_config(config_path)?;
            let state_store = StateStore::new(&app_config.work_dir);
            let batch = state_store.load(&id).await?;
            let outcome = migration_engine::orchestrator::BatchRunOutcome {
                batch_id: batch.batch_id.clone(),
                wave_status: batch.wave_status.clone(),
                vm_results: batch.vm_states.clone(),
            };
            println!("{}", dashboard::render_report(&outcome));
            let failed = outcome
                .vm_results
                .values()
                .filter(|s| s.status == MigrationStatus::Failed)
                .count();
            Ok(if failed > 0 { 3 } else { 0 })
        }
    }
}

fn humanize(d: std::time::Duration) -> String {
    let total = d.as_secs();
    format!("{}h{}m", total / 3600, (total % 3600) / 60)
}

/// The local fixture-backed clients have no real endpoint to authenticate
/// against, so credentials are only validated for presence here and logged
/// (never their values) — a real vSphere/Scaleway client built behind the
/// same trait objects would thread these through instead.
async fn build_clients(app_config: &migration_engine::config::AppConfig) -> (Arc<dyn VSphereClient>, Arc<dyn ObjectStorageClient>, Arc<dyn CloudProviderClient>) {
    let credentials = Credentials::from_env();
    tracing::debug!(
        vcenter_password = credentials.vcenter_password.is_some(),
        scw_access_key = credentials.scw_access_key.is_some(),
        scw_secret_key = credentials.scw_secret_key.is_some(),
        "credentials loaded from environment"
    );
    let local = Arc::new(LocalClients::new(&app_config.work_dir));
    (local.clone(), local.clone(), local)
}

async fn run_batch_common(
    config_path: Option<&std::path::Path>,
    batch_id: &str,
    plan: &Plan,
    inventory: &[VmDescriptor],
    simulate: bool,
) -> anyhow::Result<i32> {
    let app_config = config::load_app_config(config_path)?;
    tokio::fs::create_dir_all(&app_config.work_dir).await?;
    let state_store = Arc::new(StateStore::new(&app_config.work_dir));
    let catalogue = Catalogue::seed();
    let (vsphere, storage, cloud) = build_clients(&app_config).await;
    let (progress_tx, progress_rx) = tokio::sync::mpsc::unbounded_channel();
    let dashboard_handle = dashboard::spawn(progress_rx);

    let orchestrator = BatchOrchestrator::new(
        state_store,
        vsphere,
        storage,
        cloud,
        app_config,
        catalogue,
        &plan.concurrency,
        progress_tx,
    );

    let expanded = orchestrator.prepare_batch(batch_id, plan, inventory).await?;
    let outcome = run_with_ctrl_c(orchestrator.run_batch(batch_id, plan, inventory, &expanded, simulate)).await?;
    dashboard_handle.await.ok();

    println!("{}", dashboard::render_report(&outcome));
    Ok(exit_code_for_outcome(&outcome))
}

async fn resume_batch_common(
    config_path: Option<&std::path::Path>,
    batch_id: &str,
    plan: &Plan,
    inventory: &[VmDescriptor],
    simulate: bool,
) -> anyhow::Result<i32> {
    let app_config = config::load_app_config(config_path)?;
    let state_store = Arc::new(StateStore::new(&app_config.work_dir));
    let catalogue = Catalogue::seed();
    let (vsphere, storage, cloud) = build_clients(&app_config).await;
    let (progress_tx, progress_rx) = tokio::sync::mpsc::unbounded_channel();
    let dashboard_handle = dashboard::spawn(progress_rx);

    let orchestrator = BatchOrchestrator::new(
        state_store,
        vsphere,
        storage,
        cloud,
        app_config,
        catalogue,
        &plan.concurrency,
        progress_tx,
    );

    let expanded = plan::expand(plan, inventory);
    let outcome = run_with_ctrl_c(orchestrator.run_batch(batch_id, plan, inventory, &expanded, simulate)).await?;
    dashboard_handle.await.ok();

    println!("{}", dashboard::render_report(&outcome));
    Ok(exit_code_for_outcome(&outcome))
}

fn exit_code_for_outcome(outcome: &migration_engine::orchestrator::BatchRunOutcome) -> i32 {
    let any_failed = outcome.vm_results.values().any(|s| s.status == MigrationStatus::Failed);
    if any_failed {
        3
    } else {
        0
    }
}

/// Race a batch run against Ctrl-C. Cancellation here is process-level: the
/// orchestrator's own cooperative `cancel` flag is scoped to one wave, so
/// an operator-initiated Ctrl-C is treated as an immediate stop rather than
/// waiting for the current wave to drain.
async fn run_with_ctrl_c<F, T>(fut: F) -> anyhow::Result<T>
where
    F: std::future::Future<Output = Result<T, EngineError>>,
{
    tokio::select! {
        result = fut => Ok(result?),
        _ = tokio::signal::ctrl_c() => Err(Cancelled.into()),
    }
}
