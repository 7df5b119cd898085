//! Helios Cohort CLI
//!
//! Compiles a cohort definition and prints what would run: the warehouse
//! SQL, the search index query and the routing decision. Nothing is sent to
//! a backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use helios_cohort::CohortService;
use helios_cohort::compiler::{QueryPlan, blocking_features, index_unsupported_features};
use helios_cohort::dataset::DatasetContext;
use helios_cohort::error::{BackendError, CohortResult};
use helios_cohort::extraction::ExtractionRequest;
use helios_cohort::index::{IndexClient, IndexPlanExecutor, IndexQuery, IndexQueryBuilder};
use helios_cohort::resolver::{CodeIndexEntry, StaticCodeDomainIndex};
use helios_cohort::routing::{ExecutionRouter, RouterConfig};
use helios_cohort::types::{SearchRequest, Stratification};
use helios_cohort::warehouse::{
    SqlFragment, WarehouseClient, WarehousePlanExecutor, WarehouseQueryBuilder, WarehouseRow,
};

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(name = "cohort")]
#[command(about = "Cohort criteria compiler")]
pub struct Cli {
    /// Log level.
    #[arg(long, env = "COHORT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Warehouse project.
    #[arg(long, env = "COHORT_PROJECT", default_value = "local")]
    pub project: String,

    /// Warehouse dataset.
    #[arg(long, env = "COHORT_DATASET")]
    pub dataset: String,

    /// Base name of the dataset's search index, if it has one.
    #[arg(long, env = "COHORT_INDEX_BASE_NAME")]
    pub index_base_name: Option<String>,

    /// Allow plans to be routed to the search index.
    #[arg(long, env = "COHORT_INDEX_ENABLED", action = clap::ArgAction::Set, default_value_t = false)]
    pub index_enabled: bool,

    /// Warehouse query deadline.
    #[arg(long, env = "COHORT_WAREHOUSE_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub warehouse_timeout: Duration,

    /// Search index request deadline.
    #[arg(long, env = "COHORT_INDEX_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    pub index_timeout: Duration,

    /// JSON array of code index entries used to resolve rollup codes.
    #[arg(long, env = "COHORT_CODE_INDEX")]
    pub code_index: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Compile a search request and print the queries and routing decision.
    Compile {
        /// Path to the search request JSON.
        request: PathBuf,

        /// Also render the demographic breakdown, stratified by this attribute.
        #[arg(long, value_enum)]
        breakdown: Option<BreakdownArg>,
    },
    /// Build the per-domain extraction queries of a dataset request.
    Extract {
        /// Path to the extraction request JSON.
        request: PathBuf,
    },
}

/// Stratification attribute on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakdownArg {
    Gender,
    SexAtBirth,
}

impl From<BreakdownArg> for Stratification {
    fn from(arg: BreakdownArg) -> Self {
        match arg {
            BreakdownArg::Gender => Stratification::Gender,
            BreakdownArg::SexAtBirth => Stratification::SexAtBirth,
        }
    }
}

impl Cli {
    fn router_config(&self) -> anyhow::Result<RouterConfig> {
        let (config, warnings) = RouterConfig::builder()
            .index_enabled(self.index_enabled)
            .indexed_dataset(self.dataset.clone())
            .warehouse_timeout(self.warehouse_timeout)
            .index_timeout(self.index_timeout)
            .build_with_warnings()?;
        for warning in &warnings {
            warn!("{}", warning);
        }
        Ok(config)
    }

    fn dataset_context(&self) -> anyhow::Result<DatasetContext> {
        let builder = DatasetContext::builder()
            .project(self.project.clone())
            .dataset(self.dataset.clone());
        let builder = match &self.index_base_name {
            Some(base) => builder.index_base_name(base.clone()),
            None => builder,
        };
        Ok(builder.build()?)
    }
}

/// Answers every call with [`BackendError::Unavailable`]; the CLI only renders.
struct OfflineBackend;

impl OfflineBackend {
    fn unavailable(backend_name: &str) -> helios_cohort::CohortError {
        BackendError::Unavailable {
            backend_name: backend_name.to_string(),
            reason: "the cohort CLI does not connect to backends".to_string(),
        }
        .into()
    }
}

#[async_trait]
impl WarehouseClient for OfflineBackend {
    async fn run_query(
        &self,
        _query: &SqlFragment,
        _timeout: Duration,
    ) -> CohortResult<Vec<WarehouseRow>> {
        Err(Self::unavailable("warehouse"))
    }
}

#[async_trait]
impl IndexClient for OfflineBackend {
    async fn run_query(&self, _query: &IndexQuery) -> CohortResult<Value> {
        Err(Self::unavailable("index"))
    }
}

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("helios_cohort={level},helios_cohort_cli={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_code_index(path: Option<&Path>) -> anyhow::Result<StaticCodeDomainIndex> {
    match path {
        Some(path) => {
            let entries: Vec<CodeIndexEntry> = read_json(path)?;
            let index = StaticCodeDomainIndex::from_entries(entries);
            debug!(codes = index.len(), path = %path.display(), "Loaded code index");
            Ok(index)
        }
        None => Ok(StaticCodeDomainIndex::new()),
    }
}

fn build_service(cli: &Cli) -> anyhow::Result<CohortService> {
    let config = cli.router_config()?;
    let offline = Arc::new(OfflineBackend);
    let router = ExecutionRouter::new(
        config.clone(),
        Arc::new(WarehousePlanExecutor::new(
            offline.clone(),
            config.warehouse_timeout,
        )),
    )
    .with_index(Arc::new(IndexPlanExecutor::new(offline, config.index_timeout)));

    let code_index = load_code_index(cli.code_index.as_deref())?;
    Ok(CohortService::builder()
        .code_index(Arc::new(code_index))
        .router(router)
        .build()?)
}

fn fragment_json(fragment: &SqlFragment) -> Value {
    json!({ "sql": fragment.sql, "params": fragment.params_json() })
}

/// The index rendering, or why the index cannot answer the plan. Hierarchy
/// roots are never expanded here, so rollups render as unsupported.
fn index_json(ctx: &DatasetContext, plan: &QueryPlan, breakdown: Option<Stratification>) -> Value {
    let Some(index) = ctx.person_index() else {
        return json!({ "unavailable": "dataset has no search index" });
    };
    let builder = IndexQueryBuilder::new(index);
    let query = match breakdown {
        Some(stratification) => builder.build_breakdown(plan, stratification),
        None => builder.build_count(plan),
    };
    match query {
        Ok(query) => json!({ "index": query.index, "body": query.body }),
        Err(e) => json!({ "unsupported": e.to_string() }),
    }
}

async fn compile_report(
    cli: &Cli,
    request_path: &Path,
    breakdown: Option<Stratification>,
) -> anyhow::Result<Value> {
    let service = build_service(cli)?;
    let ctx = cli.dataset_context()?;
    let request: SearchRequest = read_json(request_path)?;

    let plan = service.prepare(&ctx, &request).await?;
    let decision = service.router().decide(&ctx, &plan);
    info!(target_backend = %decision.target, reason = %decision.reason, "Compiled request");

    let warehouse = match breakdown {
        Some(stratification) => WarehouseQueryBuilder::build_breakdown(&ctx, &plan, stratification),
        None => WarehouseQueryBuilder::build_count(&ctx, &plan),
    };

    Ok(json!({
        "exact_only": plan.exact_only,
        "features": plan.features.iter().map(|f| format!("{f:?}")).collect::<Vec<_>>(),
        "blocking_features": blocking_features(&plan)
            .iter()
            .map(|f| format!("{f:?}"))
            .collect::<Vec<_>>(),
        "index_unsupported_features": index_unsupported_features(&plan)
            .iter()
            .map(|f| format!("{f:?}"))
            .collect::<Vec<_>>(),
        "hierarchy_lookups": plan
            .hierarchy_lookups()
            .iter()
            .map(|lookup| format!("{} {}", lookup.domain.as_str(), lookup.root))
            .collect::<Vec<_>>(),
        "domains": plan.domains().iter().map(|d| d.as_str()).collect::<Vec<_>>(),
        "routing": {
            "target": decision.target.to_string(),
            "reason": decision.reason.to_string(),
        },
        "warehouse": fragment_json(&warehouse),
        "index": index_json(&ctx, &plan, breakdown),
    }))
}

async fn extract_report(cli: &Cli, request_path: &Path) -> anyhow::Result<Value> {
    let service = build_service(cli)?;
    let ctx = cli.dataset_context()?;
    let request: ExtractionRequest = read_json(request_path)?;

    let queries = service.build_extraction_queries(&ctx, &request).await?;
    let mut out = Map::new();
    for (domain, query) in &queries {
        out.insert(domain.as_str().to_string(), fragment_json(query));
    }
    Ok(Value::Object(out))
}

async fn run(cli: &Cli) -> anyhow::Result<Value> {
    match &cli.command {
        Command::Compile { request, breakdown } => {
            compile_report(cli, request, breakdown.map(Stratification::from)).await
        }
        Command::Extract { request } => extract_report(cli, request).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let report = run(&cli).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
