//! CLI command implementations
//!
//! `serve` wires the configured components together and runs until
//! interrupted; `validate` and `preview` are the operator-facing paths to
//! the mapping validator and engine for debugging mappings offline.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::application::audit::AuditManager;
use crate::application::mapping::{MappingEngine, MappingValidator, ValidationReport};
use crate::application::runner::{ExecutionQueue, RunnerService};
use crate::application::sandbox::{Sandbox, SandboxLimits};
use crate::application::scheduler::SchedulerService;
use crate::application::telemetry::TelemetryHub;
use crate::domain::entities::{Mapping, Schema};
use crate::domain::repositories::Store;
use crate::domain::value_objects::Value;
use crate::infrastructure::config::CoreConfig;
use crate::infrastructure::connectors::{MemoryConnector, MemoryConnectorProvider};
use crate::infrastructure::storage::{MemoryStore, SqliteStore};

/// Command that runs the execution core as a long-lived process
pub struct ServeCommand;

impl ServeCommand {
    pub async fn execute(database: Option<&Path>, memory: bool) -> Result<()> {
        let mut config = CoreConfig::from_env();
        if let Some(database) = database {
            config.database_path = database.display().to_string();
        }

        let store: Arc<dyn Store> = if memory {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        } else {
            info!(path = %config.database_path, "opening SQLite store");
            Arc::new(SqliteStore::open(&config.database_path)?)
        };

        // Connector adapters are deployment-specific; the embedded runner
        // ships with the in-memory connector until adapters are registered.
        let connector = Arc::new(MemoryConnector::new());
        let provider = Arc::new(MemoryConnectorProvider::new(connector));

        let sandbox = Sandbox::new(SandboxLimits::from(&config));
        let engine = MappingEngine::new(sandbox);
        let queue = Arc::new(ExecutionQueue::new(config.execution_queue_capacity));

        let audit = AuditManager::new(Arc::clone(&store), &config);
        let telemetry = TelemetryHub::new(&config);
        telemetry.set_audit(Arc::clone(&audit));

        let runner = RunnerService::new(
            Arc::clone(&store),
            provider,
            engine,
            Arc::clone(&queue),
            &config,
        );
        runner.set_audit(Arc::clone(&audit));
        runner.set_telemetry(Arc::clone(&telemetry));

        let scheduler = SchedulerService::new(Arc::clone(&store), queue, &config);

        audit.start();
        telemetry.start();
        let requeued = runner.recover().await?;
        if requeued > 0 {
            info!(requeued, "recovered queued executions");
        }
        runner.start();
        scheduler.start();
        info!("execution core running; press Ctrl-C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("shutting down");

        scheduler.shutdown().await;
        runner.shutdown().await;
        telemetry.shutdown().await;
        audit.shutdown().await;
        Ok(())
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file {}", what, path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {} file {}", what, path.display()))
}

/// Command that validates a mapping from JSON files and prints the report
pub struct ValidateCommand;

impl ValidateCommand {
    pub fn execute(mapping: &Path, source: &Path, target: &Path) -> Result<()> {
        let mapping: Mapping = load_json(mapping, "mapping")?;
        let source: Schema = load_json(source, "source schema")?;
        let target: Schema = load_json(target, "target schema")?;

        let validator = MappingValidator::new(Sandbox::new(SandboxLimits::from(
            &CoreConfig::from_env(),
        )));
        let report = validator.validate(&mapping, &source, &target);
        Self::print_report(&mapping, &report);

        if report.valid {
            Ok(())
        } else {
            anyhow::bail!("mapping '{}' failed validation", mapping.name)
        }
    }

    fn print_report(mapping: &Mapping, report: &ValidationReport) {
        println!("\n{}", "=".repeat(70));
        println!(
            "MAPPING VALIDATION: {} ({})",
            mapping.name,
            if report.valid { "PASS" } else { "FAIL" }
        );
        println!("{}", "=".repeat(70));

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for issue in &report.errors {
                println!("  ✗ {}", issue.message);
            }
        }
        if !report.warnings.is_empty() {
            println!("\nWarnings:");
            for issue in &report.warnings {
                println!("  ! {}", issue.message);
            }
        }

        println!("\nCoverage:");
        println!("  • Source fields:   {:.1}%", report.coverage.source_field_coverage);
        println!("  • Target fields:   {:.1}%", report.coverage.target_field_coverage);
        println!("  • Required fields: {:.1}%", report.coverage.required_field_coverage);

        if !report.suggestions.is_empty() {
            println!("\nSuggestions:");
            for suggestion in &report.suggestions {
                println!(
                    "  • map '{}' -> '{}' (similarity {:.2})",
                    suggestion.suggested_source, suggestion.target_field, suggestion.similarity
                );
            }
        }
        if !report.unused_source_columns.is_empty() {
            println!(
                "\nUnused source columns: {}",
                report.unused_source_columns.join(", ")
            );
        }
        println!();
    }
}

/// Command that runs sample records through a mapping and prints each outcome
pub struct PreviewCommand;

impl PreviewCommand {
    pub fn execute(
        mapping: &Path,
        source: &Path,
        target: &Path,
        records: &Path,
        limit: usize,
    ) -> Result<()> {
        let mapping: Mapping = load_json(mapping, "mapping")?;
        let source: Schema = load_json(source, "source schema")?;
        let target: Schema = load_json(target, "target schema")?;
        let sample: Vec<serde_json::Value> = load_json(records, "records")?;

        let config = CoreConfig::from_env();
        let sandbox = Sandbox::new(SandboxLimits::from(&config));

        // Previews run the same static pass a save would.
        let validator = MappingValidator::new(sandbox);
        let report = validator.validate(&mapping, &source, &target);
        if !report.valid {
            for issue in &report.errors {
                println!("  ✗ {}", issue.message);
            }
            anyhow::bail!("mapping '{}' failed validation; preview aborted", mapping.name);
        }

        let batch: Vec<Value> = sample.into_iter().take(limit).map(Value::from).collect();
        let engine = MappingEngine::new(sandbox);
        let outcomes = engine.preview(&mapping, &batch, Utc::now());

        println!("\n{}", "=".repeat(70));
        println!("MAPPING PREVIEW: {} ({} records)", mapping.name, outcomes.len());
        println!("{}", "=".repeat(70));
        let mut ok = 0usize;
        for (index, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Ok(produced) => {
                    ok += 1;
                    for record in produced {
                        let rendered = serde_json::to_string(record)?;
                        println!("  [{}] ok  {}", index, rendered);
                    }
                    if produced.is_empty() {
                        println!("  [{}] ok  (no output)", index);
                    }
                }
                Err(message) => println!("  [{}] err {}", index, message),
            }
        }
        println!("\n{}/{} records mapped cleanly\n", ok, outcomes.len());
        Ok(())
    }
}
