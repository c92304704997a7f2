//! foundry-cast: Cast relational rows into one JSON document per root entity
//!
//! Usage:
//!   # One plan, output next to the working directory as <doc_type>.json
//!   foundry-cast --db shop.db --tenant Prestashop customers.plan.json
//!
//!   # Several plans in one run, shared connection
//!   foundry-cast --db shop.db --tenant Prestashop customers.plan.json orders.plan.json
//!
//!   # Narrow the root scan and print to stdout
//!   foundry-cast --db shop.db --tenant Prestashop --where "id_customer < 100" -o - customers.plan.json

use anyhow::{bail, Context, Result};
use clap::Parser;
use foundry::{CastConfig, CastPlan, Caster, SqliteExecutor};
use std::fs;
use std::io::Write;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "foundry-cast")]
#[command(about = "Cast relational rows into nested JSON documents", long_about = None)]
struct Args {
    /// Plan files (JSON), one cast run each, in order
    #[arg(value_name = "PLAN", required = true)]
    plans: Vec<String>,

    /// SQLite database to read from
    #[arg(long)]
    db: String,

    /// Tenant name stamped into every document and hashed into its identity
    #[arg(long)]
    tenant: String,

    /// Extra WHERE clause appended to the root query of every plan
    #[arg(long = "where", value_name = "SQL")]
    predicate: Option<String>,

    /// Output path ("-" for stdout); defaults to ./<doc_type>.json per plan
    #[arg(long, short = 'o')]
    out: Option<String>,

    /// Pretty-print documents with tab indentation
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.out.is_some() && args.plans.len() > 1 {
        bail!("--out with several plans would overwrite one file per plan; drop --out or run per plan");
    }

    let mut exec = SqliteExecutor::open(&args.db)
        .with_context(|| format!("failed to open database {}", args.db))?;
    let caster = Caster::new(CastConfig {
        pretty: args.pretty,
        ..CastConfig::default()
    });

    let mut failures = 0;
    for path in &args.plans {
        let text =
            fs::read_to_string(path).with_context(|| format!("failed to read plan {}", path))?;
        let plan = CastPlan::from_json(&text).with_context(|| format!("invalid plan {}", path))?;

        let outcome = caster.run(&mut exec, &plan, &args.tenant, args.predicate.as_deref());
        if let Some(err) = &outcome.error {
            error!(plan = %path, %err, "cast aborted; writing documents stored so far");
            failures += 1;
        }

        // Partial output is written too, so a rerun can be diffed against it
        let target = match &args.out {
            Some(out) => out.clone(),
            None => format!("./{}.json", plan.doc_type),
        };
        let written = if target == "-" {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let written = outcome.store.dump_all(&mut lock)?;
            lock.flush()?;
            written
        } else {
            outcome
                .store
                .dump_to_path(&target)
                .with_context(|| format!("failed to write {}", target))?
        };
        info!(doc_type = %plan.doc_type, documents = written, target = %target, "cast finished");
    }

    if failures > 0 {
        bail!("{} of {} plans aborted", failures, args.plans.len());
    }
    Ok(())
}
