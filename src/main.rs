use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::Parser;
use colored::Colorize;

use apurador::cli::{Cli, Commands, StatusCommands};
use apurador::positions::{store, CompetencyMonth, TradeBucket};
use apurador::tax::{self, PaymentStatus, TaxRules};
use apurador::utils::format_currency;
use apurador::{db, reports};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Compute { positions, force } => {
            handle_compute(&positions, force, cli.json, cli.no_color)
        }
        Commands::Darf {
            positions,
            month,
            force,
        } => handle_darf(&positions, month.as_deref(), force, cli.json),
        Commands::Explain {
            positions,
            ticker,
            closed_at,
        } => handle_explain(&positions, &ticker, &closed_at, cli.json),
        Commands::Status { action } => match action {
            StatusCommands::Set {
                month,
                bucket,
                status,
            } => handle_status_set(&month, &bucket, &status),
            StatusCommands::List => handle_status_list(),
        },
        Commands::Init => {
            db::init_database(None)?;
            println!("{} Database initialized", "✓".green().bold());
            Ok(())
        }
    }
}

fn load_rules() -> Result<TaxRules> {
    TaxRules::load_or_default(db::get_default_config_path()?)
}

fn handle_compute(positions_path: &str, force: bool, json: bool, no_color: bool) -> Result<()> {
    let rules = load_rules()?;
    let conn = db::open_db(None)?;
    let positions = store::load_positions(positions_path)?;
    let results = tax::compute_monthly_results(&conn, &positions, &rules, force)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("{}", reports::monthly_results_table(&results, !no_color));
    }
    Ok(())
}

fn handle_darf(
    positions_path: &str,
    month: Option<&str>,
    force: bool,
    json: bool,
) -> Result<()> {
    let rules = load_rules()?;
    let conn = db::open_db(None)?;
    let positions = store::load_positions(positions_path)?;
    let results = tax::compute_monthly_results(&conn, &positions, &rules, force)?;

    let mut obligations = tax::resolve_all(&results, &rules);
    if let Some(month) = month {
        let month: CompetencyMonth = month.parse()?;
        obligations.retain(|o| o.month == month);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&obligations)?);
        return Ok(());
    }

    println!("{}", reports::darf_table(&obligations));
    for obligation in &obligations {
        if obligation.withholding_incomplete {
            println!(
                "{} {}/{} has positions without withholding data; IRRF treated as zero",
                "!".yellow().bold(),
                obligation.month,
                obligation.bucket
            );
        }
    }
    Ok(())
}

fn handle_explain(positions_path: &str, ticker: &str, closed_at: &str, json: bool) -> Result<()> {
    let positions = store::load_positions(positions_path)?;
    let date = NaiveDate::parse_from_str(closed_at, "%Y-%m-%d")?;

    let Some(target) = positions
        .iter()
        .position(|p| p.ticker == ticker && p.closed_at.date() == date)
    else {
        bail!("no closed position found for {ticker} on {date}");
    };

    let breakdown = tax::explain(&positions, target);
    if json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
        return Ok(());
    }

    println!(
        "{} closed {} ({}): result {}",
        breakdown.ticker,
        breakdown.closed_at.date(),
        positions[target].bucket(),
        format_currency(breakdown.result)
    );
    println!(
        "  available loss {}  consumed {}  taxable {}",
        format_currency(breakdown.compensation.available_loss),
        format_currency(breakdown.compensation.consumed),
        format_currency(breakdown.compensation.taxable_profit),
    );
    if breakdown.prior_losses.is_empty() {
        println!("  no prior losses available");
    } else {
        println!("  funded by (oldest exhausted first):");
        for entry in &breakdown.prior_losses {
            println!(
                "    {} {}  loss {}  used earlier {}  remaining {}  drawn here {}",
                entry.closed_at.date(),
                entry.ticker,
                format_currency(entry.original_loss),
                format_currency(entry.consumed_by_earlier),
                format_currency(entry.remaining),
                format_currency(entry.drawn),
            );
        }
    }
    Ok(())
}

fn handle_status_set(month: &str, bucket: &str, status: &str) -> Result<()> {
    let month: CompetencyMonth = month.parse()?;
    let bucket: TradeBucket = bucket.parse()?;
    let status: PaymentStatus = status.parse()?;

    let conn = db::open_db(None)?;
    tax::set_payment_status(&conn, month, bucket, status)?;
    println!("{} {month}/{bucket} marked {status}", "✓".green().bold());
    Ok(())
}

fn handle_status_list() -> Result<()> {
    let conn = db::open_db(None)?;
    let statuses = db::list_payment_statuses(&conn)?;
    if statuses.is_empty() {
        println!("No payment statuses recorded");
        return Ok(());
    }
    for (month, bucket, status) in statuses {
        println!("{month}  {bucket:<9}  {status}");
    }
    Ok(())
}
