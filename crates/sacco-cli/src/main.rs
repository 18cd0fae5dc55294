use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tracing::info;
use uuid::Uuid;

use sacco_engine::LoanEngine;
use sacco_engine::application::LoanApplication;
use sacco_types::EngineConfig;
use sacco_types::models::*;

#[derive(Parser)]
#[command(name = "sacco", about = "Loan lifecycle and credit-risk engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a demo data set: members, a loan product and one application.
    Seed,
    /// Run the default-detection batch as of a date (defaults to today).
    CheckDefaults {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print a loan, its schedule and its approval log.
    ShowLoan { loan_id: String },
}

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sacco=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let db_path = std::env::var("SACCO_DB_PATH").unwrap_or_else(|_| "sacco.db".into());
    let db = Arc::new(sacco_db::Database::open(&PathBuf::from(&db_path))?);
    let engine = LoanEngine::new(db, EngineConfig::from_env());

    match cli.command {
        Command::Seed => seed(&engine)?,
        Command::CheckDefaults { date } => {
            let today = date.unwrap_or_else(|| Utc::now().date_naive());
            let report = engine.run_default_check(today)?;
            println!(
                "checked {} loan(s): {} defaulted, {} cured, {} guarantee(s) called, {} error(s)",
                report.loans_checked,
                report.newly_defaulted,
                report.cured,
                report.guarantees_called,
                report.errors
            );
        }
        Command::ShowLoan { loan_id } => show_loan(&engine, &loan_id)?,
    }

    Ok(())
}

fn seed(engine: &LoanEngine) -> anyhow::Result<()> {
    let manager = engine.register_member("Seed Manager", MemberRole::Manager)?;
    let director = engine.register_member("Seed Director", MemberRole::Director)?;
    let borrower = engine.register_member("Seed Borrower", MemberRole::Member)?;
    engine.purchase_shares(borrower.id, 1000)?;

    let loan_type = engine.create_loan_type(LoanType {
        id: Uuid::new_v4(),
        name: "Development loan".into(),
        interest_rate: dec!(10),
        min_amount: dec!(1000),
        max_amount: dec!(500000),
        max_term_months: 36,
        is_for_non_member: false,
        institution_share: dec!(10),
        guarantor_share: dec!(0),
        member_share: dec!(0),
    })?;

    let loan = engine.submit_application(LoanApplication {
        borrower: Borrower::Member(borrower.id),
        loan_type_id: loan_type.id,
        amount: dec!(100000),
        term_months: 12,
        guarantors: vec![],
    })?;

    info!(
        manager = %manager.id,
        director = %director.id,
        borrower = %borrower.id,
        "seeded demo data"
    );
    println!("seeded loan {} (pending manager review)", loan.loan_id);
    Ok(())
}

fn show_loan(engine: &LoanEngine, loan_id: &str) -> anyhow::Result<()> {
    let Some(loan) = engine.db().loan_by_loan_id(loan_id)? else {
        anyhow::bail!("loan '{}' not found", loan_id);
    };

    println!("loan {}", loan.loan_id);
    println!("  status:      {} ({})", loan.status, loan.approval_stage);
    println!("  applied:     {}", loan.amount_applied);
    if let Some(approved) = loan.amount_approved {
        println!("  approved:    {}", approved);
    }
    if let Some(outstanding) = loan.outstanding_principal {
        println!("  outstanding: {}", outstanding);
    }
    if let Some(next) = loan.next_repayment_date {
        println!("  next due:    {}", next);
    }

    let schedule = engine.db().repayments_for_loan(loan.id)?;
    if !schedule.is_empty() {
        println!("  schedule:");
        for row in &schedule {
            println!(
                "    #{:<3} {}  {:>12}  ({} principal, {} interest)  {}",
                row.seq, row.due_date, row.amount, row.principal, row.interest, row.status
            );
        }
    }

    let log = engine.db().approval_logs_for_loan(loan.id)?;
    if !log.is_empty() {
        println!("  history:");
        for entry in &log {
            println!(
                "    {}  {}  {}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                entry.action,
                entry.comments
            );
        }
    }

    Ok(())
}
