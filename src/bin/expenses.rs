use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use expenses_rs::{
    ClientConfig, DEFAULT_BASE_URL, Expense, ExpenseCache, ExpenseId, HttpExpenseApi,
    MutationEngine, SelectedFile, UploadSession,
};

/// Track expenses and attach receipts to them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The base URL of the expense API.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    api_url: String,

    /// How many seconds to wait for each request.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all expenses.
    List,

    /// Add an expense.
    Add {
        /// What the money was spent on.
        #[arg(long)]
        title: String,

        /// How much was spent, e.g. 12.50.
        #[arg(long)]
        amount: String,
    },

    /// Delete an expense.
    Delete {
        /// The ID of the expense to delete.
        id: ExpenseId,
    },

    /// Upload a receipt and attach it to an expense.
    Upload {
        /// The ID of the expense to attach the receipt to.
        id: ExpenseId,

        /// The receipt file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let args = Args::parse();

    let config = ClientConfig::new(&args.api_url)
        .request_timeout(Duration::from_secs(args.timeout_secs));

    let api = match HttpExpenseApi::new(&config) {
        Ok(api) => api,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };

    let engine = MutationEngine::new(api, ExpenseCache::new(), config.stale_time);

    match run(&engine, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    engine: &MutationEngine<HttpExpenseApi>,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::List => {
            let expenses = engine.load().await?;

            if expenses.is_empty() {
                println!("No expenses yet.");
            }

            for expense in &expenses {
                print_expense(expense);
            }
        }
        Command::Add { title, amount } => {
            engine.load().await?;
            let expense = engine.create(&title, &amount).await?;
            print_expense(&expense);
        }
        Command::Delete { id } => {
            engine.load().await?;
            engine.delete(id).await?;
            println!("Deleted expense {id}");
        }
        Command::Upload { id, file } => {
            let selected = read_file(&file)
                .await
                .map_err(|error| format!("Could not read {}: {error}", file.display()))?;
            let mut session = UploadSession::new(id);
            session.select_file(selected)?;

            let key = engine.attach_receipt(&mut session).await?;
            println!("Attached {key} to expense {id}");
        }
    }

    Ok(())
}

fn print_expense(expense: &Expense) {
    println!(
        "{:>6}  {:<32}  {:>10.2}  {}",
        expense.id,
        expense.title,
        expense.amount,
        expense.file_reference.as_deref().unwrap_or("-")
    );
}

async fn read_file(path: &Path) -> std::io::Result<SelectedFile> {
    let bytes = tokio::fs::read(path).await?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "receipt".to_owned());

    Ok(SelectedFile::new(&name, guess_media_type(&name), bytes))
}

fn guess_media_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr),
        )
        .init();
}
