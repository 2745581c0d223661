use std::path::PathBuf;

use clap::{Parser, Subcommand};
use folio_core::{Config, DocumentType};

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Chunked document extraction for loan paperwork")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Extract a local file end to end and print the fields as JSON
    Run {
        /// PDF or image to extract
        path: PathBuf,
        /// Document type, e.g. bank_statement, credit_report, pan_card
        #[arg(long)]
        document_type: String,
        /// Job id (defaults to the file name)
        #[arg(long)]
        document_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config first so RUST_LOG from .env applies
    let config = Config::load_or_default();
    folio_lib::init_logging(&[]);
    if let Some(path) = &config.env_file {
        tracing::debug!("Loaded environment from {:?}", path);
    }

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => folio_lib::serve(config).await,
        Command::Run {
            path,
            document_type,
            document_id,
        } => {
            let fields = folio_lib::cli::run_local(
                &config,
                &path,
                DocumentType::from(document_type),
                document_id,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&fields)?);
            Ok(())
        }
    }
}
