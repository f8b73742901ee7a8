pub mod fetch;

use crate::cli::Commands;
use crate::errors::CliError;

/// Run the selected subcommand
pub async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Fetch(args) => fetch::execute(args).await,
    }
}
