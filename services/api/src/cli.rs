use crate::demo::{run_budget, run_demo, run_validate, BudgetArgs, DemoArgs, ValidateArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use grantready::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "GrantReady",
    about = "Run and exercise the grant application compliance engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Validate a stored project record and print its readiness report
    Validate(ValidateArgs),
    /// Calculate a budget from a line item CSV export
    Budget(BudgetArgs),
    /// Author, audit and export a sample application end to end
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Validate(args) => run_validate(args),
        Command::Budget(args) => run_budget(args),
        Command::Demo(args) => run_demo(args),
    }
}
