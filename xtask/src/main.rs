use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace, including the pcd400 shared library
    Build,
    /// Run the test suite
    Test,
    /// Run the CLI, forwarding any extra arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    println!("{what}...");
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => cargo(&["build", "--workspace"], "Building workspace")?,
        Commands::Test => cargo(&["test", "--workspace"], "Running tests")?,
        Commands::Run { args } => {
            let mut full = vec!["run", "-p", "pcd-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Running CLI")?;
        }
    }

    Ok(())
}
