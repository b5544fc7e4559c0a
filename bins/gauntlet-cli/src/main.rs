mod commands;
mod generator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gauntlet_common::languages::DEFAULT_LANGUAGES_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gauntlet-cli")]
#[command(about = "Gauntlet CLI - Validate challenges and manage sandbox languages", long_about = None)]
struct Cli {
    /// Path to languages.json
    #[arg(long, global = true, default_value = DEFAULT_LANGUAGES_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a challenge document before publishing it
    Validate {
        /// Challenge JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Minimum number of test cases required
        #[arg(long)]
        min_test_cases: Option<usize>,

        /// Print the report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Register a language and generate its sandbox Dockerfile
    AddLang {
        /// Language name (e.g., java, cpp, go)
        #[arg(short, long)]
        name: String,

        /// Language version (e.g., 17, 20, 1.21)
        #[arg(short, long, default_value = "latest")]
        version: String,

        /// Base Docker image (defaults to {name}:{version})
        #[arg(short, long)]
        base_image: Option<String>,

        /// File the submission is written to (e.g., Main.java)
        #[arg(short, long)]
        source_file: String,

        /// Compile command, for compiled languages
        #[arg(short, long)]
        compile: Option<String>,

        /// Run command (e.g., "java Main")
        #[arg(short, long)]
        run: String,

        /// CPU limit
        #[arg(long, default_value = "0.5")]
        cpu: f32,

        /// Directory the Dockerfile is generated into
        #[arg(long, default_value = "dockerfiles")]
        dockerfiles: PathBuf,
    },

    /// List configured languages
    ListLangs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            file,
            min_test_cases,
            json,
        } => {
            let valid = commands::validate_file(&file, min_test_cases, json).await?;
            if !valid {
                std::process::exit(1);
            }
        }
        Commands::AddLang {
            name,
            version,
            base_image,
            source_file,
            compile,
            run,
            cpu,
            dockerfiles,
        } => {
            commands::add_language(
                &cli.config,
                &dockerfiles,
                commands::NewLanguage {
                    name: &name,
                    version: &version,
                    base_image: base_image.as_deref(),
                    source_file: &source_file,
                    compile_command: compile.as_deref(),
                    run_command: &run,
                    cpu,
                },
            )
            .await?;
        }
        Commands::ListLangs => {
            commands::list_languages(&cli.config).await?;
        }
    }

    Ok(())
}
