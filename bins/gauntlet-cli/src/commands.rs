// CLI commands for managing Gauntlet
use anyhow::{bail, Context, Result};
use gauntlet_common::languages::{LanguageConfig, LanguagesFile};
use gauntlet_common::types::Challenge;
use gauntlet_common::validator::{validate_challenge, ValidationOptions, ValidationReport};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::generator;

/// Load languages configuration; a missing file is an empty registry
async fn load_languages_config(config_path: &Path) -> Result<LanguagesFile> {
    if !config_path.exists() {
        return Ok(LanguagesFile::default());
    }

    let content = fs::read_to_string(config_path)
        .await
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    serde_json::from_str(&content).context("Failed to parse languages.json")
}

/// Save languages configuration
async fn save_languages_config(config_path: &Path, config: &LanguagesFile) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json_content =
        serde_json::to_string_pretty(config).context("Failed to serialize languages.json")?;

    fs::write(config_path, json_content + "\n")
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    Ok(())
}

/// Validate a challenge document and print the report.
/// Returns whether the challenge is valid.
pub async fn validate_file(path: &Path, min_test_cases: Option<usize>, json: bool) -> Result<bool> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let challenge: Challenge = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid challenge document", path.display()))?;

    let mut options = ValidationOptions::default();
    if let Some(min) = min_test_cases {
        options.require_minimum_test_cases = min;
    }

    let report = validate_challenge(&challenge, &options);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&challenge.challenge_id, &report);
    }
    Ok(report.is_valid)
}

fn print_report(challenge_id: &str, report: &ValidationReport) {
    if report.is_valid {
        println!("✅ Challenge '{}' is valid", challenge_id);
    } else {
        println!("❌ Challenge '{}' is invalid", challenge_id);
    }

    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!("  - {}", error);
        }
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for (warning, suggestion) in report.warnings.iter().zip(&report.suggestions) {
            println!("  - {}", warning);
            println!("    💡 {}", suggestion);
        }
    }
}

pub struct NewLanguage<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub base_image: Option<&'a str>,
    pub source_file: &'a str,
    pub compile_command: Option<&'a str>,
    pub run_command: &'a str,
    pub cpu: f32,
}

/// Register a language and render its Dockerfile under `dockerfiles_dir`
pub async fn add_language(
    config_path: &Path,
    dockerfiles_dir: &Path,
    new: NewLanguage<'_>,
) -> Result<PathBuf> {
    println!("🚀 Adding language: {}", new.name);

    let name = new.name.trim().to_lowercase();
    if name.is_empty() || new.source_file.trim().is_empty() || new.run_command.trim().is_empty() {
        bail!("Language name, source file and run command cannot be empty");
    }
    if !new.cpu.is_finite() || new.cpu <= 0.0 {
        bail!("CPU limit must be positive, got {}", new.cpu);
    }

    // Load existing config
    let mut languages_json = load_languages_config(config_path).await?;

    // Check if language already exists
    if languages_json
        .languages
        .iter()
        .any(|l| l.name.eq_ignore_ascii_case(&name))
    {
        bail!("Language '{}' already exists in config", name);
    }

    let default_base = format!("{}:{}", name, new.version);
    let base_image = new.base_image.unwrap_or(&default_base);

    let lang = LanguageConfig {
        name: name.clone(),
        version: new.version.to_string(),
        image: format!("gauntlet-{}:{}", name, new.version),
        source_file: new.source_file.to_string(),
        compile_command: new
            .compile_command
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        run_command: new.run_command.to_string(),
        cpu_limit: new.cpu,
    };

    // Generate Dockerfile
    let dockerfile_dir = dockerfiles_dir.join(&name);
    let dockerfile_path = dockerfile_dir.join("Dockerfile");
    println!("🐳 Generating Dockerfile...");
    fs::create_dir_all(&dockerfile_dir).await?;
    fs::write(&dockerfile_path, generator::render_dockerfile(&lang, base_image))
        .await
        .context("Failed to write Dockerfile")?;

    let image = lang.image.clone();
    languages_json.languages.push(lang);

    println!("📝 Updating {}...", config_path.display());
    save_languages_config(config_path, &languages_json).await?;

    println!("✅ Language '{}' added successfully!", name);
    println!("\n📋 Next steps:");
    println!(
        "  1. Build the image: docker build -t {} -f {} .",
        image,
        dockerfile_path.display()
    );
    println!("  2. Restart workers so they pick up the new language");

    Ok(dockerfile_path)
}

/// List all configured languages
pub async fn list_languages(config_path: &Path) -> Result<()> {
    let languages_json = load_languages_config(config_path).await?;

    if languages_json.languages.is_empty() {
        println!("No languages configured.");
        println!("\n💡 Add a language with: gauntlet-cli add-lang --name <name> --source-file <file> --run <command>");
        return Ok(());
    }

    println!("📋 Configured Languages:\n");
    println!(
        "{:<12} {:<10} {:<28} {:<14} {:<5} {}",
        "Name", "Version", "Image", "Source", "CPU", "Compile"
    );
    println!("{}", "─".repeat(90));

    for lang in &languages_json.languages {
        println!(
            "{:<12} {:<10} {:<28} {:<14} {:<5.1} {}",
            lang.name,
            lang.version,
            lang.image,
            lang.source_file,
            lang.cpu_limit,
            lang.compile_command.as_deref().unwrap_or("-")
        );
    }

    println!("\n✅ Total: {} language(s)", languages_json.languages.len());

    Ok(())
}
