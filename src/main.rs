use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use class_patcher::config::{apply_rewrites, load_from_path, ApplyError, RewriteResult};
use class_patcher::constant_pool::{entries, patch_utf8_constant_with, ConstantPoolEntry, MatchMode, Patched};
use class_patcher::executor::{Executor, ExecutorSettings};
use class_patcher::persist::{digest, write_atomic};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "class-patcher")]
#[command(about = "Rewrite constants in JVM class files and run them with output captured", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the constant pool of a class file
    Inspect {
        file: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Replace the first UTF-8 constant matching a string
    Patch {
        file: PathBuf,

        /// Constant to look for
        #[arg(long)]
        from: String,

        /// Replacement text
        #[arg(long)]
        to: String,

        /// Match case-sensitively
        #[arg(long)]
        exact: bool,

        /// Write here instead of rewriting the input file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show a diff of the UTF-8 constants
        #[arg(short, long)]
        diff: bool,
    },

    /// Apply a rewrite plan to a class file or every class file under a directory
    Apply {
        path: PathBuf,

        /// Rewrite plan (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show a diff of the UTF-8 constants
        #[arg(short, long)]
        diff: bool,
    },

    /// Run a class with console output captured
    Run {
        file: PathBuf,

        /// Static method to invoke (default: main)
        #[arg(short, long)]
        entry: Option<String>,

        /// Take sandbox settings from a rewrite plan
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        max_instructions: Option<u64>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { file, json } => cmd_inspect(&file, json),

        Commands::Patch {
            file,
            from,
            to,
            exact,
            output,
            dry_run,
            diff,
        } => cmd_patch(&file, &from, &to, exact, output, dry_run, diff),

        Commands::Apply {
            path,
            config,
            dry_run,
            diff,
        } => cmd_apply(&path, &config, dry_run, diff),

        Commands::Run {
            file,
            entry,
            config,
            max_instructions,
            timeout_ms,
        } => cmd_run(&file, entry, config, max_instructions, timeout_ms),
    }
}

fn read_class(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn describe_value(entry: &ConstantPoolEntry<'_>) -> String {
    match entry.utf8() {
        Some(Ok(text)) => format!("{text:?}"),
        Some(Err(_)) => "<undecodable>".to_string(),
        None => entry.body().iter().map(|b| format!("{b:02x}")).collect(),
    }
}

/// One line per UTF-8 constant, for diffs.
fn utf8_listing(bytes: &[u8]) -> Result<String> {
    let mut out = String::new();
    for entry in entries(bytes)? {
        if let Some(Ok(text)) = entry.utf8() {
            out.push_str(&format!("#{} {:?}\n", entry.index, text));
        }
    }
    Ok(out)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Closest UTF-8 constant to `target`, if any is reasonably close.
fn suggest(bytes: &[u8], target: &str) -> Option<String> {
    let entries = entries(bytes).ok()?;
    entries
        .iter()
        .filter_map(|e| e.utf8().and_then(|r| r.ok()))
        .map(|text| (strsim::jaro_winkler(target, text), text))
        .filter(|(score, _)| *score > 0.8)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, text)| text.to_string())
}

fn cmd_inspect(file: &Path, json: bool) -> Result<()> {
    let bytes = read_class(file)?;
    let entries = entries(&bytes)?;

    if json {
        let listing: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "index": e.index,
                    "offset": e.offset,
                    "tag": e.tag,
                    "length": e.record_len,
                    "value": describe_value(e),
                })
            })
            .collect();
        let doc = serde_json::json!({
            "file": file.display().to_string(),
            "digest": digest(&bytes),
            "entries": listing,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", format!("{}", file.display()).bold());
    println!("Digest: {}", digest(&bytes));
    println!("Entries: {}", entries.len());
    println!();
    for entry in &entries {
        println!(
            "{:>6}  {:<20} {:>8}  {}",
            format!("#{}", entry.index).cyan(),
            entry.tag.to_string(),
            entry.offset,
            describe_value(entry)
        );
    }
    Ok(())
}

fn cmd_patch(
    file: &Path,
    from: &str,
    to: &str,
    exact: bool,
    output: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let bytes = read_class(file)?;
    let mode = if exact {
        MatchMode::Exact
    } else {
        MatchMode::CaseInsensitive
    };
    let before = if show_diff {
        utf8_listing(&bytes)?
    } else {
        String::new()
    };

    match patch_utf8_constant_with(bytes.clone(), from, to, mode)? {
        Patched::Replaced {
            bytes: patched,
            index,
            offset,
        } => {
            let destination = output.unwrap_or_else(|| file.to_path_buf());
            if dry_run {
                println!(
                    "{} Would replace constant #{} at offset {} in {}",
                    "✓".green(),
                    index,
                    offset,
                    destination.display()
                );
            } else {
                write_atomic(&destination, &patched)
                    .with_context(|| format!("failed to write {}", destination.display()))?;
                println!(
                    "{} Replaced constant #{} at offset {} in {}",
                    "✓".green(),
                    index,
                    offset,
                    destination.display()
                );
            }
            if show_diff {
                display_diff(file, &before, &utf8_listing(&patched)?);
            }
            Ok(())
        }
        Patched::Unchanged(_) => {
            eprintln!(
                "{} No UTF-8 constant matching {:?} in {}",
                "✗".red(),
                from,
                file.display()
            );
            if let Some(candidate) = suggest(&bytes, from) {
                eprintln!("  Did you mean {:?}?", candidate);
            }
            std::process::exit(1);
        }
    }
}

fn discover_class_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("class")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn cmd_apply(path: &Path, config_path: &Path, dry_run: bool, show_diff: bool) -> Result<()> {
    println!("Loading rewrites from {}...", config_path.display());
    let config = load_from_path(config_path)?;
    if config.rewrites.is_empty() {
        println!("{}", "  No rewrites found in file".yellow());
        return Ok(());
    }
    if dry_run {
        println!("{}", "  [DRY RUN - showing what would be applied]".cyan());
    }

    let files = discover_class_files(path)?;
    if files.is_empty() {
        println!("{}", format!("No .class files under {}", path.display()).yellow());
        return Ok(());
    }

    let mut total_applied = 0;
    let mut total_not_found = 0;
    let mut total_failed = 0;

    for file in files {
        println!("\n{}", file.display().to_string().bold());
        let bytes = match read_class(&file) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("{} {:#}", "✗".red(), e);
                total_failed += 1;
                continue;
            }
        };
        let (patched, results) = apply_rewrites(&config, bytes.clone());

        for (rule_id, result) in results {
            match result {
                Ok(RewriteResult::Applied { index, offset }) => {
                    let verb = if dry_run { "Would replace" } else { "Replaced" };
                    println!(
                        "{} {}: {} constant #{} at offset {}",
                        "✓".green(),
                        rule_id,
                        verb,
                        index,
                        offset
                    );
                    total_applied += 1;
                }
                Ok(RewriteResult::NotFound) => {
                    println!("{} {}: Target not found", "⊘".cyan(), rule_id);
                    total_not_found += 1;
                }
                Err(e) => {
                    eprintln!("{} {}: Error - {}", "✗".red(), rule_id, e);
                    if let ApplyError::VerificationFailed { .. } = e {
                        eprintln!("  The class file differs from the one the plan was written for");
                    }
                    total_failed += 1;
                }
            }
        }

        if patched != bytes {
            if show_diff {
                display_diff(&file, &utf8_listing(&bytes)?, &utf8_listing(&patched)?);
            }
            if !dry_run {
                write_atomic(&file, &patched)
                    .with_context(|| format!("failed to write {}", file.display()))?;
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!("  {} not found", format!("{}", total_not_found).cyan());
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_run(
    file: &Path,
    entry: Option<String>,
    config_path: Option<PathBuf>,
    max_instructions: Option<u64>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let (mut settings, configured_entry) = match config_path {
        Some(path) => {
            let config = load_from_path(&path)?;
            (
                config.sandbox.executor_settings(),
                config.sandbox.entry_point().to_string(),
            )
        }
        None => (ExecutorSettings::default(), "main".to_string()),
    };
    if let Some(max) = max_instructions {
        settings.limits.max_instructions = Some(max);
    }
    if let Some(ms) = timeout_ms {
        settings.limits.timeout = Some(Duration::from_millis(ms));
    }
    let entry = entry.unwrap_or(configured_entry);

    let bytes = read_class(file)?;
    let executor = Executor::new(settings);
    let output = executor
        .execute(bytes, &entry)
        .with_context(|| format!("failed to run {}", file.display()))?;
    print!("{output}");
    Ok(())
}
