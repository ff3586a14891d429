#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use ck_aggregate::{aggregate, write_artifacts};
use ck_cli::{
    ResultsConfig, Verbosity, find_broken_runs, init_logging, remove_candidates,
    render_bucket_table,
};
use ck_consolidate::{ConsolidateOptions, TagJoinStrategy, consolidate, write_csv};
use ck_index::FixtureIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Aggregate,
    Consolidate,
    Clean,
}

struct CliArgs {
    command: Command,
    config: ResultsConfig,
    tag_join: TagJoinStrategy,
    yolo: bool,
    verbosity: Verbosity,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ck-results-cli error: {error}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;
    init_logging(args.verbosity);

    match args.command {
        Command::Aggregate => run_aggregate(&args),
        Command::Consolidate => run_consolidate(&args),
        Command::Clean => run_clean(&args),
    }
}

fn run_aggregate(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let index = FixtureIndex::load(&args.config.index_file);
    let aggregation = aggregate(&args.config.in_dir, &index)?;
    let rows = write_artifacts(&aggregation, &args.config.out_dir);

    if !args.verbosity.quiet && !rows.is_empty() {
        println!("\n{}", render_bucket_table(&rows));
    }
    Ok(())
}

fn run_consolidate(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let index_file = args.config.cats_dir.join("index.csv");
    let index = FixtureIndex::load(&index_file);

    let options = ConsolidateOptions {
        tag_join: args.tag_join,
    };
    let table = consolidate(&args.config.out_dir, &index, options)?;
    write_csv(&table, &args.config.out_file)?;

    if !args.verbosity.quiet {
        println!(
            "Consolidated {} results into {}",
            table.rows.len(),
            args.config.out_file.display()
        );
        let tags: Vec<&str> = table.tags.iter().map(String::as_str).collect();
        println!("Total sets found: {} ({})", tags.len(), tags.join(", "));
    }
    Ok(())
}

fn run_clean(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let report = find_broken_runs(&args.config.in_dir, &args.config.out_dir)?;
    if report.candidates.is_empty() {
        if !args.verbosity.quiet {
            println!("No broken runs found.");
        }
        return Ok(());
    }

    if args.yolo {
        remove_candidates(&report);
        if !args.verbosity.quiet {
            println!("Removed {} directories.", report.candidates.len());
        }
    } else {
        println!("# run these commands to remove the broken runs");
        for path in &report.candidates {
            println!("rm -rf '{}'", path.display());
        }
    }
    Ok(())
}

fn parse_args() -> Result<CliArgs, Box<dyn std::error::Error>> {
    let mut config = ResultsConfig::default_paths();
    let mut command = None;
    let mut tag_join = TagJoinStrategy::IndicatorColumns;
    let mut yolo = false;
    let mut verbosity = Verbosity::default();

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "aggregate" if command.is_none() => command = Some(Command::Aggregate),
            "consolidate" if command.is_none() => command = Some(Command::Consolidate),
            "clean" if command.is_none() => command = Some(Command::Clean),
            "-i" | "--in-dir" => {
                let value = args.next().ok_or("--in-dir requires a path")?;
                config.in_dir = PathBuf::from(value);
            }
            "-o" | "--out" => {
                // Aggregate/clean write a directory, consolidate a file.
                let value = args.next().ok_or("--out requires a path")?;
                match command {
                    Some(Command::Consolidate) => config.out_file = PathBuf::from(value),
                    _ => config.out_dir = PathBuf::from(value),
                }
            }
            "-r" | "--results-dir" => {
                let value = args.next().ok_or("--results-dir requires a path")?;
                config.out_dir = PathBuf::from(value);
            }
            "-c" | "--cats-dir" => {
                let value = args.next().ok_or("--cats-dir requires a path")?;
                config.cats_dir = PathBuf::from(value);
            }
            "--index-file" => {
                let value = args.next().ok_or("--index-file requires a path")?;
                config.index_file = PathBuf::from(value);
            }
            "--tag-columns" => {
                let value = args.next().ok_or("--tag-columns requires indicator|joined")?;
                tag_join = match value.as_str() {
                    "indicator" => TagJoinStrategy::IndicatorColumns,
                    "joined" => TagJoinStrategy::JoinedOnly,
                    _ => return Err(format!("unsupported tag-columns mode: {value}").into()),
                };
            }
            "--yolo" => yolo = true,
            "-q" | "--quiet" => verbosity.quiet = true,
            "-v" | "--verbose" => verbosity.verbose += 1,
            "-vv" => verbosity.verbose += 2,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }

    let command = command.ok_or("expected a command: aggregate, consolidate, or clean")?;
    Ok(CliArgs {
        command,
        config,
        tag_join,
        yolo,
        verbosity,
    })
}

fn print_help() {
    println!(
        "ck-results-cli\n\
         Usage:\n\
         \tck-results-cli aggregate [-i ..] [-o results] [--index-file cat/index.csv]\n\
         \tck-results-cli consolidate [-r results] [-c cat] [-o results.csv] [--tag-columns indicator|joined]\n\
         \tck-results-cli clean [-i ..] [-r results] [--yolo]\n\
         Commands:\n\
         \taggregate            Harvest raw .aider.results.json files from run directories\n\
         \tconsolidate          Flatten aggregated results into a single CSV\n\
         \tclean                List (or remove) runs whose results were 100% rejected\n\
         Options:\n\
         \t-i, --in-dir <dir>   Directory to scan for raw results (default: ..)\n\
         \t-o, --out <path>     Output directory (aggregate) or file (consolidate)\n\
         \t-r, --results-dir <dir>  Aggregated results directory (default: results)\n\
         \t-c, --cats-dir <dir> Fixture corpus directory holding index.csv (default: cat)\n\
         \t--index-file <path>  Index used for legacy lookup (default: cat/index.csv)\n\
         \t--tag-columns <m>    indicator (default) or joined\n\
         \t--yolo               Actually delete what clean finds\n\
         \t-q, --quiet          Errors only\n\
         \t-v, -vv              More logging\n\
         \t-h, --help           Show this help"
    );
}
