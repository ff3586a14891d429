#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use ck_cli::{CorpusConfig, Verbosity, init_logging, summarize_index};
use ck_index::{rehash_corpus, scan_metadata, write_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reindex,
    Rehash,
    Summary,
}

struct CliArgs {
    command: Command,
    config: CorpusConfig,
    out_file: PathBuf,
    verbosity: Verbosity,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ck-corpus-cli error: {error}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;
    init_logging(args.verbosity);

    match args.command {
        Command::Reindex => run_reindex(&args),
        Command::Rehash => run_rehash(&args),
        Command::Summary => run_summary(&args),
    }
}

fn run_reindex(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let records = scan_metadata(&args.config.corpus_dir)?;
    if records.is_empty() {
        eprintln!("No metadata records found under {}", args.config.corpus_dir.display());
        return Ok(());
    }
    let written = write_index(&records, &args.out_file)?;
    if !args.verbosity.quiet {
        println!("Wrote {written} records to {}", args.out_file.display());
    }
    Ok(())
}

fn run_rehash(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let report = rehash_corpus(&args.config.corpus_dir)?;
    if !args.verbosity.quiet {
        println!(
            "Checked {} fixtures. Updated {} hashes.",
            report.checked, report.updated
        );
    }
    Ok(())
}

fn run_summary(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let summary = summarize_index(&args.config.index_file)?;

    if args.verbosity.verbose >= 1 {
        for (language, fixtures) in &summary.by_language {
            println!("\nLanguage: {language} ({} fixtures)", fixtures.len());
            for fixture in fixtures {
                println!("  - {:<30} {}", fixture.name, fixture.path);
            }
        }
        println!();
    }

    println!("{:<20} {:>10}", "Language", "Count");
    println!("{}", "-".repeat(31));
    for (language, fixtures) in &summary.by_language {
        println!("{language:<20} {:>10}", fixtures.len());
    }
    println!("{}", "-".repeat(31));
    println!("{:<20} {:>10}", "Total", summary.total);
    Ok(())
}

fn parse_args() -> Result<CliArgs, Box<dyn std::error::Error>> {
    let mut config = CorpusConfig::default_paths();
    let mut command = None;
    let mut out_file = PathBuf::from("cat/index.csv");
    let mut verbosity = Verbosity::default();

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "reindex" if command.is_none() => command = Some(Command::Reindex),
            "rehash" if command.is_none() => command = Some(Command::Rehash),
            "summary" if command.is_none() => command = Some(Command::Summary),
            "-i" | "--in" => {
                let value = args.next().ok_or("--in requires a path")?;
                match command {
                    Some(Command::Summary) => config.index_file = PathBuf::from(value),
                    _ => config.corpus_dir = PathBuf::from(value),
                }
            }
            "-o" | "--out-file" => {
                let value = args.next().ok_or("--out-file requires a path")?;
                out_file = PathBuf::from(value);
            }
            "--corpus" => {
                let value = args.next().ok_or("--corpus requires a path")?;
                config.corpus_dir = PathBuf::from(value);
            }
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

    let command = command.ok_or("expected a command: reindex, rehash, or summary")?;
    Ok(CliArgs {
        command,
        config,
        out_file,
        verbosity,
    })
}

fn print_help() {
    println!(
        "ck-corpus-cli\n\
         Usage:\n\
         \tck-corpus-cli reindex [-i cat] [-o cat/index.csv]\n\
         \tck-corpus-cli rehash [--corpus cat]\n\
         \tck-corpus-cli summary [-i cat/index.csv] [-v]\n\
         Commands:\n\
         \treindex              Collate cat.yaml files into the CSV index\n\
         \trehash               Recalculate fixture hashes, rewriting drifted cat.yaml entries\n\
         \tsummary              Per-language fixture counts from the index\n\
         Options:\n\
         \t-i, --in <path>      Corpus directory (reindex/rehash) or index file (summary)\n\
         \t-o, --out-file <path>  Index CSV to write (default: cat/index.csv)\n\
         \t--corpus <dir>       Corpus root for rehash (default: cat)\n\
         \t-q, --quiet          Errors only\n\
         \t-v, -vv              More logging\n\
         \t-h, --help           Show this help"
    );
}
