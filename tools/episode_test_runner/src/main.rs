use episode_test_runner::{discover_case_files, run_case_file, CaseOutcome};
use std::env;
use std::path::PathBuf;
use std::process::exit;

fn main() {
    let mut case_path: Option<PathBuf> = None;
    let mut dir_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--case" => {
                if let Some(value) = args.next() {
                    case_path = Some(PathBuf::from(value));
                } else {
                    eprintln!("--case requires a path");
                    usage();
                    exit(2);
                }
            }
            "--dir" => {
                if let Some(value) = args.next() {
                    dir_path = Some(PathBuf::from(value));
                } else {
                    eprintln!("--dir requires a path");
                    usage();
                    exit(2);
                }
            }
            "--help" | "-h" => {
                usage();
                return;
            }
            _ => {
                eprintln!("unknown argument: {arg}");
                usage();
                exit(2);
            }
        }
    }

    let outcomes = match (case_path, dir_path) {
        (Some(path), None) => vec![run_case_file(&path).unwrap_or_else(|err| {
            eprintln!("error: {err}");
            exit(1);
        })],
        (None, Some(dir)) => run_dir(&dir),
        _ => {
            eprintln!("choose exactly one of --case or --dir");
            usage();
            exit(2);
        }
    };

    print_outcomes(&outcomes);
    if outcomes.iter().any(|outcome| !outcome.passed) {
        exit(1);
    }
}

fn run_dir(dir: &PathBuf) -> Vec<CaseOutcome> {
    let files = discover_case_files(dir).unwrap_or_else(|err| {
        eprintln!("error: {err}");
        exit(1);
    });
    if files.is_empty() {
        eprintln!("no case files found in {}", dir.display());
        exit(1);
    }
    files
        .iter()
        .map(|path| {
            run_case_file(path).unwrap_or_else(|err| {
                eprintln!("error: {}: {err}", path.display());
                exit(1);
            })
        })
        .collect()
}

fn print_outcomes(outcomes: &[CaseOutcome]) {
    let mut passed = 0usize;
    for outcome in outcomes {
        if outcome.passed {
            passed += 1;
            println!("ok: {} ({})", outcome.name, outcome.source);
        } else {
            println!("fail: {} ({})", outcome.name, outcome.source);
            for failure in &outcome.failures {
                println!("  - {failure}");
            }
        }
    }
    println!("summary: {passed}/{} passed", outcomes.len());
}

fn usage() {
    println!("episode_test_runner --case <path> | --dir <path>");
}
