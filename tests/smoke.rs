//! CLI surface smoke tests: every stage subcommand parses, global flags
//! compose, and exit codes keep their documented values.

use clap::Parser as _;

use kenshin::ExitCode;
use kenshin::cli::{Cli, Commands};

#[test]
fn every_stage_has_a_subcommand() {
    for args in [
        vec!["kenshin", "scan"],
        vec!["kenshin", "hash", "--limit", "10"],
        vec!["kenshin", "probe"],
        vec!["kenshin", "judge", "--probe-always"],
        vec!["kenshin", "copy", "--overwrite", "--dry-run"],
        vec!["kenshin", "import", "--mode", "zip_import"],
        vec!["kenshin", "items", "--run-id", "42"],
        vec!["kenshin", "normalize", "--dry-run"],
    ] {
        Cli::try_parse_from(args.iter().copied())
            .unwrap_or_else(|e| panic!("{args:?} failed to parse: {e}"));
    }
}

#[test]
fn limit_zero_means_unbounded_and_parses() {
    let cli = Cli::try_parse_from(["kenshin", "scan", "--limit", "0"]).unwrap();
    match cli.command {
        Commands::Scan { limit } => assert_eq!(limit, Some(0)),
        _ => panic!("wrong subcommand"),
    }
}

#[test]
fn unknown_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["kenshin", "emit"]).is_err());
}

#[test]
fn exit_codes_are_contractual() {
    assert_eq!(ExitCode::Success.as_i32(), 0);
    assert_eq!(ExitCode::Fatal.as_i32(), 1);
    assert_eq!(ExitCode::Partial.as_i32(), 2);
}
