#![forbid(unsafe_code)]

use std::path::PathBuf;

use tf_conformance::{CaseStatus, HarnessConfig, run_suite};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = HarnessConfig::default_paths();
    let mut emit_json = false;
    let mut require_green = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a directory")?;
                config.fixture_root = PathBuf::from(value);
            }
            "--case" => {
                let value = args
                    .next()
                    .ok_or("--case requires a case id prefix (e.g. pivot_table)")?;
                config.case_filter = Some(value);
            }
            "--json" => {
                emit_json = true;
            }
            "--require-green" => {
                require_green = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let report = run_suite(&config)?;
    if emit_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for case in &report.cases {
            let status = match case.status {
                CaseStatus::Pass => "pass",
                CaseStatus::Fail => "FAIL",
            };
            println!(
                "{status} case={} op={:?} mode={:?} evidence={} elapsed_us={}",
                case.case_id, case.operation, case.mode, case.evidence_records, case.elapsed_us
            );
            if let Some(mismatch) = &case.mismatch {
                println!("    {mismatch}");
            }
        }
        println!(
            "suite={} fixtures={} passed={} failed={} green={}",
            report.suite,
            report.fixture_count,
            report.passed,
            report.failed,
            report.is_green()
        );
    }

    if require_green && !report.is_green() {
        return Err(format!("{} fixture(s) failed", report.failed).into());
    }
    Ok(())
}

fn print_help() {
    println!(
        "tf-conformance-cli\n\
         \n\
         Usage:\n\
           tf-conformance-cli [--fixture-root DIR] [--case PREFIX] [--json] [--require-green]\n\
         \n\
         Options:\n\
           --fixture-root DIR  Load *.json fixtures from DIR (default: bundled fixtures)\n\
           --case PREFIX       Run only cases whose id starts with PREFIX\n\
           --json              Print the suite report as JSON\n\
           --require-green     Exit non-zero if any fixture fails\n\
           -h, --help          Show this help"
    );
}
