// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::{Arg, ArgAction, ArgMatches, Command};
use datadog_mlpd_report::{
    analyze, leading_decimal, open_profile, parse_c_ulong, parse_objects, parse_reports,
    FindSpec, ReportError, ReportOptions, DEFAULT_REPORTS,
};
use libdd_mlpd_protocol::wire::{LOG_VERSION_MAJOR, LOG_VERSION_MINOR};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the diagnostics filter.
const LOG_ENV: &str = "MPROF_REPORT_LOG";

fn usage() {
    println!("Mono log profiler report version {LOG_VERSION_MAJOR}.{LOG_VERSION_MINOR}");
    println!("Usage: mprof-report [OPTIONS] FILENAME");
    println!("FILENAME can be '-' to read from standard input.");
    println!("Options:");
    println!("\t--help               display this help");
    println!("\t--out=FILE           write to FILE instead of stdout");
    println!("\t--traces             collect and show backtraces");
    println!("\t--maxframes=NUM      limit backtraces to NUM entries");
    println!("\t--reports=R1[,R2...] print the specified reports. Defaults are:");
    println!("\t                     {DEFAULT_REPORTS}");
    println!("\t--method-sort=MODE   sort methods according to MODE: total, self, calls");
    println!("\t--alloc-sort=MODE    sort allocations according to MODE: bytes, count");
    println!("\t--counters-sort=MODE sort counters according to MODE: time, category");
    println!("\t                     only accessible in verbose mode");
    println!("\t--track=OB1[,OB2...] track what happens to objects OBJ1, O2 etc.");
    println!("\t--find=FINDSPEC      find and track objects matching FINFSPEC, where FINDSPEC is:");
    println!("\t                     S:minimum_size or T:partial_name");
    println!("\t--thread=THREADID    consider just the data for thread THREADID");
    println!("\t--time=FROM-TO       consider data FROM seconds from startup up to TO seconds");
    println!("\t--verbose            increase verbosity level");
    println!("\t--debug              display decoding debug info for mprof-report devs");
}

fn command() -> Command {
    let value = |name: &'static str| Arg::new(name).long(name).require_equals(true);
    Command::new("mprof-report")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new("help").long("help").action(ArgAction::SetTrue))
        .arg(value("out"))
        .arg(Arg::new("traces").long("traces").action(ArgAction::SetTrue))
        .arg(value("maxframes"))
        .arg(value("reports"))
        .arg(value("method-sort"))
        .arg(value("alloc-sort"))
        .arg(value("counters-sort"))
        .arg(value("track").action(ArgAction::Append))
        .arg(value("find").action(ArgAction::Append))
        .arg(value("thread"))
        .arg(value("time"))
        .arg(Arg::new("verbose").long("verbose").action(ArgAction::Count))
        .arg(Arg::new("debug").long("debug").action(ArgAction::Count))
        .arg(value("coverage-out").hide(true))
        .arg(Arg::new("filename"))
        .arg(
            Arg::new("ignored")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .hide(true),
        )
}

/// Builds the report options out of the command line. Errors name the offending value.
fn report_options(matches: &ArgMatches) -> Result<ReportOptions, String> {
    let mut options = ReportOptions::default();
    let value = |name: &str| matches.get_one::<String>(name).map(String::as_str);

    if let Some(reports) = value("reports") {
        options.reports = parse_reports(reports)?;
    }
    if let Some(mode) = value("method-sort") {
        options.method_sort = mode.parse()?;
    }
    if let Some(mode) = value("alloc-sort") {
        options.alloc_sort = mode.parse()?;
    }
    if let Some(mode) = value("counters-sort") {
        options.counters_sort = mode.parse()?;
    }
    if let Some(frames) = value("maxframes") {
        options.trace_max = leading_decimal(frames) as usize;
    }
    if let Some(lists) = matches.get_many::<String>("track") {
        for list in lists {
            options.track.extend(parse_objects(list)?);
        }
    }
    if let Some(specs) = matches.get_many::<String>("find") {
        let mut find = FindSpec::default();
        for spec in specs {
            find.add(spec)?;
        }
        options.find = Some(find);
    }
    if let Some(thread) = value("thread") {
        let thread = parse_c_ulong(thread).ok_or_else(|| format!("invalid thread '{thread}'"))?;
        options.thread = (thread != 0).then_some(thread);
    }
    if let Some(range) = value("time") {
        options.time = Some(range.parse()?);
    }
    options.traces = matches.get_flag("traces");
    options.verbose = matches.get_count("verbose");
    options.debug = matches.get_count("debug");
    Ok(options)
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| default.to_owned());
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("mprof-report: a global tracing subscriber is already set");
    }
}

fn run(filename: &str, options: ReportOptions, out: Box<dyn Write>) -> Result<(), ReportError> {
    let input = open_profile(Path::new(filename))?;
    let mut out = analyze(input, options, out)?;
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(_) => {
            usage();
            return ExitCode::from(1);
        }
    };
    if matches.get_flag("help") {
        usage();
        return ExitCode::SUCCESS;
    }
    let options = match report_options(&matches) {
        Ok(options) => options,
        Err(_) => {
            usage();
            return ExitCode::from(1);
        }
    };
    init_logging(options.debug > 0);

    let out: Box<dyn Write> = match matches.get_one::<String>("out") {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => {
                tracing::debug!(%err, %path, "Cannot create the output file");
                println!("Cannot open output file: {path}");
                return ExitCode::from(1);
            }
        },
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let Some(filename) = matches.get_one::<String>("filename") else {
        usage();
        return ExitCode::from(2);
    };

    match run(filename, options, out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ (ReportError::Open { .. } | ReportError::NotAProfile(_))) => {
            tracing::debug!(?err, "Cannot load the profile");
            println!("Not a log profiler data file (or unsupported version).");
            ExitCode::from(1)
        }
        // Already written to the report output.
        Err(err @ (ReportError::BadBufferId(_) | ReportError::UnhandledEvent { .. })) => {
            tracing::error!(%err, "Decoding stopped");
            ExitCode::from(1)
        }
        Err(err) => {
            tracing::error!(%err, "Decoding stopped");
            eprintln!("mprof-report: {err}");
            ExitCode::from(1)
        }
    }
}
