use std::path::PathBuf;

use clap::Parser;

use log::info;

use sched_prof::backend::common::ColorAssignment;
use sched_prof::backend::{analyze, dump, trace_viewer, visualize};
use sched_prof::serialize::deserialize;
use sched_prof::state::{keep_all, NormalizeConfig, RebaseMode, State};
use sched_prof::{Error, Result};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(default_value = "schedule.dat", help = "input schedule log filename")]
    filename: PathBuf,

    #[arg(
        short,
        long,
        help = "output pathname [default: sched_prof, or trace.json with --trace]"
    )]
    output: Option<PathBuf>,

    #[arg(short, long, help = "overwrite output if it exists")]
    force: bool,

    #[arg(short, long, help = "print statistics (writes a TSV table when --output is set)")]
    statistics: bool,

    #[arg(short, long, help = "emit JSON for Google Trace Viewer")]
    trace: bool,

    #[arg(long, help = "print parsed records as JSON lines")]
    dump: bool,

    #[arg(
        long = "time-scale",
        default_value_t = 1e-6,
        help = "factor applied to all times (default turns cycles into Mcycles)"
    )]
    time_scale: f64,

    #[arg(
        long = "per-proc",
        help = "rebase every processor's time independently"
    )]
    per_proc: bool,

    #[arg(
        long = "stack-procs",
        help = "give every processor its own lanes in the timeline"
    )]
    stack_procs: bool,

    #[arg(long, help = "only keep tasks whose name starts with this prefix")]
    name: Option<String>,

    #[arg(short, long, help = "print verbose profiling information")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if [cli.statistics, cli.trace, cli.dump]
        .iter()
        .filter(|x| **x)
        .count()
        > 1
    {
        return Err(Error::Config(
            "Sched Prof takes at most one of --statistics, --trace, or --dump".to_owned(),
        ));
    }

    println!("Reading log file {:?}...", cli.filename);
    let trace = deserialize(&cli.filename)?;
    println!("Matched {} records", trace.records.len());
    if !trace.errors.is_empty() {
        println!("Skipped {} unparsable lines", trace.errors.len());
    }

    if cli.dump {
        return dump::dump_records(&trace.records);
    }

    let mut state = State::new(trace.records);
    match &cli.name {
        Some(prefix) => state.filter_records(|r| r.name.starts_with(prefix.as_str())),
        None => state.filter_records(keep_all),
    }

    let config = NormalizeConfig {
        rebase: if cli.per_proc {
            RebaseMode::PerProc
        } else {
            RebaseMode::Global
        },
        time_scale: cli.time_scale,
    };
    state.normalize(&config)?;
    info!(
        "Normalized {} records on {} processors",
        state.records.len(),
        state.num_procs()
    );

    if cli.statistics {
        let stats = analyze::print_statistics(&state)?;
        if let Some(output) = &cli.output {
            analyze::emit_task_table(&stats, output, cli.force)?;
        }
    } else if cli.trace {
        let output = cli.output.unwrap_or_else(|| PathBuf::from("trace.json"));
        trace_viewer::emit_trace(&state, output, cli.force)?;
    } else {
        let stats = analyze::Statistics::compute(&state)?;
        println!("{}", analyze::summary_line(&stats));

        let config = visualize::TimelineConfig {
            stack_procs: cli.stack_procs,
            ..Default::default()
        };
        let timeline = visualize::build_timeline(&state, &config, &mut ColorAssignment::new())?;
        let output = cli.output.unwrap_or_else(|| PathBuf::from("sched_prof"));
        visualize::emit_timeline(&timeline, output, cli.force)?;
    }

    Ok(())
}
