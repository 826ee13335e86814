use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::state::State;

#[derive(Serialize, Copy, Clone)]
struct Event<'a> {
    name: &'a str,
    #[serde(rename = "cat")]
    category: &'a str,
    #[serde(rename = "ph")]
    phase: &'a str,
    #[serde(rename = "ts")]
    timestamp: f64,
    #[serde(rename = "dur")]
    duration: f64,
    pid: u64,
    tid: u64,
}

/// Writes the records as complete events for the Chrome trace viewer.
///
/// Times are written in the state's current unit, which the viewer reads
/// as microseconds.
pub fn write_trace<W: Write>(state: &State, mut out: W) -> Result<()> {
    write!(out, "[")?;

    let mut first = true;
    for record in &state.records {
        if !first {
            write!(out, ",")?;
        }
        first = false;
        serde_json::to_writer(
            &mut out,
            &Event {
                name: &record.name,
                category: "task",
                phase: "X",
                timestamp: record.start.0,
                duration: record.length.0,
                pid: record.proc_id.0,
                tid: record.thread_id.0,
            },
        )?;
    }

    writeln!(out, "]")?;
    out.flush()?;

    Ok(())
}

pub fn emit_trace<P: AsRef<Path>>(state: &State, path: P, force: bool) -> Result<()> {
    println!("Generating trace file {:?}", path.as_ref());

    let file = OpenOptions::new()
        .write(true)
        // If force is set, create and truncate.
        .create(true)
        .truncate(true)
        // If force is not set, create only if it does not exist.
        .create_new(!force)
        .open(path)?;
    write_trace(state, BufWriter::new(file))
}
