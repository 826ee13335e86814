use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;

use log::{info, warn};

use nom::{
    bytes::complete::tag,
    character::complete::{char, u64},
    combinator::all_consuming,
    number::complete::double,
    sequence::{delimited, terminated},
    IResult,
};

use crate::error::{Error, Result};
use crate::state::{ProcID, TaskRecord, ThreadID, Timestamp};

/// Lines starting with one of these are log noise or comments, not records.
pub const COMMENT_MARKERS: &[&str] = &["LOG 2", "#"];

/// The legacy format logs seconds, the others log clock cycles.
const LEGACY_TIME_FACTOR: f64 = 1e6;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub type Grammar = fn(&str) -> Option<TaskRecord>;

/// Line grammars, tried in order until one matches.
pub const GRAMMARS: &[(&str, Grammar)] = &[
    ("single-process", parse_single_process),
    ("multi-process", parse_multi_process),
    ("legacy", parse_legacy),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// 1-based
    pub line_number: usize,
    pub line: String,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: no grammar matches {:?}", self.line_number, self.line)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTrace {
    pub records: Vec<TaskRecord>,
    pub errors: Vec<LineError>,
}

///
/// Text parser utilities
///

// [thread id]: [start] [length] <rest>
fn parse_thread_timing(input: &str) -> IResult<&str, (u64, u64, u64)> {
    let (input, thread_id) = terminated(u64, tag(": "))(input)?;
    let (input, start) = terminated(u64, char(' '))(input)?;
    let (input, length) = terminated(u64, char(' '))(input)?;
    Ok((input, (thread_id, start, length)))
}

// [proc id] <rest>
fn parse_proc_prefix(input: &str) -> IResult<&str, u64> {
    terminated(u64, char(' '))(input)
}

// " (<integer>)" spanning the whole input
fn parse_counter_suffix(input: &str) -> IResult<&str, u64> {
    all_consuming(delimited(tag(" ("), u64, char(')')))(input)
}

fn parse_seconds(input: &str) -> Option<f64> {
    let (_, value) = all_consuming(double::<&str, nom::error::Error<&str>>)(input).ok()?;
    value.is_finite().then_some(value)
}

/// Splits `"<base> (<integer>)"` into the trimmed base and the integer.
pub fn split_counter(name: &str) -> (&str, u64) {
    if let Some(pos) = name.rfind(" (") {
        if let Ok((_, cache)) = parse_counter_suffix(&name[pos..]) {
            let base = name[..pos].trim();
            if !base.is_empty() {
                return (base, cache);
            }
        }
    }
    (name, 0)
}

fn task_record(
    proc_id: u64,
    thread_id: u64,
    start: f64,
    length: f64,
    name: &str,
) -> Option<TaskRecord> {
    let raw_name = name.trim();
    if raw_name.is_empty() {
        return None;
    }
    let (name, cache) = split_counter(raw_name);
    Some(TaskRecord::new(
        ProcID(proc_id),
        ThreadID(thread_id),
        Timestamp(start),
        Timestamp(length),
        name.to_owned(),
        raw_name.to_owned(),
        cache,
    ))
}

///
/// Grammars
///

// [thread id]: [start] [length] [name [(perf)]]
fn parse_single_process(line: &str) -> Option<TaskRecord> {
    let (name, (thread_id, start, length)) = parse_thread_timing(line).ok()?;
    task_record(0, thread_id, start as f64, length as f64, name)
}

// [proc id] [thread id]: [start] [length] [name [(perf)]]
fn parse_multi_process(line: &str) -> Option<TaskRecord> {
    let (input, proc_id) = parse_proc_prefix(line).ok()?;
    let (name, (thread_id, start, length)) = parse_thread_timing(input).ok()?;
    task_record(proc_id, thread_id, start as f64, length as f64, name)
}

// [thread id] [start seconds] [length seconds] [name]
fn parse_legacy(line: &str) -> Option<TaskRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [thread_id, start, length, name] = fields.as_slice() else {
        return None;
    };
    let thread_id = thread_id.parse::<u64>().ok()?;
    let start = parse_seconds(start)?;
    let length = parse_seconds(length)?;
    task_record(
        0,
        thread_id,
        start * LEGACY_TIME_FACTOR,
        length * LEGACY_TIME_FACTOR,
        name,
    )
}

pub fn is_ignored(line: &str) -> bool {
    line.trim().is_empty() || COMMENT_MARKERS.iter().any(|m| line.starts_with(m))
}

pub fn parse_line(line: &str) -> Option<TaskRecord> {
    GRAMMARS.iter().find_map(|(_, grammar)| grammar(line))
}

pub fn parse_str(input: &str) -> ParsedTrace {
    parse_bytes(input.as_bytes())
}

/// Parses a trace line by line. Bytes that are not valid UTF-8 only affect
/// the line holding them; they are replaced and the line is parsed as usual.
pub fn parse_bytes(input: &[u8]) -> ParsedTrace {
    let mut trace = ParsedTrace::default();
    for (idx, bytes) in input.split(|b| *b == b'\n').enumerate() {
        let line = String::from_utf8_lossy(bytes);
        if let Cow::Owned(_) = line {
            warn!("Invalid UTF-8 on line {} replaced", idx + 1);
        }
        let line = line.trim_end();
        if is_ignored(line) {
            continue;
        }
        match parse_line(line) {
            Some(record) => trace.records.push(record),
            None => {
                let error = LineError {
                    line_number: idx + 1,
                    line: line.to_owned(),
                };
                warn!("Error parsing {}", error);
                trace.errors.push(error);
            }
        }
    }
    trace
}

pub fn deserialize<P: AsRef<Path>>(path: P) -> Result<ParsedTrace> {
    let path = path.as_ref();
    let open_error = |source: io::Error| Error::Open {
        path: path.to_owned(),
        source,
    };

    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(open_error)?;

    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        GzDecoder::new(&bytes[..])
            .read_to_end(&mut decoded)
            .map_err(open_error)?;
        bytes = decoded;
    }

    let trace = parse_bytes(&bytes);
    info!(
        "Parsed {} records from {:?} ({} unparsable lines)",
        trace.records.len(),
        path,
        trace.errors.len()
    );
    Ok(trace)
}
