use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, BufWriter};
use std::path::Path;

use log::warn;

use rayon::prelude::*;

use serde::Serialize;

use slice_group_by::GroupBy;

use crate::error::{Error, Result};
use crate::state::{State, TaskRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub count: u64,
    pub time: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct GapStats {
    pub count: usize,
    pub min: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub num_records: usize,
    pub num_procs: u64,
    /// Logical threads per processor
    pub num_threads: u64,
    pub total_busy: f64,
    /// Wall-clock span of the trace
    pub end_time: f64,
    pub parallelism: f64,
    pub full_capacity: f64,
    pub idle_time: f64,
    pub efficiency: f64,
    /// Ascending by summed time
    pub tasks: Vec<TaskSummary>,
    /// None when no lane holds two records
    pub gaps: Option<GapStats>,
    pub total_cache: u64,
}

impl Statistics {
    /// Computes the statistics of a normalized trace.
    pub fn compute(state: &State) -> Result<Self> {
        let records = &state.records;
        let end_time = records
            .iter()
            .map(|r| r.end.0)
            .reduce(f64::max)
            .ok_or(Error::EmptyTrace)?;
        if !(end_time > 0.0) {
            return Err(Error::ZeroSpan);
        }
        if state.procs.is_empty() {
            return Err(Error::Config(
                "thread map missing, normalize the trace first".to_owned(),
            ));
        }

        let total_busy: f64 = records.iter().map(|r| r.length.0).sum();
        let num_threads = state.threads_per_proc;
        let num_procs = state.num_procs();
        let full_capacity = end_time * num_threads as f64 * num_procs as f64;

        let mut by_name = BTreeMap::<&str, (u64, f64)>::new();
        for record in records {
            let entry = by_name.entry(record.name.as_str()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += record.length.0;
        }
        let mut tasks: Vec<_> = by_name
            .into_iter()
            .map(|(name, (count, time))| TaskSummary {
                name: name.to_owned(),
                count,
                time,
            })
            .collect();
        // Stable sort keeps ties in name order
        tasks.sort_by(|a, b| a.time.total_cmp(&b.time));

        let gaps = match gap_stats(records) {
            Ok(gaps) => Some(gaps),
            Err(Error::EmptySample) => {
                warn!("No lane holds more than one task, gap statistics are undefined");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Statistics {
            num_records: records.len(),
            num_procs,
            num_threads,
            total_busy,
            end_time,
            parallelism: total_busy / end_time,
            full_capacity,
            idle_time: full_capacity - total_busy,
            efficiency: total_busy / full_capacity,
            tasks,
            gaps,
            total_cache: records.iter().map(|r| r.cache).sum(),
        })
    }

    /// Zero when no task has any length.
    pub fn percent_of_busy(&self, time: f64) -> f64 {
        if self.total_busy > 0.0 {
            time / self.total_busy * 100.0
        } else {
            0.0
        }
    }

    pub fn percent_of_capacity(&self, time: f64) -> f64 {
        time / self.full_capacity * 100.0
    }
}

/// Median of the sample: the middle value, or the mean of the two middle
/// values for an even count.
pub fn median(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(Error::EmptySample);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[mid])
    } else {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Idle intervals between consecutive tasks of every (proc, thread) lane.
///
/// Negative values mean overlapping records on one lane and are kept as is.
pub fn lane_gaps(records: &[TaskRecord]) -> Vec<f64> {
    let mut lanes: Vec<&TaskRecord> = records.iter().collect();
    lanes.par_sort_by(|a, b| {
        (a.proc_id, a.thread_id)
            .cmp(&(b.proc_id, b.thread_id))
            .then(a.start.0.total_cmp(&b.start.0))
    });
    lanes
        .linear_group_by(|a, b| a.proc_id == b.proc_id && a.thread_id == b.thread_id)
        .flat_map(|lane| {
            lane.windows(2)
                .map(|pair| pair[1].start.0 - (pair[0].start.0 + pair[0].length.0))
        })
        .collect()
}

pub fn gap_stats(records: &[TaskRecord]) -> Result<GapStats> {
    let gaps = lane_gaps(records);
    let min = gaps
        .iter()
        .copied()
        .reduce(f64::min)
        .ok_or(Error::EmptySample)?;
    Ok(GapStats {
        count: gaps.len(),
        min,
        median: median(&gaps)?,
    })
}

/// One-line overview printed alongside the timeline.
pub fn summary_line(stats: &Statistics) -> String {
    let (dist_min, dist_med) = match &stats.gaps {
        Some(gaps) => (gaps.min.to_string(), gaps.median.to_string()),
        None => ("-".to_owned(), "-".to_owned()),
    };
    format!(
        "N= {}  Total= {}  End= {}  Par= {:.2}  DistMin= {}  DistMed= {}  perf= {}",
        stats.num_records,
        stats.total_busy,
        stats.end_time,
        stats.parallelism,
        dist_min,
        dist_med,
        stats.total_cache
    )
}

/// Full utilization report, one row per task name plus the idle row.
pub fn write_report<W: io::Write>(stats: &Statistics, mut out: W) -> Result<()> {
    writeln!(out, "end_time    {:10.2}", stats.end_time)?;
    writeln!(out, "parallelism {:10.2}", stats.parallelism)?;
    writeln!(out, "efficiency  {:10.2} %", stats.efficiency * 100.0)?;
    writeln!(out, "num threads: {}", stats.num_threads)?;
    writeln!(out, "total_time: {}", stats.total_busy)?;
    writeln!(out)?;
    for task in &stats.tasks {
        writeln!(
            out,
            "{:16} {:10} {:10.2} {:6.2} % {:6.2} %",
            task.name,
            task.count,
            task.time,
            stats.percent_of_busy(task.time),
            stats.percent_of_capacity(task.time)
        )?;
    }
    writeln!(
        out,
        "{:16} ---------- {:10.2} -------- {:6.2} %",
        "idle",
        stats.idle_time,
        stats.percent_of_capacity(stats.idle_time)
    )?;
    out.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct TaskRow<'a> {
    name: &'a str,
    count: Option<u64>,
    time: f64,
    percent_busy: Option<f64>,
    percent_capacity: f64,
}

/// Writes the per-task table, idle row last, as tab-separated values.
pub fn write_task_table<W: io::Write>(stats: &Statistics, writer: W) -> Result<()> {
    let mut file = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    for task in &stats.tasks {
        file.serialize(TaskRow {
            name: &task.name,
            count: Some(task.count),
            time: task.time,
            percent_busy: Some(stats.percent_of_busy(task.time)),
            percent_capacity: stats.percent_of_capacity(task.time),
        })?;
    }
    file.serialize(TaskRow {
        name: "idle",
        count: None,
        time: stats.idle_time,
        percent_busy: None,
        percent_capacity: stats.percent_of_capacity(stats.idle_time),
    })?;
    file.flush()?;
    Ok(())
}

pub fn emit_task_table<P: AsRef<Path>>(stats: &Statistics, path: P, force: bool) -> Result<()> {
    println!("Writing task table {:?}", path.as_ref());

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        // Without force, refuse to replace an existing table.
        .create_new(!force)
        .open(path)?;
    write_task_table(stats, BufWriter::new(file))
}

pub fn print_statistics(state: &State) -> Result<Statistics> {
    let stats = Statistics::compute(state)?;
    write_report(&stats, io::stdout().lock())?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::state::{NormalizeConfig, ProcID, ThreadID, Timestamp};

    fn record(proc_id: u64, thread_id: u64, start: f64, length: f64, name: &str) -> TaskRecord {
        TaskRecord::new(
            ProcID(proc_id),
            ThreadID(thread_id),
            Timestamp(start),
            Timestamp(length),
            name.to_owned(),
            name.to_owned(),
            1,
        )
    }

    fn normalized(records: Vec<TaskRecord>) -> State {
        let mut state = State::new(records);
        state.normalize(&NormalizeConfig::default()).unwrap();
        state
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0]).unwrap(), 2.0);
        assert_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_eq!(median(&[5.0]).unwrap(), 5.0);
        assert_matches!(median(&[]), Err(Error::EmptySample));
    }

    #[test]
    fn test_lane_gaps() {
        let records = vec![
            record(0, 0, 30.0, 10.0, "a"),
            record(0, 0, 0.0, 10.0, "a"),
            record(0, 1, 0.0, 10.0, "a"),
            record(1, 0, 5.0, 10.0, "a"),
            record(0, 0, 12.0, 10.0, "a"),
            record(1, 0, 12.0, 1.0, "a"),
        ];
        let mut gaps = lane_gaps(&records);
        gaps.sort_by(f64::total_cmp);
        assert_eq!(gaps, vec![-3.0, 2.0, 8.0]);

        let stats = gap_stats(&records).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, -3.0);
        assert_eq!(stats.median, 2.0);
    }

    #[test]
    fn test_no_gaps() {
        let records = vec![record(0, 0, 0.0, 1.0, "a"), record(0, 1, 0.0, 1.0, "a")];
        assert_matches!(gap_stats(&records), Err(Error::EmptySample));

        let stats = Statistics::compute(&normalized(records)).unwrap();
        assert_eq!(stats.gaps, None);
        assert!(summary_line(&stats).contains("DistMin= -  DistMed= -"));
    }

    #[test]
    fn test_ratios() {
        let state = normalized(vec![
            record(0, 0, 0.0, 100.0, "compute"),
            record(0, 0, 100.0, 50.0, "idle_gap"),
            record(0, 1, 0.0, 150.0, "compute"),
            record(0, 2, 50.0, 25.0, "copy"),
        ]);
        let stats = Statistics::compute(&state).unwrap();
        assert_eq!(stats.total_busy, 325.0);
        assert_eq!(stats.end_time, 150.0);
        assert_eq!(stats.num_threads, 3);
        assert_eq!(stats.full_capacity, 450.0);
        assert_eq!(stats.idle_time, 125.0);
        assert!((stats.efficiency - stats.total_busy / stats.full_capacity).abs() < 1e-12);
        assert!(stats.efficiency <= 1.0);
        assert_eq!(stats.total_cache, 4);

        let names: Vec<_> = stats.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["copy", "idle_gap", "compute"]);
    }

    #[test]
    fn test_multi_proc_capacity() {
        let state = normalized(vec![
            record(0, 4, 0.0, 10.0, "a"),
            record(0, 8, 0.0, 10.0, "a"),
            record(1, 4, 0.0, 10.0, "b"),
        ]);
        let stats = Statistics::compute(&state).unwrap();
        assert_eq!(stats.num_procs, 2);
        assert_eq!(stats.num_threads, 2);
        assert_eq!(stats.full_capacity, 40.0);
        assert_eq!(stats.efficiency, 0.75);
    }

    #[test]
    fn test_degenerate_traces() {
        assert_matches!(
            Statistics::compute(&State::default()),
            Err(Error::EmptyTrace)
        );
        let state = normalized(vec![record(0, 0, 7.0, 0.0, "a")]);
        assert_matches!(Statistics::compute(&state), Err(Error::ZeroSpan));
    }

    #[test]
    fn test_report_layout() {
        let state = normalized(vec![
            record(0, 0, 0.0, 100.0, "compute"),
            record(0, 1, 0.0, 50.0, "copy"),
        ]);
        let stats = Statistics::compute(&state).unwrap();
        let mut report = Vec::new();
        write_report(&stats, &mut report).unwrap();
        let report = String::from_utf8(report).unwrap();
        let lines: Vec<_> = report.lines().collect();
        assert_eq!(lines[0], "end_time        100.00");
        assert_eq!(lines[1], "parallelism       1.50");
        assert_eq!(lines[2], "efficiency       75.00 %");
        assert_eq!(lines[3], "num threads: 2");
        assert_eq!(lines[4], "total_time: 150");
        assert_eq!(lines[5], "");
        assert_eq!(
            lines[6],
            "copy                      1      50.00  33.33 %  25.00 %"
        );
        assert_eq!(
            lines[8],
            "idle             ----------      50.00 --------  25.00 %"
        );
    }

    #[test]
    fn test_report_without_busy_time() {
        let state = normalized(vec![record(0, 0, 0.0, 0.0, "a"), record(0, 0, 10.0, 0.0, "b")]);
        let stats = Statistics::compute(&state).unwrap();
        assert_eq!(stats.total_busy, 0.0);
        assert_eq!(stats.percent_of_busy(0.0), 0.0);

        let mut report = Vec::new();
        write_report(&stats, &mut report).unwrap();
        let report = String::from_utf8(report).unwrap();
        assert!(!report.contains("NaN"));
        assert_eq!(
            report.lines().nth(6),
            Some("a                         1       0.00   0.00 %   0.00 %")
        );
    }

    #[test]
    fn test_task_table_respects_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.tsv");
        let stats = Statistics::compute(&normalized(vec![record(0, 0, 0.0, 4.0, "a")])).unwrap();

        emit_task_table(&stats, &path, false).unwrap();
        std::fs::write(&path, "keep").unwrap();
        assert_matches!(emit_task_table(&stats, &path, false), Err(Error::Io(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep");

        emit_task_table(&stats, &path, true).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("name\t"));
    }

    #[test]
    fn test_task_table() {
        let state = normalized(vec![record(0, 0, 0.0, 4.0, "a"), record(0, 1, 0.0, 2.0, "b")]);
        let stats = Statistics::compute(&state).unwrap();
        let mut out = Vec::new();
        write_task_table(&stats, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines[0],
            "name\tcount\ttime\tpercent_busy\tpercent_capacity"
        );
        assert_eq!(lines[1], "b\t1\t2.0\t33.33333333333333\t25.0");
        assert_eq!(lines[3], "idle\t\t2.0\t\t25.0");
    }
}
