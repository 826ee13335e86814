use std::collections::BTreeMap;

use derive_more::{Add, Display, From, Mul, Sub};
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};

/// A point in time or a duration, in the trace's native unit multiplied by
/// whatever time scale has been applied so far.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Default, Add, Sub, Mul, From, Display, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0.0);

    fn min(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0.min(other.0))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, From, Display, Serialize)]
#[serde(transparent)]
pub struct ProcID(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, From, Display, Serialize)]
#[serde(transparent)]
pub struct ThreadID(pub u64);

/// One executed task instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    /// Task label with any `(counter)` suffix removed
    pub name: String,
    /// Task label exactly as logged, trimmed
    pub raw_name: String,
    /// Performance counter reported in the `(counter)` suffix, 0 if absent
    pub cache: u64,
    pub proc_id: ProcID,
    /// Raw worker id until `State::remap_threads`, logical index afterwards
    pub thread_id: ThreadID,
    pub start: Timestamp,
    pub length: Timestamp,
    pub end: Timestamp,
}

impl TaskRecord {
    pub fn new(
        proc_id: ProcID,
        thread_id: ThreadID,
        start: Timestamp,
        length: Timestamp,
        name: String,
        raw_name: String,
        cache: u64,
    ) -> Self {
        TaskRecord {
            name,
            raw_name,
            cache,
            proc_id,
            thread_id,
            start,
            length,
            end: start + length,
        }
    }

    /// First whitespace-delimited token of the name.
    pub fn base_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    fn set_time_range(&mut self, start: Timestamp, length: Timestamp) {
        self.start = start;
        self.length = length;
        self.end = start + length;
    }
}

/// Default record filter.
pub fn keep_all(_record: &TaskRecord) -> bool {
    true
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RebaseMode {
    /// Earliest record of the whole trace starts at zero
    #[default]
    Global,
    /// Earliest record of every processor starts at zero
    PerProc,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NormalizeConfig {
    pub rebase: RebaseMode,
    pub time_scale: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig {
            rebase: RebaseMode::Global,
            time_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Proc {
    pub proc_id: ProcID,
    /// Raw thread id to logical thread index, ordered by raw id
    pub threads: BTreeMap<ThreadID, ThreadID>,
}

impl Proc {
    fn new(proc_id: ProcID) -> Self {
        Proc {
            proc_id,
            threads: BTreeMap::new(),
        }
    }

    pub fn num_threads(&self) -> u64 {
        self.threads.len() as u64
    }
}

#[derive(Debug, Default)]
pub struct State {
    pub records: Vec<TaskRecord>,
    pub procs: BTreeMap<ProcID, Proc>,
    pub threads_per_proc: u64,
}

impl State {
    pub fn new(records: Vec<TaskRecord>) -> Self {
        State {
            records,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn num_procs(&self) -> u64 {
        self.procs.len() as u64
    }

    /// Position of every processor among the processors present in the trace.
    pub fn proc_ranks(&self) -> BTreeMap<ProcID, u64> {
        self.procs
            .keys()
            .enumerate()
            .map(|(rank, proc_id)| (*proc_id, rank as u64))
            .collect()
    }

    pub fn filter_records<F>(&mut self, keep: F)
    where
        F: Fn(&TaskRecord) -> bool,
    {
        let before = self.records.len();
        self.records.retain(|record| keep(record));
        let dropped = before - self.records.len();
        if dropped > 0 {
            info!("Filtered out {} of {} records", dropped, before);
        }
    }

    /// Shifts all times so that the earliest record starts at zero.
    pub fn rebase_time(&mut self, mode: RebaseMode) -> Result<()> {
        let global = self
            .records
            .iter()
            .map(|r| r.start)
            .reduce(Timestamp::min)
            .ok_or(Error::EmptyTrace)?;

        let mut origins = BTreeMap::<ProcID, Timestamp>::new();
        if mode == RebaseMode::PerProc {
            for record in &self.records {
                origins
                    .entry(record.proc_id)
                    .and_modify(|origin| *origin = origin.min(record.start))
                    .or_insert(record.start);
            }
        }

        self.records.par_iter_mut().for_each(|record| {
            let origin = match mode {
                RebaseMode::Global => global,
                RebaseMode::PerProc => origins[&record.proc_id],
            };
            record.set_time_range(record.start - origin, record.length);
        });
        Ok(())
    }

    pub fn scale_time(&mut self, scale: f64) -> Result<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(Error::Config(format!(
                "time scale must be a positive finite number, got {}",
                scale
            )));
        }
        self.records.par_iter_mut().for_each(|record| {
            record.set_time_range(record.start * scale, record.length * scale);
        });
        Ok(())
    }

    /// Rewrites raw thread ids into dense logical indices, per processor.
    pub fn remap_threads(&mut self) {
        let mut procs = BTreeMap::<ProcID, Proc>::new();
        for record in &self.records {
            procs
                .entry(record.proc_id)
                .or_insert_with(|| Proc::new(record.proc_id))
                .threads
                .insert(record.thread_id, ThreadID::default());
        }
        for proc in procs.values_mut() {
            for (logical, slot) in proc.threads.values_mut().enumerate() {
                *slot = ThreadID(logical as u64);
            }
            debug!("Processor {} thread map: {:?}", proc.proc_id, proc.threads);
        }

        self.records.par_iter_mut().for_each(|record| {
            record.thread_id = procs[&record.proc_id].threads[&record.thread_id];
        });

        self.threads_per_proc = procs.values().map(Proc::num_threads).max().unwrap_or(0);
        self.procs = procs;
        info!(
            "Found {} processors with up to {} threads each",
            self.procs.len(),
            self.threads_per_proc
        );
    }

    pub fn normalize(&mut self, config: &NormalizeConfig) -> Result<()> {
        if self.records.is_empty() {
            return Err(Error::EmptyTrace);
        }
        self.rebase_time(config.rebase)?;
        self.scale_time(config.time_scale)?;
        self.remap_threads();
        Ok(())
    }
}
