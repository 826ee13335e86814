use std::fs::{create_dir, remove_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::backend::common::{
    no_labels, task_count_annotation, AnnotationFn, ColorAssignment, ColorPair, LabelFn,
};
use crate::error::{Error, Result};
use crate::state::{ProcID, State, ThreadID};

pub const X_LABEL: &str = "Time";
pub const Y_LABEL: &str = "Thread";

/// Rectangles carry at most this many label lines.
const MAX_LABEL_LINES: usize = 3;

pub struct TimelineConfig<'a> {
    /// Vertical distance between two adjacent lanes
    pub lane_height: f64,
    /// Share of the lane height covered by a task's bar, in (0, 1]
    pub bar_fraction: f64,
    /// Give every processor its own block of lanes instead of overlaying them
    pub stack_procs: bool,
    pub labels: &'a LabelFn,
    pub annotation: &'a AnnotationFn,
}

impl Default for TimelineConfig<'_> {
    fn default() -> Self {
        TimelineConfig {
            lane_height: 1.0,
            bar_fraction: 0.8,
            stack_procs: false,
            labels: &no_labels,
            annotation: &task_count_annotation,
        }
    }
}

impl TimelineConfig<'_> {
    fn validate(&self) -> Result<()> {
        if !(self.lane_height.is_finite() && self.lane_height > 0.0) {
            return Err(Error::Config(format!(
                "lane height must be positive, got {}",
                self.lane_height
            )));
        }
        if !(self.bar_fraction > 0.0 && self.bar_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "bar fraction must be in (0, 1], got {}",
                self.bar_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextLabel {
    pub x: f64,
    pub y: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRect {
    pub name: String,
    pub proc_id: ProcID,
    pub thread_id: ThreadID,
    pub x0: f64,
    pub x1: f64,
    pub y0: f64,
    pub y1: f64,
    pub colors: ColorPair,
    /// Centered inside the rectangle
    pub labels: Vec<TextLabel>,
    /// Just above the top edge, left-aligned to the start
    pub annotation: Option<TextLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub name: String,
    pub colors: ColorPair,
}

/// Everything an external renderer needs to paint the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub rects: Vec<TaskRect>,
    pub y_range: (f64, f64),
    pub y_ticks: Vec<u64>,
    pub x_label: String,
    pub y_label: String,
    pub legend: Vec<LegendEntry>,
}

fn place_labels(x0: f64, x1: f64, y0: f64, y1: f64, bar: f64, text: Vec<String>) -> Vec<TextLabel> {
    let x = (x0 + x1) / 2.0;
    let center = (y0 + y1) / 2.0;
    let offsets: &[f64] = match text.len().min(MAX_LABEL_LINES) {
        0 => &[],
        1 => &[0.0],
        2 => &[bar / 4.0, -bar / 4.0],
        _ => &[bar / 4.0, 0.0, -bar / 4.0],
    };
    text.into_iter()
        .zip(offsets)
        .map(|(text, offset)| TextLabel {
            x,
            y: center + offset,
            text,
        })
        .collect()
}

/// Lays out one rectangle per normalized record.
///
/// Colors come from `colors`, which should be fresh for each independent
/// pass. The state must have gone through `State::remap_threads`.
pub fn build_timeline(
    state: &State,
    config: &TimelineConfig,
    colors: &mut ColorAssignment,
) -> Result<Timeline> {
    config.validate()?;
    if state.is_empty() {
        return Err(Error::EmptyTrace);
    }
    if state.procs.is_empty() {
        return Err(Error::Config(
            "thread map missing, normalize the trace first".to_owned(),
        ));
    }

    let height = config.lane_height;
    let bar = height * config.bar_fraction;
    let threads_per_proc = state.threads_per_proc;
    let proc_rank = state.proc_ranks();
    let rows = if config.stack_procs {
        state.num_procs() * threads_per_proc
    } else {
        threads_per_proc
    };

    let rects = state
        .records
        .iter()
        .map(|record| {
            let row = if config.stack_procs {
                proc_rank[&record.proc_id] * threads_per_proc + record.thread_id.0
            } else {
                record.thread_id.0
            };
            let x0 = record.start.0;
            let x1 = x0 + record.length.0;
            let y0 = row as f64 * height - bar / 2.0;
            let y1 = y0 + bar;
            TaskRect {
                name: record.name.clone(),
                proc_id: record.proc_id,
                thread_id: record.thread_id,
                x0,
                x1,
                y0,
                y1,
                colors: colors.color_for(&record.name),
                labels: place_labels(x0, x1, y0, y1, bar, (config.labels)(record)),
                annotation: (config.annotation)(record).map(|text| TextLabel {
                    x: x0,
                    y: y1 + height * 0.1,
                    text,
                }),
            }
        })
        .collect();

    let padding = bar / 2.0;
    let top = (rows.max(1) - 1) as f64 * height;
    Ok(Timeline {
        rects,
        y_range: (-bar / 2.0 - padding, top + bar / 2.0 + padding),
        y_ticks: (0..rows).collect(),
        x_label: X_LABEL.to_owned(),
        y_label: Y_LABEL.to_owned(),
        legend: colors
            .legend()
            .map(|(name, colors)| LegendEntry {
                name: name.to_owned(),
                colors,
            })
            .collect(),
    })
}

#[derive(Serialize)]
struct RectRecord<'a> {
    proc_id: ProcID,
    thread_id: ThreadID,
    start: f64,
    end: f64,
    y0: f64,
    y1: f64,
    fill: String,
    edge: String,
    name: &'a str,
    annotation: Option<&'a str>,
}

/// Highest numeric suffix tried before giving up on a fresh directory.
const MAX_DIR_SUFFIX: u32 = 100;

/// Creates `path`, or `path.1`, `path.2`, ... when it is taken. With
/// `force`, an existing `path` is replaced instead.
fn create_output_dir(path: &Path, force: bool) -> Result<PathBuf> {
    if force {
        if path.is_dir() {
            println!("Removing previous contents of {:?}", path);
            remove_dir_all(path)?;
        }
        create_dir(path)?;
        return Ok(path.to_owned());
    }

    let base = path.as_os_str();
    for suffix in 0..=MAX_DIR_SUFFIX {
        let candidate = if suffix == 0 {
            path.to_owned()
        } else {
            let mut name = base.to_owned();
            name.push(format!(".{}", suffix));
            PathBuf::from(name)
        };
        match create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Config(format!(
        "no free output directory next to {:?} after {} attempts",
        path, MAX_DIR_SUFFIX
    )))
}

/// Writes the timeline into a fresh directory and returns its path.
pub fn emit_timeline<P: AsRef<Path>>(timeline: &Timeline, path: P, force: bool) -> Result<PathBuf> {
    let path = create_output_dir(path.as_ref(), force)?;
    println!("Generating timeline files in directory {:?}", &path);

    {
        let mut file = BufWriter::new(File::create(path.join("timeline.json"))?);
        serde_json::to_writer(&mut file, timeline)?;
        file.flush()?;
    }

    create_dir(path.join("tsv"))?;
    let mut file = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path.join("tsv").join("tasks.tsv"))?;
    for rect in &timeline.rects {
        file.serialize(RectRecord {
            proc_id: rect.proc_id,
            thread_id: rect.thread_id,
            start: rect.x0,
            end: rect.x1,
            y0: rect.y0,
            y1: rect.y1,
            fill: rect.colors.fill.to_string(),
            edge: rect.colors.edge.to_string(),
            name: &rect.name,
            annotation: rect.annotation.as_ref().map(|a| a.text.as_str()),
        })?;
    }
    file.flush()?;

    Ok(path)
}
