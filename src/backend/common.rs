use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use nom::character::complete::digit1;

use serde::{Serialize, Serializer};

use crate::num_util::Postincrement;
use crate::state::TaskRecord;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Color = Color(0x000000);
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

impl Serialize for Color {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct ColorPair {
    pub fill: Color,
    pub edge: Color,
}

pub const FILL_PALETTE: [Color; 6] = [
    Color(0xff0000),
    Color(0x00ff00),
    Color(0x0000ff),
    Color(0xffff00),
    Color(0xff00ff),
    Color(0x00ffff),
];

pub const EDGE_PALETTE: [Color; 6] = [Color::BLACK; 6];

/// Tasks whose base name starts with this are always drawn black.
pub const RESERVED_PREFIX: &str = "read";

const RESERVED_COLORS: ColorPair = ColorPair {
    fill: Color::BLACK,
    edge: Color::BLACK,
};

/// Colors handed out to task names during one visualization pass.
///
/// Names get palette slots round-robin in the order they are first seen, so
/// the same record order always yields the same colors. Create a fresh
/// assignment for each independent pass.
#[derive(Debug, Default)]
pub struct ColorAssignment {
    slots: BTreeMap<String, usize>,
    next_slot: usize,
}

impl ColorAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for(&mut self, name: &str) -> ColorPair {
        let base = name.split_whitespace().next().unwrap_or(name);
        if base.starts_with(RESERVED_PREFIX) {
            return RESERVED_COLORS;
        }
        let slot = match self.slots.get(base) {
            Some(slot) => *slot,
            None => {
                let slot = self.next_slot.postincrement_mod(FILL_PALETTE.len());
                debug!("Assigning color {} to {:?}", FILL_PALETTE[slot], base);
                self.slots.insert(base.to_owned(), slot);
                slot
            }
        };
        ColorPair {
            fill: FILL_PALETTE[slot],
            edge: EDGE_PALETTE[slot],
        }
    }

    /// Names seen so far with their colors, ordered by name.
    pub fn legend(&self) -> impl Iterator<Item = (&str, ColorPair)> + '_ {
        self.slots.iter().map(|(name, slot)| {
            (
                name.as_str(),
                ColorPair {
                    fill: FILL_PALETTE[*slot],
                    edge: EDGE_PALETTE[*slot],
                },
            )
        })
    }
}

/// Produces the text lines drawn inside a task's rectangle.
pub type LabelFn = dyn Fn(&TaskRecord) -> Vec<String> + Sync;

/// Produces the text drawn just above a task's rectangle.
pub type AnnotationFn = dyn Fn(&TaskRecord) -> Option<String> + Sync;

pub fn no_labels(_record: &TaskRecord) -> Vec<String> {
    Vec::new()
}

/// Surfaces N from a `"... tasks: N"` name.
pub fn task_count_annotation(record: &TaskRecord) -> Option<String> {
    const MARKER: &str = " tasks: ";
    let name = record.raw_name.as_str();
    name.rmatch_indices(MARKER).find_map(|(pos, _)| {
        digit1::<&str, nom::error::Error<&str>>(&name[pos + MARKER.len()..])
            .ok()
            .map(|(_, count)| count.to_owned())
    })
}
