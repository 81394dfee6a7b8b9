//! Functions for reading label lookup tables (LUTs) in the FreeSurfer color LUT text format.
//!
//! A lookup table assigns integer label codes to the names of brain structures. Each
//! non-comment line holds an id, a name, and optionally an RGBA display color:
//!
//! ```text
//! #No. Label Name:                R   G   B   A
//! 0   Unknown                     0   0   0   0
//! 4   Left-Lateral-Ventricle    120  18 134   0
//! ```
//!
//! Real-world tables contain header comments, stray formatting and extra columns, so
//! parsing is tolerant by default: lines that do not start with an id and a name are skipped.

use log::debug;

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{BrainsegError, Result};
use crate::util::open_resource;

/// How to treat lines that are neither comments nor valid `id name` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LutParseMode {
    /// Skip such lines silently. This is what real lookup table files need.
    Tolerant,
    /// Fail with [`BrainsegError::MalformedLutLine`].
    Strict,
}

impl Default for LutParseMode {
    fn default() -> LutParseMode {
        LutParseMode::Tolerant
    }
}


/// An RGBA display color of a lookup table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LutColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}


/// One labelled structure of a lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct LutEntry {
    pub id: i32,
    pub name: String,
    pub color: Option<LutColor>,
}


/// A parsed label lookup table, mapping structure names to label ids.
///
/// Entries are kept in the order in which their names first appeared in the table. If a
/// name is listed more than once, the later line's id and color replace the earlier ones.
/// Ids need not be unique, contiguous or sorted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelTable {
    entries: Vec<LutEntry>,
    index: HashMap<String, usize>,
}

impl LabelTable {

    /// Read a lookup table from a file, skipping malformed lines.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<LabelTable> {
        LabelTable::from_file_with_mode(path, LutParseMode::Tolerant)
    }


    /// Read a lookup table from a file with the given handling of malformed lines.
    pub fn from_file_with_mode<P: AsRef<Path>>(path: P, mode: LutParseMode) -> Result<LabelTable> {
        let file = BufReader::new(open_resource(&path)?);
        let table = LabelTable::from_reader(file, mode)?;
        debug!("Read {} labels from lookup table '{}'.", table.len(), path.as_ref().display());
        Ok(table)
    }


    /// Read a lookup table from the given line-based text input.
    pub fn from_reader<S>(input: S, mode: LutParseMode) -> Result<LabelTable>
    where
        S: BufRead,
    {
        let mut table = LabelTable::default();
        for (idx, line) in input.lines().enumerate() {
            let line = line?;
            match parse_lut_line(&line) {
                LineKind::Ignored => {}
                LineKind::Entry(entry) => table.insert(entry),
                LineKind::Malformed => {
                    if mode == LutParseMode::Strict {
                        return Err(BrainsegError::MalformedLutLine(idx + 1, line));
                    }
                    debug!("Skipping malformed lookup table line {}: '{}'", idx + 1, line);
                }
            }
        }
        Ok(table)
    }


    /// Parse a lookup table held in a string.
    ///
    /// # Examples
    ///
    /// ```
    /// use brainseg::{LabelTable, LutParseMode};
    /// let lut = LabelTable::from_str_with_mode("# FreeSurfer LUT\n\n4 Left-Lateral-Ventricle 120 18 134 0\n", LutParseMode::Tolerant).unwrap();
    /// assert_eq!(Some(4), lut.id_of("Left-Lateral-Ventricle"));
    /// ```
    pub fn from_str_with_mode(text: &str, mode: LutParseMode) -> Result<LabelTable> {
        LabelTable::from_reader(text.as_bytes(), mode)
    }


    /// Add an entry, replacing the id and color of an existing entry with the same name.
    pub fn insert(&mut self, entry: LutEntry) {
        match self.index.get(&entry.name) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }


    /// Get the label id of the structure with the given name.
    pub fn id_of(&self, name: &str) -> Option<i32> {
        self.index.get(name).map(|&pos| self.entries[pos].id)
    }


    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }


    /// Get the entry for the structure with the given name.
    pub fn entry(&self, name: &str) -> Option<&LutEntry> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }


    /// The entries in table order.
    pub fn entries(&self) -> &[LutEntry] {
        &self.entries
    }


    /// The structure names in table order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }


    /// Number of distinct structure names in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }


    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for LabelTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Label lookup table with {} structures.", self.entries.len())
    }
}


enum LineKind {
    Ignored,
    Entry(LutEntry),
    Malformed,
}


/// Classify a single lookup table line.
fn parse_lut_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return LineKind::Ignored;
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() < 2 {
        return LineKind::Malformed;
    }

    let id = match tokens[0].parse::<i32>() {
        Ok(id) if id >= 0 => id,
        _ => return LineKind::Malformed,
    };

    LineKind::Entry(LutEntry {
        id,
        name: tokens[1].to_string(),
        color: parse_color(&tokens[2..]),
    })
}


/// Interpret the columns after the name as an RGBA color, if they are four 0-255 integers.
fn parse_color(tokens: &[&str]) -> Option<LutColor> {
    if tokens.len() < 4 {
        return None;
    }
    let mut rgba = [0u8; 4];
    for (channel, token) in rgba.iter_mut().zip(tokens.iter()) {
        *channel = token.parse::<u8>().ok()?;
    }
    Some(LutColor { r: rgba[0], g: rgba[1], b: rgba[2], a: rgba[3] })
}


/// Read a label lookup table from a FreeSurfer color LUT style text file.
///
/// Lines which are blank or start with `#` (after trimming) are ignored, as are lines which
/// do not start with a non-negative integer id followed by a name. If a structure name is
/// listed more than once, the later id wins.
///
/// # Examples
///
/// ```no_run
/// let lut = brainseg::read_lut("/path/to/FreeSurferColorLUT.txt").unwrap();
/// println!("{}", lut);
/// ```
pub fn read_lut<P: AsRef<Path>>(path: P) -> Result<LabelTable> {
    LabelTable::from_file(path)
}
