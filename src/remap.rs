//! Translation of label codes between two lookup table schemas.
//!
//! A [`RemapTable`] is built from a source and a target [`LabelTable`] by matching structure
//! names. It is then compiled into a [`CompiledRemap`] which substitutes every voxel of a
//! label volume in a single pass.

use log::debug;
use ndarray::{Array, ArrayBase, Data, Dimension};

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::fs_lut::LabelTable;

/// The label code of voxels that belong to no structure.
pub const BACKGROUND: i32 = 0;

/// Largest source id for which a dense lookup array is used instead of a hash map.
pub const DENSE_LOOKUP_LIMIT: i32 = 1 << 20;


/// A mapping from source label ids to destination label ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemapTable {
    map: BTreeMap<i32, i32>,
}

impl RemapTable {

    pub fn new() -> RemapTable {
        RemapTable::default()
    }


    /// Set the destination of a source id, replacing any earlier destination.
    pub fn insert(&mut self, source_id: i32, target_id: i32) {
        self.map.insert(source_id, target_id);
    }


    /// The destination of a source id, if the id is covered by the table.
    pub fn get(&self, source_id: i32) -> Option<i32> {
        self.map.get(&source_id).copied()
    }


    /// The destination of a value, with [`BACKGROUND`] for values not covered by the table.
    pub fn lookup(&self, value: i32) -> i32 {
        self.get(value).unwrap_or(BACKGROUND)
    }


    /// Iterate over `(source_id, target_id)` pairs in ascending source id order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.map.iter().map(|(&k, &v)| (k, v))
    }


    pub fn len(&self) -> usize {
        self.map.len()
    }


    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }


    /// Whether every covered id maps to itself.
    pub fn is_identity(&self) -> bool {
        self.map.iter().all(|(k, v)| k == v)
    }
}

impl std::iter::FromIterator<(i32, i32)> for RemapTable {
    fn from_iter<I: IntoIterator<Item = (i32, i32)>>(iter: I) -> RemapTable {
        let mut table = RemapTable::new();
        for (source_id, target_id) in iter {
            table.insert(source_id, target_id);
        }
        table
    }
}

impl fmt::Display for RemapTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Label remap table for {} source ids.", self.map.len())
    }
}


/// Build the remap table that translates label ids of the `source` schema into the `target` schema.
///
/// Each source structure is mapped to the id of the target structure with the same name.
/// Source structures that do not exist in the target map to [`BACKGROUND`]. Structures only
/// present in the target are irrelevant. If two source names share an id, the one listed
/// later in the source table determines the destination.
///
/// # Examples
///
/// ```
/// use brainseg::{build_mapping, LabelTable, LutParseMode};
/// let old = LabelTable::from_str_with_mode("1 GM\n2 WM\n3 CSF\n", LutParseMode::Tolerant).unwrap();
/// let new = LabelTable::from_str_with_mode("1 WM\n2 GM\n", LutParseMode::Tolerant).unwrap();
/// let mapping = build_mapping(&old, &new);
/// assert_eq!(Some(2), mapping.get(1));
/// assert_eq!(Some(1), mapping.get(2));
/// assert_eq!(Some(0), mapping.get(3));
/// ```
pub fn build_mapping(source: &LabelTable, target: &LabelTable) -> RemapTable {
    source
        .entries()
        .iter()
        .map(|entry| (entry.id, target.id_of(&entry.name).unwrap_or(BACKGROUND)))
        .collect()
}


/// The names and ids of source structures that have no counterpart in the target schema.
pub fn unmapped_labels<'a>(source: &'a LabelTable, target: &LabelTable) -> Vec<(&'a str, i32)> {
    source
        .entries()
        .iter()
        .filter(|entry| !target.contains(&entry.name))
        .map(|entry| (entry.name.as_str(), entry.id))
        .collect()
}


/// A remap table prepared for bulk substitution over voxel arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledRemap {
    /// Destination ids indexed by source id. Used when all source ids are small and non-negative.
    Dense(Vec<i32>),
    /// Destination ids keyed by source id.
    Sparse(HashMap<i32, i32>),
}

impl CompiledRemap {

    /// Pick the lookup structure for a remap table.
    pub fn compile(table: &RemapTable) -> CompiledRemap {
        let min = table.map.keys().next().copied().unwrap_or(0);
        let max = table.map.keys().next_back().copied().unwrap_or(-1);

        if min >= 0 && max < DENSE_LOOKUP_LIMIT {
            let mut lut = vec![BACKGROUND; (max + 1) as usize];
            for (&source_id, &target_id) in table.map.iter() {
                lut[source_id as usize] = target_id;
            }
            debug!("Using dense label lookup with {} slots.", lut.len());
            CompiledRemap::Dense(lut)
        } else {
            debug!("Using hashed label lookup for ids in [{}, {}].", min, max);
            CompiledRemap::Sparse(table.iter().collect())
        }
    }


    /// The destination of a single voxel value.
    #[inline]
    pub fn map(&self, value: i32) -> i32 {
        match self {
            CompiledRemap::Dense(lut) => {
                if value < 0 {
                    return BACKGROUND;
                }
                lut.get(value as usize).copied().unwrap_or(BACKGROUND)
            }
            CompiledRemap::Sparse(lut) => lut.get(&value).copied().unwrap_or(BACKGROUND),
        }
    }


    /// A short name of the lookup strategy, for reporting.
    pub fn strategy(&self) -> &'static str {
        match self {
            CompiledRemap::Dense(_) => "dense",
            CompiledRemap::Sparse(_) => "sparse",
        }
    }


    /// Remap all voxels of `data` into a new array of the same shape.
    pub fn apply<S, D>(&self, data: &ArrayBase<S, D>) -> Array<i32, D>
    where
        S: Data<Elem = i32>,
        D: Dimension,
    {
        data.mapv(|v| self.map(v))
    }


    /// Remap all voxels of `data` in place. Returns the number of voxels whose value changed.
    pub fn apply_inplace<D>(&self, data: &mut Array<i32, D>) -> usize
    where
        D: Dimension,
    {
        let mut changed = 0;
        data.map_inplace(|v| {
            let mapped = self.map(*v);
            if mapped != *v {
                changed += 1;
                *v = mapped;
            }
        });
        changed
    }
}


/// Remap a label array, returning a new array of identical shape.
///
/// Every element becomes `table.lookup(value)`: values not covered by the table become
/// [`BACKGROUND`]. This never fails.
///
/// # Examples
///
/// ```
/// use brainseg::{apply, RemapTable};
/// use ndarray::arr1;
/// let table: RemapTable = vec![(1, 2), (2, 1)].into_iter().collect();
/// assert_eq!(arr1(&[2, 1, 0]), apply(&arr1(&[1, 2, 0]), &table));
/// ```
pub fn apply<S, D>(data: &ArrayBase<S, D>, table: &RemapTable) -> Array<i32, D>
where
    S: Data<Elem = i32>,
    D: Dimension,
{
    CompiledRemap::compile(table).apply(data)
}


/// Remap a label array in place, with the same result as [`apply`]. Returns the number of changed voxels.
pub fn apply_inplace<D>(data: &mut Array<i32, D>, table: &RemapTable) -> usize
where
    D: Dimension,
{
    CompiledRemap::compile(table).apply_inplace(data)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::fs_lut::LutParseMode;
    use ndarray::{arr1, Array3, ArrayD, IxDyn};

    fn lut(text: &str) -> LabelTable {
        LabelTable::from_str_with_mode(text, LutParseMode::Tolerant).unwrap()
    }

    #[test]
    fn swapped_ids_are_exchanged() {
        let mapping = build_mapping(&lut("1 GM\n2 WM\n"), &lut("1 WM\n2 GM\n"));

        assert_eq!(2, mapping.len());
        assert_eq!(Some(2), mapping.get(1));
        assert_eq!(Some(1), mapping.get(2));
        assert_eq!(arr1(&[2, 1, 0]), apply(&arr1(&[1, 2, 0]), &mapping));
    }

    #[test]
    fn structures_missing_in_the_target_become_background() {
        let old = lut("1 GM\n2 WM\n3 CSF\n");
        let new = lut("1 GM\n2 WM\n");
        let mapping = build_mapping(&old, &new);

        assert_eq!(Some(1), mapping.get(1));
        assert_eq!(Some(2), mapping.get(2));
        assert_eq!(Some(0), mapping.get(3));
        assert_eq!(arr1(&[0, 0, 1]), apply(&arr1(&[3, 3, 1]), &mapping));
        assert_eq!(vec![("CSF", 3)], unmapped_labels(&old, &new));
    }

    #[test]
    fn target_only_structures_create_no_entries() {
        let mapping = build_mapping(&lut("1 GM\n"), &lut("1 GM\n2 WM\n99 Left-Amygdala\n"));
        assert_eq!(1, mapping.len());
        assert_eq!(None, mapping.get(99));
    }

    #[test]
    fn the_later_name_wins_for_duplicate_source_ids() {
        let mapping = build_mapping(&lut("5 Left-Thalamus\n5 Left-Thalamus-Proper\n"), &lut("10 Left-Thalamus\n11 Left-Thalamus-Proper\n"));
        assert_eq!(Some(11), mapping.get(5));
    }

    #[test]
    fn building_is_deterministic() {
        let old = lut("3 CSF\n1 GM\n2 WM\n1 GM-duplicate\n");
        let new = lut("2 GM\n7 CSF\n");
        assert_eq!(build_mapping(&old, &new), build_mapping(&old, &new));
    }

    #[test]
    fn unknown_and_negative_values_become_background() {
        let table: RemapTable = vec![(1, 5)].into_iter().collect();
        let data = arr1(&[1, 2, -7, 1_000_000, i32::MAX, i32::MIN]);
        assert_eq!(arr1(&[5, 0, 0, 0, 0, 0]), apply(&data, &table));
    }

    #[test]
    fn dense_and_sparse_lookups_agree() {
        let small: RemapTable = vec![(0, 0), (2, 3), (41, 4)].into_iter().collect();
        let large: RemapTable = vec![(0, 0), (2, 3), (41, 4), (DENSE_LOOKUP_LIMIT + 5, 9)].into_iter().collect();

        let dense = CompiledRemap::compile(&small);
        let sparse = CompiledRemap::compile(&large);
        assert_eq!("dense", dense.strategy());
        assert_eq!("sparse", sparse.strategy());

        for &v in &[0, 2, 41, 3, -1, 42, 100_000] {
            assert_eq!(dense.map(v), sparse.map(v));
        }
        assert_eq!(9, sparse.map(DENSE_LOOKUP_LIMIT + 5));
    }

    #[test]
    fn negative_source_ids_use_the_sparse_lookup() {
        let table: RemapTable = vec![(-1, 4), (3, 2)].into_iter().collect();
        let compiled = CompiledRemap::compile(&table);
        assert_eq!("sparse", compiled.strategy());
        assert_eq!(4, compiled.map(-1));
    }

    #[test]
    fn an_empty_table_maps_everything_to_background() {
        let table = RemapTable::new();
        let data = Array3::<i32>::from_elem((2, 3, 4), 17);
        assert_eq!(Array3::<i32>::zeros((2, 3, 4)), apply(&data, &table));
    }

    #[test]
    fn in_place_and_copying_remaps_are_identical() {
        let table: RemapTable = vec![(1, 2), (2, 1), (3, 0), (4, 4)].into_iter().collect();
        let data = ArrayD::from_shape_fn(IxDyn(&[5, 4, 3, 2]), |idx| ((idx[0] * 7 + idx[1] * 3 + idx[2] + idx[3]) % 6) as i32);

        let copied = apply(&data, &table);
        let mut in_place = data.clone();
        let changed = apply_inplace(&mut in_place, &table);

        assert_eq!(copied, in_place);
        assert_eq!(data.shape(), copied.shape());
        let expected_changed = data.iter().zip(copied.iter()).filter(|(a, b)| a != b).count();
        assert_eq!(expected_changed, changed);
    }

    #[test]
    fn outputs_are_in_the_table_range_or_background() {
        let table: RemapTable = vec![(1, 10), (2, 20), (3, 0)].into_iter().collect();
        let data = ArrayD::from_shape_fn(IxDyn(&[4, 4, 4]), |idx| (idx[0] + idx[1] * 2 + idx[2]) as i32 - 2);
        let out = apply(&data, &table);
        let range: Vec<i32> = table.iter().map(|(_, t)| t).collect();

        assert_eq!(data.shape(), out.shape());
        assert!(out.iter().all(|v| *v == BACKGROUND || range.contains(v)));
    }

    #[test]
    fn identity_remap_of_the_new_schema_keeps_values() {
        let old = lut("1 GM\n2 WM\n3 CSF\n");
        let new = lut("2 GM\n1 WM\n");
        let first = apply(&arr1(&[1, 2, 3, 0, 1]), &build_mapping(&old, &new));

        let identity = build_mapping(&new, &new);
        assert!(identity.is_identity());
        assert_eq!(first, apply(&first, &identity));
    }
}
