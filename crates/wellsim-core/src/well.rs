//! Well addressing and the plate-level measurement records.
//!
//! A [`WellLocation`] is parsed once from its identifier (`"A1"`, `"P24"`,
//! `"AF48"`) and carries zero-indexed row/column. [`WellMeasurement`] and
//! [`PlateBatch`] are value types: every transform in this crate builds a new
//! record instead of mutating one, so earlier stages stay available for
//! variance accounting.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::MeasurementKey;

/// Category used for the five-channel morphology readout.
pub const MORPHOLOGY: &str = "morphology";

/// Default morphology channels, in correlation-matrix order.
pub const MORPHOLOGY_CHANNELS: [&str; 5] = ["er", "mito", "nucleus", "actin", "rna"];

/// `{category: {channel: value}}`
pub type Readouts = BTreeMap<String, BTreeMap<String, f64>>;

/// Free-form per-well annotations (batch id, QC flags, provenance tags).
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Locations and geometry
// ---------------------------------------------------------------------------

/// A parsed well identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WellLocation {
    row: usize,
    col: usize,
    id: String,
}

impl WellLocation {
    /// Parse `"B7"`-style identifiers. Row letters are case-insensitive and may
    /// span two letters (`"AA"` is row 26); columns are 1-based and may carry
    /// leading zeros (`"A01"`).
    pub fn parse(id: &str) -> Result<Self> {
        let malformed = || Error::MalformedWellId { id: id.to_string() };
        let trimmed = id.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(malformed)?;
        let (letters, digits) = trimmed.split_at(split);
        if letters.is_empty() || letters.len() > 2 || digits.is_empty() {
            return Err(malformed());
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        let col: usize = digits.parse().map_err(|_| malformed())?;
        if col == 0 {
            return Err(malformed());
        }
        let row = letters
            .bytes()
            .map(|b| (b.to_ascii_uppercase() - b'A') as usize + 1)
            .fold(0usize, |acc, d| acc * 26 + d)
            - 1;
        Ok(Self::from_indices(row, col - 1))
    }

    /// Build a location from zero-indexed row and column.
    pub fn from_indices(row: usize, col: usize) -> Self {
        Self {
            row,
            col,
            id: format!("{}{}", row_label(row), col + 1),
        }
    }

    /// Canonical identifier (`"A1"`).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    /// Chebyshev (king-move) distance.
    pub fn chebyshev(&self, other: &WellLocation) -> usize {
        self.row.abs_diff(other.row).max(self.col.abs_diff(other.col))
    }

    /// Manhattan distance.
    pub fn manhattan(&self, other: &WellLocation) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }

    /// Number of wells between this one and the nearest plate edge
    /// (0 on the outer ring).
    pub fn edge_distance(&self, geometry: PlateGeometry) -> usize {
        let last_row = geometry.rows.saturating_sub(1);
        let last_col = geometry.cols.saturating_sub(1);
        self.row
            .min(last_row.saturating_sub(self.row))
            .min(self.col)
            .min(last_col.saturating_sub(self.col))
    }

    pub fn is_edge(&self, geometry: PlateGeometry) -> bool {
        self.edge_distance(geometry) == 0
    }

    pub fn is_corner(&self, geometry: PlateGeometry) -> bool {
        let row_end = self.row == 0 || self.row + 1 == geometry.rows;
        let col_end = self.col == 0 || self.col + 1 == geometry.cols;
        row_end && col_end
    }
}

impl fmt::Display for WellLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl TryFrom<String> for WellLocation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WellLocation> for String {
    fn from(value: WellLocation) -> Self {
        value.id
    }
}

impl std::str::FromStr for WellLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Row index to letters: 0 → `A`, 25 → `Z`, 26 → `AA`.
fn row_label(row: usize) -> String {
    let mut n = row + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Plate dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlateGeometry {
    pub rows: usize,
    pub cols: usize,
}

impl PlateGeometry {
    pub const WELLS_96: Self = Self { rows: 8, cols: 12 };
    pub const WELLS_384: Self = Self { rows: 16, cols: 24 };

    /// Geometry for a standard well count.
    pub fn from_well_count(wells: usize) -> Option<Self> {
        match wells {
            96 => Some(Self::WELLS_96),
            384 => Some(Self::WELLS_384),
            _ => None,
        }
    }

    /// Smallest standard plate that holds every location, or the bounding box
    /// when none does.
    pub fn infer<'a>(locations: impl IntoIterator<Item = &'a WellLocation>) -> Self {
        let (mut max_row, mut max_col) = (0usize, 0usize);
        for loc in locations {
            max_row = max_row.max(loc.row);
            max_col = max_col.max(loc.col);
        }
        if max_row < 8 && max_col < 12 {
            Self::WELLS_96
        } else if max_row < 16 && max_col < 24 {
            Self::WELLS_384
        } else {
            Self {
                rows: max_row + 1,
                cols: max_col + 1,
            }
        }
    }

    pub fn well_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn contains(&self, location: &WellLocation) -> bool {
        location.row < self.rows && location.col < self.cols
    }

    /// Every location in row-major order.
    pub fn locations(&self) -> impl Iterator<Item = WellLocation> + '_ {
        (0..self.rows).flat_map(move |r| (0..self.cols).map(move |c| WellLocation::from_indices(r, c)))
    }
}

impl fmt::Display for PlateGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

// ---------------------------------------------------------------------------
// Measurement records
// ---------------------------------------------------------------------------

/// Treatment identity for a well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub compound: String,
    /// Dose in µM.
    pub dose: f64,
}

impl Treatment {
    pub fn new(compound: impl Into<String>, dose: f64) -> Self {
        Self {
            compound: compound.into(),
            dose,
        }
    }

    pub fn vehicle() -> Self {
        Self::new("DMSO", 0.0)
    }
}

/// One well's readouts plus identity and annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellMeasurement {
    pub location: WellLocation,
    pub treatment: Treatment,
    pub readouts: Readouts,
    #[serde(default)]
    pub metadata: Metadata,
}

impl WellMeasurement {
    pub fn new(location: WellLocation, treatment: Treatment, readouts: Readouts) -> Self {
        Self {
            location,
            treatment,
            readouts,
            metadata: Metadata::new(),
        }
    }

    pub fn value(&self, key: &MeasurementKey) -> Option<f64> {
        self.readouts
            .get(key.category())
            .and_then(|c| c.get(key.channel()))
            .copied()
    }

    /// Copy of this well with one channel replaced. Missing keys leave the
    /// copy unchanged.
    pub fn with_value(&self, key: &MeasurementKey, value: f64) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next
            .readouts
            .get_mut(key.category())
            .and_then(|c| c.get_mut(key.channel()))
        {
            *slot = value;
        }
        next
    }

    /// Copy of this well with every channel of `category` passed through `f`.
    pub fn map_category(&self, category: &str, mut f: impl FnMut(&str, f64) -> f64) -> Self {
        let mut next = self.clone();
        if let Some(channels) = next.readouts.get_mut(category) {
            for (name, value) in channels.iter_mut() {
                *value = f(name, *value);
            }
        }
        next
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Every `(category, channel)` address this well carries.
    pub fn keys(&self) -> impl Iterator<Item = MeasurementKey> + '_ {
        self.readouts.iter().flat_map(|(cat, channels)| {
            channels
                .keys()
                .map(move |ch| MeasurementKey::new(cat.clone(), ch.clone()))
        })
    }
}

/// Ordered whole-plate batch, one record per well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateBatch {
    plate_id: String,
    wells: Vec<WellMeasurement>,
}

impl PlateBatch {
    /// Build a batch, rejecting duplicate locations.
    pub fn new(plate_id: impl Into<String>, wells: Vec<WellMeasurement>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(wells.len());
        for well in &wells {
            if !seen.insert(&well.location) {
                return Err(Error::DuplicateWell {
                    well: well.location.id().to_string(),
                });
            }
        }
        Ok(Self {
            plate_id: plate_id.into(),
            wells,
        })
    }

    /// Every well of `geometry` in row-major order with identical readouts
    /// and vehicle treatment.
    pub fn uniform(plate_id: impl Into<String>, geometry: PlateGeometry, readouts: &Readouts) -> Self {
        let wells = geometry
            .locations()
            .map(|loc| WellMeasurement::new(loc, Treatment::vehicle(), readouts.clone()))
            .collect();
        Self {
            plate_id: plate_id.into(),
            wells,
        }
    }

    pub fn plate_id(&self) -> &str {
        &self.plate_id
    }

    pub fn wells(&self) -> &[WellMeasurement] {
        &self.wells
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WellMeasurement> {
        self.wells.iter()
    }

    pub fn len(&self) -> usize {
        self.wells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    pub fn into_wells(self) -> Vec<WellMeasurement> {
        self.wells
    }

    pub fn get(&self, location: &WellLocation) -> Option<&WellMeasurement> {
        self.wells.iter().find(|w| &w.location == location)
    }

    pub fn geometry(&self) -> PlateGeometry {
        PlateGeometry::infer(self.wells.iter().map(|w| &w.location))
    }

    /// New batch on the same plate, one output well per input well.
    pub fn map_wells(&self, f: impl FnMut(&WellMeasurement) -> WellMeasurement) -> Self {
        Self {
            plate_id: self.plate_id.clone(),
            wells: self.wells.iter().map(f).collect(),
        }
    }

    /// New batch on the same plate from an arbitrary well list. No
    /// uniqueness check: adversary output goes through the pipeline's
    /// contract check instead.
    pub fn with_wells(&self, wells: Vec<WellMeasurement>) -> Self {
        Self {
            plate_id: self.plate_id.clone(),
            wells,
        }
    }

    /// Union of every measurement key present in the batch.
    pub fn keys(&self) -> BTreeSet<MeasurementKey> {
        self.wells.iter().flat_map(|w| w.keys()).collect()
    }
}

impl<'a> IntoIterator for &'a PlateBatch {
    type Item = &'a WellMeasurement;
    type IntoIter = std::slice::Iter<'a, WellMeasurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.wells.iter()
    }
}

/// Morphology readouts with every default channel set to `value`.
pub fn morphology_readouts(value: f64) -> Readouts {
    let channels = MORPHOLOGY_CHANNELS
        .iter()
        .map(|c| (c.to_string(), value))
        .collect();
    BTreeMap::from([(MORPHOLOGY.to_string(), channels)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_ids() {
        let a1 = WellLocation::parse("A1").unwrap();
        assert_eq!((a1.row(), a1.col()), (0, 0));
        let h12 = WellLocation::parse("H12").unwrap();
        assert_eq!((h12.row(), h12.col()), (7, 11));
        let p24 = WellLocation::parse("p24").unwrap();
        assert_eq!((p24.row(), p24.col()), (15, 23));
        assert_eq!(p24.id(), "P24");
    }

    #[test]
    fn test_parse_leading_zero_and_two_letters() {
        assert_eq!(WellLocation::parse("A01").unwrap().id(), "A1");
        let af = WellLocation::parse("AF48").unwrap();
        assert_eq!((af.row(), af.col()), (31, 47));
        assert_eq!(af.id(), "AF48");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "A", "12", "A0", "A1B", "ABC1", "A-1", "1A"] {
            match WellLocation::parse(bad) {
                Err(Error::MalformedWellId { id }) => assert_eq!(id, bad),
                other => panic!("expected MalformedWellId for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_row_label_roundtrip() {
        for row in [0, 7, 15, 25, 26, 31, 51] {
            let loc = WellLocation::from_indices(row, 0);
            assert_eq!(WellLocation::parse(loc.id()).unwrap().row(), row);
        }
    }

    #[test]
    fn test_geometry_inference() {
        let ids = ["A1", "H12"].map(|s| WellLocation::parse(s).unwrap());
        assert_eq!(PlateGeometry::infer(&ids), PlateGeometry::WELLS_96);
        let ids = ["A1", "I1"].map(|s| WellLocation::parse(s).unwrap());
        assert_eq!(PlateGeometry::infer(&ids), PlateGeometry::WELLS_384);
        let ids = ["A1", "Q1"].map(|s| WellLocation::parse(s).unwrap());
        assert_eq!(PlateGeometry::infer(&ids), PlateGeometry { rows: 17, cols: 1 });
    }

    #[test]
    fn test_edge_and_corner() {
        let g = PlateGeometry::WELLS_96;
        let a1 = WellLocation::parse("A1").unwrap();
        let a5 = WellLocation::parse("A5").unwrap();
        let d6 = WellLocation::parse("D6").unwrap();
        assert!(a1.is_corner(g) && a1.is_edge(g));
        assert!(!a5.is_corner(g) && a5.is_edge(g));
        assert!(!d6.is_edge(g));
        assert_eq!(d6.edge_distance(g), 3);
        assert_eq!(WellLocation::parse("H12").unwrap().edge_distance(g), 0);
    }

    #[test]
    fn test_distances() {
        let b2 = WellLocation::parse("B2").unwrap();
        let c3 = WellLocation::parse("C3").unwrap();
        assert_eq!(b2.chebyshev(&c3), 1);
        assert_eq!(b2.manhattan(&c3), 2);
    }

    #[test]
    fn test_batch_rejects_duplicates() {
        let loc = WellLocation::parse("A1").unwrap();
        let w = WellMeasurement::new(loc, Treatment::vehicle(), morphology_readouts(1.0));
        let err = PlateBatch::new("P1", vec![w.clone(), w]).unwrap_err();
        assert!(matches!(err, Error::DuplicateWell { .. }));
    }

    #[test]
    fn test_uniform_batch_shape() {
        let batch = PlateBatch::uniform("P1", PlateGeometry::WELLS_96, &morphology_readouts(100.0));
        assert_eq!(batch.len(), 96);
        assert_eq!(batch.geometry(), PlateGeometry::WELLS_96);
        assert_eq!(batch.keys().len(), 5);
    }

    #[test]
    fn test_with_value_returns_new_record() {
        let loc = WellLocation::parse("B3").unwrap();
        let w = WellMeasurement::new(loc, Treatment::vehicle(), morphology_readouts(10.0));
        let key = MeasurementKey::new(MORPHOLOGY, "nucleus");
        let w2 = w.with_value(&key, 42.0);
        assert_eq!(w.value(&key), Some(10.0));
        assert_eq!(w2.value(&key), Some(42.0));
        let er = MeasurementKey::new(MORPHOLOGY, "er");
        assert_eq!(w2.value(&er), Some(10.0));
    }

    #[test]
    fn test_location_serde_as_string() {
        let loc = WellLocation::parse("C7").unwrap();
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!(json, "\"C7\"");
        let back: WellLocation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, loc);
        assert!(serde_json::from_str::<WellLocation>("\"??\"").is_err());
    }
}
