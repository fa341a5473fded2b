//! Uniform grid over node positions for radius queries.

use rhizome_core::types::{NodeId, Position};
use std::collections::{HashMap, HashSet};

type Cell = (i64, i64, i64);

#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<Cell, HashSet<NodeId>>,
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { 10.0 },
            cells: HashMap::new(),
        }
    }

    fn cell_of(&self, p: &Position) -> Cell {
        (
            (p.x / self.cell_size).floor() as i64,
            (p.y / self.cell_size).floor() as i64,
            (p.z / self.cell_size).floor() as i64,
        )
    }

    pub fn insert(&mut self, id: NodeId, position: &Position) {
        let cell = self.cell_of(position);
        self.cells.entry(cell).or_default().insert(id);
    }

    pub fn remove(&mut self, id: &NodeId, position: &Position) {
        let cell = self.cell_of(position);
        if let Some(ids) = self.cells.get_mut(&cell) {
            ids.remove(id);
            if ids.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Ids in every cell overlapping the cube around `center`. Callers
    /// still filter by exact distance.
    pub fn candidates(&self, center: &Position, radius: f64) -> Vec<NodeId> {
        let radius = radius.max(0.0);
        let lo = self.cell_of(&center.offset(-radius, -radius, -radius));
        let hi = self.cell_of(&center.offset(radius, radius, radius));

        // Cell counts along each axis; a huge cube saturates instead of
        // overflowing and falls through to the whole-grid scan.
        let extent = |a: i64, b: i64| (b.saturating_sub(a) as u64).saturating_add(1);
        let span = extent(lo.0, hi.0)
            .checked_mul(extent(lo.1, hi.1))
            .and_then(|n| n.checked_mul(extent(lo.2, hi.2)));

        // Sparse grids are cheaper to scan whole.
        if span.map_or(true, |n| n > self.cells.len() as u64) {
            return self
                .cells
                .iter()
                .filter(|(c, _)| {
                    (lo.0..=hi.0).contains(&c.0)
                        && (lo.1..=hi.1).contains(&c.1)
                        && (lo.2..=hi.2).contains(&c.2)
                })
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect();
        }

        let mut out = Vec::new();
        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    if let Some(ids) = self.cells.get(&(x, y, z)) {
                        out.extend(ids.iter().cloned());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_neighbouring_cells() {
        let mut index = SpatialIndex::new(10.0);
        index.insert("a".into(), &Position::new(1.0, 1.0, 1.0));
        index.insert("b".into(), &Position::new(12.0, 1.0, 1.0));
        index.insert("far".into(), &Position::new(100.0, 100.0, 100.0));

        let found = index.candidates(&Position::new(5.0, 0.0, 0.0), 8.0);
        assert!(found.contains(&"a".into()));
        assert!(found.contains(&"b".into()));
        assert!(!found.contains(&"far".into()));
    }

    #[test]
    fn remove_drops_empty_cells() {
        let mut index = SpatialIndex::new(10.0);
        let p = Position::new(-3.0, 4.0, 0.0);
        index.insert("a".into(), &p);
        index.remove(&"a".into(), &p);
        assert!(index.candidates(&p, 1.0).is_empty());
        assert!(index.cells.is_empty());
    }

    #[test]
    fn huge_radius_scans_the_whole_grid() {
        let mut index = SpatialIndex::new(10.0);
        let origin = Position::new(0.0, 0.0, 0.0);
        index.insert("a".into(), &origin);
        index.insert("b".into(), &Position::new(-4.0e6, 2.0e6, 9.0e5));

        let mut found = index.candidates(&origin, 1e8);
        found.sort();
        assert_eq!(found, vec![NodeId::from("a"), NodeId::from("b")]);
        assert_eq!(index.candidates(&origin, f64::MAX).len(), 2);
        assert_eq!(index.candidates(&origin, f64::INFINITY).len(), 2);
    }
}
