//! The placement collaborator boundary.
//!
//! Deciding *that* an element is added is this crate's job; deciding where
//! it is drawn is not. The applier calls a [`Placer`] exactly once per
//! addition, hands it the current sheet occupancy, and never re-invokes it
//! for elements that already exist; user placement always survives.

/// What the placer gets to see: how full the destination sheet already is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub symbols: usize,
    pub sheets: usize,
}

pub trait Placer {
    /// Position for a newly added component, in schematic millimetres.
    fn place_component(&self, occupancy: &Occupancy) -> (f64, f64);

    /// Position for a newly added sheet record.
    fn place_sheet(&self, occupancy: &Occupancy) -> (f64, f64);
}

/// Deterministic fallback placer: components on a left-to-right grid,
/// sheets stacked in a column on the right.
#[derive(Debug, Clone)]
pub struct GridPlacer {
    pub origin: (f64, f64),
    pub pitch: f64,
    pub columns: usize,
}

impl Default for GridPlacer {
    fn default() -> Self {
        GridPlacer {
            origin: (25.4, 25.4),
            pitch: 12.7,
            columns: 8,
        }
    }
}

impl Placer for GridPlacer {
    fn place_component(&self, occupancy: &Occupancy) -> (f64, f64) {
        let column = occupancy.symbols % self.columns;
        let row = occupancy.symbols / self.columns;
        (
            self.origin.0 + column as f64 * self.pitch,
            self.origin.1 + row as f64 * self.pitch,
        )
    }

    fn place_sheet(&self, occupancy: &Occupancy) -> (f64, f64) {
        (
            self.origin.0 + self.columns as f64 * self.pitch + 25.4,
            self.origin.1 + occupancy.sheets as f64 * self.pitch * 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_walks_columns_then_rows() {
        let placer = GridPlacer::default();
        let first = placer.place_component(&Occupancy::default());
        let second = placer.place_component(&Occupancy {
            symbols: 1,
            sheets: 0,
        });
        let wrapped = placer.place_component(&Occupancy {
            symbols: 8,
            sheets: 0,
        });
        assert_eq!(first, (25.4, 25.4));
        assert_eq!(second.1, first.1);
        assert!(second.0 > first.0);
        assert_eq!(wrapped.0, first.0);
        assert!(wrapped.1 > first.1);
    }

    #[test]
    fn placement_is_a_pure_function_of_occupancy() {
        let placer = GridPlacer::default();
        let occ = Occupancy {
            symbols: 3,
            sheets: 1,
        };
        assert_eq!(placer.place_component(&occ), placer.place_component(&occ));
        assert_eq!(placer.place_sheet(&occ), placer.place_sheet(&occ));
    }
}
