use serde::{Deserialize, Serialize};

use super::expr::Expr;
use super::field::{GridField, TimeLevel};
use crate::solver::error::{GenError, GenResult};
use crate::solver::ir::{AxisHalo, IndexBox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Lower,
    Upper,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Lower => "lower",
            Side::Upper => "upper",
        }
    }
}

/// Extent of a boundary region along one axis. Halo-relative spans are resolved once halos are
/// known, during model finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxisSpan {
    /// Every array index.
    Full,
    /// Indices outside both halos.
    Interior,
    /// Explicit half-open index range.
    Range { start: usize, end: usize },
    /// First (lower) or last (upper) interior layer.
    Edge { side: Side },
    /// The whole halo on one face.
    Halo { side: Side },
    /// Ghost layer `layer` (1 = adjacent to the interior) on one face.
    HaloLayer { side: Side, layer: usize },
}

impl AxisSpan {
    pub fn resolve(&self, extent: usize, halo: AxisHalo) -> Option<(usize, usize)> {
        let interior_lo = halo.lower;
        let interior_hi = extent.checked_sub(halo.upper)?;
        let range = match *self {
            AxisSpan::Full => (0, extent),
            AxisSpan::Interior => (interior_lo, interior_hi),
            AxisSpan::Range { start, end } => (start, end),
            AxisSpan::Edge { side: Side::Lower } => (interior_lo, interior_lo + 1),
            AxisSpan::Edge { side: Side::Upper } => (interior_hi.checked_sub(1)?, interior_hi),
            AxisSpan::Halo { side: Side::Lower } => (0, interior_lo),
            AxisSpan::Halo { side: Side::Upper } => (interior_hi, extent),
            AxisSpan::HaloLayer { side, layer } => {
                if layer == 0 {
                    return None;
                }
                match side {
                    Side::Lower => {
                        let index = interior_lo.checked_sub(layer)?;
                        (index, index + 1)
                    }
                    Side::Upper if layer <= halo.upper => {
                        let index = interior_hi + layer - 1;
                        (index, index + 1)
                    }
                    Side::Upper => return None,
                }
            }
        };
        (range.0 < range.1 && range.1 <= extent).then_some(range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    name: String,
    spans: Vec<AxisSpan>,
}

impl Region {
    pub fn new(name: impl Into<String>, spans: Vec<AxisSpan>) -> Self {
        Self {
            name: name.into(),
            spans,
        }
    }

    /// Whole halo of one face, interior extent on every other axis.
    pub fn face(axis: usize, side: Side, rank: usize) -> Self {
        let spans = (0..rank)
            .map(|a| {
                if a == axis {
                    AxisSpan::Halo { side }
                } else {
                    AxisSpan::Interior
                }
            })
            .collect();
        Self::new(format!("x{axis}_{}", side.as_str()), spans)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spans(&self) -> &[AxisSpan] {
        &self.spans
    }

    pub fn rank(&self) -> usize {
        self.spans.len()
    }

    pub fn resolve(&self, field: &GridField, halo: &[AxisHalo]) -> GenResult<IndexBox> {
        let mut ranges = Vec::with_capacity(self.spans.len());
        for (axis, span) in self.spans.iter().enumerate() {
            let extent = field.extents()[axis];
            let face = halo.get(axis).copied().unwrap_or_default();
            let range = span
                .resolve(extent, face)
                .ok_or_else(|| GenError::RegionOutOfBounds {
                    field: field.name().to_string(),
                    region: self.name.clone(),
                    axis,
                })?;
            ranges.push(range);
        }
        Ok(IndexBox::from_ranges(&ranges))
    }
}

/// Override of a field's next-level value on a region.
#[derive(Debug, Clone)]
pub struct BoundaryCondition {
    field: GridField,
    region: Region,
    expr: Expr,
}

impl BoundaryCondition {
    pub(crate) fn new(field: GridField, region: Region, expr: Expr) -> Self {
        Self {
            field,
            region,
            expr,
        }
    }

    pub fn field(&self) -> &GridField {
        &self.field
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn label(&self) -> &str {
        self.region.name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FreeSurfaceKind {
    /// Ghost layers held at zero.
    ZeroGhost,
    /// Ghost layers mirror the interior across the surface, negated for odd parity.
    Mirror { parity: Parity },
}

/// Free-surface condition on one face, expanded into one boundary condition per ghost layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreeSurface {
    pub axis: usize,
    pub side: Side,
    pub kind: FreeSurfaceKind,
}

impl FreeSurface {
    pub fn zero(axis: usize, side: Side) -> Self {
        Self {
            axis,
            side,
            kind: FreeSurfaceKind::ZeroGhost,
        }
    }

    pub fn mirror(axis: usize, side: Side, parity: Parity) -> Self {
        Self {
            axis,
            side,
            kind: FreeSurfaceKind::Mirror { parity },
        }
    }

    /// One condition per ghost layer on the face; the other axes span the interior so that
    /// surfaces on different faces never share corner cells.
    ///
    /// An odd mirror on an unstaggered axis puts the surface on the interior layer next to the
    /// face, which is held at zero by an extra condition labelled layer 0.
    pub(crate) fn expand(&self, field: &GridField, halo: &[AxisHalo]) -> Vec<BoundaryCondition> {
        let face = halo.get(self.axis).copied().unwrap_or_default();
        let layers = match self.side {
            Side::Lower => face.lower,
            Side::Upper => face.upper,
        };

        let mut conditions = Vec::with_capacity(layers + 1);
        if self.zeroes_surface_plane(field) {
            let region = self.region(field, 0, AxisSpan::Edge { side: self.side });
            conditions.push(BoundaryCondition::new(
                field.clone(),
                region,
                Expr::float(0.0),
            ));
        }
        for layer in 1..=layers {
            let span = AxisSpan::HaloLayer {
                side: self.side,
                layer,
            };
            let region = self.region(field, layer, span);
            conditions.push(BoundaryCondition::new(
                field.clone(),
                region,
                self.layer_value(field, layer),
            ));
        }
        conditions
    }

    fn zeroes_surface_plane(&self, field: &GridField) -> bool {
        self.kind
            == FreeSurfaceKind::Mirror {
                parity: Parity::Odd,
            }
            && !field.is_staggered(self.axis)
    }

    fn region(&self, field: &GridField, layer: usize, span: AxisSpan) -> Region {
        let spans = (0..field.rank())
            .map(|axis| {
                if axis == self.axis {
                    span
                } else {
                    AxisSpan::Interior
                }
            })
            .collect();
        Region::new(
            format!("fs_x{}_{}_{}", self.axis, self.side.as_str(), layer),
            spans,
        )
    }

    fn layer_value(&self, field: &GridField, layer: usize) -> Expr {
        let parity = match self.kind {
            FreeSurfaceKind::ZeroGhost => return Expr::float(0.0),
            FreeSurfaceKind::Mirror { parity } => parity,
        };

        // Unstaggered: mirror about the interior layer next to the face. Staggered: about the
        // half-cell plane between the interior and the first ghost layer.
        let layer = layer as i64;
        let distance = if field.is_staggered(self.axis) {
            2 * layer - 1
        } else {
            2 * layer
        };
        let mut offsets = vec![0; field.rank()];
        offsets[self.axis] = match self.side {
            Side::Lower => distance,
            Side::Upper => -distance,
        };

        let mirrored = field.at_offset(TimeLevel::Next, &offsets);
        match parity {
            Parity::Even => mirrored,
            Parity::Odd => -mirrored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::model::field::FieldSpec;
    use crate::solver::model::ExprNode;

    fn halo2() -> AxisHalo {
        AxisHalo::symmetric(2)
    }

    #[test]
    fn spans_resolve_against_halo() {
        assert_eq!(AxisSpan::Full.resolve(10, halo2()), Some((0, 10)));
        assert_eq!(AxisSpan::Interior.resolve(10, halo2()), Some((2, 8)));
        assert_eq!(
            AxisSpan::Edge { side: Side::Upper }.resolve(10, halo2()),
            Some((7, 8))
        );
        assert_eq!(
            AxisSpan::Halo { side: Side::Upper }.resolve(10, halo2()),
            Some((8, 10))
        );
        assert_eq!(
            AxisSpan::HaloLayer {
                side: Side::Lower,
                layer: 1
            }
            .resolve(10, halo2()),
            Some((1, 2))
        );
        assert_eq!(
            AxisSpan::HaloLayer {
                side: Side::Upper,
                layer: 2
            }
            .resolve(10, halo2()),
            Some((9, 10))
        );
    }

    #[test]
    fn invalid_spans_do_not_resolve() {
        assert_eq!(
            AxisSpan::Range { start: 4, end: 12 }.resolve(10, halo2()),
            None
        );
        assert_eq!(
            AxisSpan::HaloLayer {
                side: Side::Lower,
                layer: 3
            }
            .resolve(10, halo2()),
            None
        );
        assert_eq!(
            AxisSpan::Halo { side: Side::Lower }.resolve(10, AxisHalo::default()),
            None
        );
    }

    #[test]
    fn region_resolution_names_the_axis() {
        let field = GridField::new(0, FieldSpec::new("u", vec![10, 4], vec![1.0, 1.0]));
        let region = Region::new(
            "bad",
            vec![AxisSpan::Full, AxisSpan::Range { start: 0, end: 5 }],
        );
        let err = region.resolve(&field, &[halo2(), halo2()]).unwrap_err();
        assert!(matches!(err, GenError::RegionOutOfBounds { axis: 1, .. }));
    }

    #[test]
    fn mirror_layers_read_across_the_surface() {
        let plain = GridField::new(0, FieldSpec::new("txx", vec![10, 10], vec![1.0, 1.0]));
        let conditions =
            FreeSurface::mirror(1, Side::Lower, Parity::Odd).expand(&plain, &[halo2(), halo2()]);
        assert_eq!(conditions.len(), 3);
        assert_eq!(conditions[2].label(), "fs_x1_lower_2");
        let ExprNode::Neg(inner) = conditions[2].expr().node() else {
            panic!("odd parity must negate");
        };
        let ExprNode::Access(access) = inner.node() else {
            panic!("expected a field access");
        };
        assert_eq!(access.level, TimeLevel::Next);
        assert_eq!(access.offsets[1], crate::solver::stencil::exact_int(4));

        let staggered = GridField::new(
            1,
            FieldSpec::new("txy", vec![10, 10], vec![1.0, 1.0]).staggered_on(1),
        );
        let surface = FreeSurface::mirror(1, Side::Upper, Parity::Odd);
        let conditions = surface.expand(&staggered, &[halo2(), halo2()]);
        assert_eq!(conditions.len(), 2);
        let ExprNode::Neg(inner) = conditions[0].expr().node() else {
            panic!("odd parity must negate");
        };
        let ExprNode::Access(access) = inner.node() else {
            panic!("expected a field access");
        };
        assert_eq!(access.offsets[1], crate::solver::stencil::exact_int(-1));
    }

    #[test]
    fn odd_mirror_zeroes_the_surface_plane() {
        let field = GridField::new(0, FieldSpec::new("tzz", vec![10, 10], vec![1.0, 1.0]));
        let halo = [halo2(), halo2()];
        let conditions = FreeSurface::mirror(1, Side::Lower, Parity::Odd).expand(&field, &halo);
        let labels: Vec<&str> = conditions.iter().map(BoundaryCondition::label).collect();
        assert_eq!(labels, vec!["fs_x1_lower_0", "fs_x1_lower_1", "fs_x1_lower_2"]);
        assert!(matches!(conditions[0].expr().node(), ExprNode::Float(v) if *v == 0.0));
        assert_eq!(
            conditions[0].region().resolve(&field, &halo).unwrap(),
            IndexBox::from_ranges(&[(2, 8), (2, 3)])
        );

        let even = FreeSurface::mirror(1, Side::Lower, Parity::Even).expand(&field, &halo);
        assert_eq!(even.len(), 2);
        assert_eq!(even[0].label(), "fs_x1_lower_1");
    }

    #[test]
    fn free_surface_regions_are_disjoint_across_faces() {
        let field = GridField::new(0, FieldSpec::new("u", vec![8, 8], vec![1.0, 1.0]));
        let halo = [halo2(), halo2()];
        let mut boxes = Vec::new();
        for surface in [
            FreeSurface::zero(0, Side::Lower),
            FreeSurface::zero(0, Side::Upper),
            FreeSurface::zero(1, Side::Lower),
            FreeSurface::zero(1, Side::Upper),
        ] {
            for condition in surface.expand(&field, &halo) {
                boxes.push(condition.region().resolve(&field, &halo).unwrap());
            }
        }
        assert_eq!(boxes.len(), 8);
        for (i, a) in boxes.iter().enumerate() {
            for b in &boxes[i + 1..] {
                assert!(!a.intersects(b), "{a} overlaps {b}");
            }
        }
    }
}
