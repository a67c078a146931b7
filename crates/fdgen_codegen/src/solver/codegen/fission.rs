use serde::Serialize;

use crate::solver::ir::{BodyKind, IndexBox, LoopBody, LoopLevel, LoopNest, StatementOrigin};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FissionReport {
    /// Combined bodies that were split, by name.
    pub split: Vec<String>,
    /// Bodies created by the splits.
    pub created: Vec<String>,
}

impl FissionReport {
    pub fn is_noop(&self) -> bool {
        self.split.is_empty()
    }
}

/// Splits every combined body, in place, into one unguarded body per statement group.
///
/// The interior statements keep the first position, followed by one body per boundary region in
/// their original order. Statement ids are preserved, so the multiset of statements is unchanged.
pub fn apply(nest: &mut LoopNest) -> FissionReport {
    let mut report = FissionReport::default();
    let bodies = std::mem::take(&mut nest.bodies);
    for body in bodies {
        if !matches!(body.kind, BodyKind::Combined { .. }) {
            nest.bodies.push(body);
            continue;
        }
        let pieces = split_combined(&body);
        log::debug!("fission: '{}' -> {} bodies", body.name, pieces.len());
        report.split.push(body.name.clone());
        report
            .created
            .extend(pieces.iter().map(|piece| piece.name.clone()));
        nest.bodies.extend(pieces);
    }
    report
}

pub fn split_combined(body: &LoopBody) -> Vec<LoopBody> {
    let field = body.kind.field().to_string();
    let domain = body.domain();
    let mut interior: Option<LoopBody> = None;
    let mut boundaries: Vec<LoopBody> = Vec::new();

    for statement in &body.statements {
        let range = statement
            .guard
            .as_ref()
            .and_then(|guard| guard.intersection(&domain))
            .unwrap_or_else(|| domain.clone());
        let mut statement = statement.clone();
        statement.guard = None;
        let region = match &statement.origin {
            StatementOrigin::Interior { .. } => None,
            StatementOrigin::Boundary { region, .. } => Some(region.clone()),
        };

        match region {
            None => match interior.as_mut() {
                Some(existing) => existing.statements.push(statement),
                None => {
                    interior = Some(LoopBody {
                        name: format!("{field}_interior"),
                        kind: BodyKind::Interior {
                            field: field.clone(),
                        },
                        levels: levels_over(&range),
                        statements: vec![statement],
                    })
                }
            },
            Some(region) => boundaries.push(LoopBody {
                name: format!("{field}_{region}"),
                kind: BodyKind::Boundary {
                    field: field.clone(),
                    region,
                },
                levels: levels_over(&range),
                statements: vec![statement],
            }),
        }
    }

    interior.into_iter().chain(boundaries).collect()
}

fn levels_over(range: &IndexBox) -> Vec<LoopLevel> {
    (0..range.rank())
        .map(|axis| {
            let (start, end) = range.range(axis);
            LoopLevel::full(axis, start, end)
        })
        .collect()
}
