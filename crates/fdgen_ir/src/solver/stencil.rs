//! Finite-difference stencil derivation.
//!
//! Weights come from matching Taylor expansions at the sample offsets: for offsets `s_j` and a
//! target derivative of order `d`, the weights solve
//!
//! ```text
//! sum_j w_j * s_j^k = d! * delta(k, d)      for k = 0 .. n-1
//! ```
//!
//! The system is solved in exact rational arithmetic; conversion to floating point happens only
//! when a kernel is emitted. Applying the weights and dividing by `h^d` approximates the
//! derivative on a grid with spacing `h`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use super::error::{GenError, GenResult};

/// Exact rational scalar used for offsets and weights.
pub type Exact = BigRational;

pub fn exact_int(value: i64) -> Exact {
    BigRational::from_integer(BigInt::from(value))
}

pub fn exact_ratio(numer: i64, denom: i64) -> Exact {
    BigRational::new(BigInt::from(numer), BigInt::from(denom))
}

/// Lossy conversion used at emission time.
pub fn exact_to_f64(value: &Exact) -> f64 {
    let numer = value.numer().to_f64().unwrap_or(f64::NAN);
    let denom = value.denom().to_f64().unwrap_or(f64::NAN);
    numer / denom
}

/// Integer value of an exact rational, if it is one and fits.
pub fn exact_to_i64(value: &Exact) -> Option<i64> {
    if value.is_integer() {
        value.to_integer().to_i64()
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StencilKind {
    /// Integer offsets centered on the evaluation point.
    Centered,
    /// Half-integer offsets (`±1/2, ±3/2, ...`) for staggered grids.
    Staggered,
}

impl StencilKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StencilKind::Centered => "centered",
            StencilKind::Staggered => "staggered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilKey {
    pub derivative_order: u32,
    pub accuracy_order: u32,
    pub kind: StencilKind,
}

impl StencilKey {
    pub fn centered(derivative_order: u32, accuracy_order: u32) -> Self {
        Self {
            derivative_order,
            accuracy_order,
            kind: StencilKind::Centered,
        }
    }

    pub fn staggered(derivative_order: u32, accuracy_order: u32) -> Self {
        Self {
            derivative_order,
            accuracy_order,
            kind: StencilKind::Staggered,
        }
    }
}

/// Upper bounds on what the derivation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilLimits {
    pub max_derivative_order: u32,
    pub max_accuracy_order: u32,
}

impl Default for StencilLimits {
    fn default() -> Self {
        Self {
            max_derivative_order: 4,
            max_accuracy_order: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StencilPoint {
    pub offset: Exact,
    pub weight: Exact,
}

/// Ordered `(offset, weight)` pairs for one `(derivative order, accuracy order, kind)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StencilCoefficients {
    key: StencilKey,
    points: Vec<StencilPoint>,
}

impl StencilCoefficients {
    pub fn key(&self) -> StencilKey {
        self.key
    }

    pub fn derivative_order(&self) -> u32 {
        self.key.derivative_order
    }

    pub fn accuracy_order(&self) -> u32 {
        self.key.accuracy_order
    }

    pub fn kind(&self) -> StencilKind {
        self.key.kind
    }

    pub fn points(&self) -> &[StencilPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn offsets(&self) -> impl Iterator<Item = &Exact> {
        self.points.iter().map(|p| &p.offset)
    }

    pub fn weight_at(&self, offset: &Exact) -> Option<&Exact> {
        self.points
            .iter()
            .find(|p| &p.offset == offset)
            .map(|p| &p.weight)
    }

    pub fn max_offset_magnitude(&self) -> Exact {
        self.points
            .iter()
            .map(|p| p.offset.abs())
            .max()
            .unwrap_or_else(Exact::zero)
    }

    /// Ghost cells needed on each side when applied to an unstaggered field.
    pub fn halo_width(&self) -> usize {
        self.max_offset_magnitude()
            .ceil()
            .to_integer()
            .to_usize()
            .unwrap_or(usize::MAX)
    }

    pub fn is_symmetric(&self) -> bool {
        self.points.iter().all(|p| {
            let mirrored = -p.offset.clone();
            self.weight_at(&mirrored) == Some(&p.weight)
        })
    }

    pub fn is_antisymmetric(&self) -> bool {
        self.points.iter().all(|p| {
            let mirrored = -p.offset.clone();
            let expected = -p.weight.clone();
            match self.weight_at(&mirrored) {
                Some(weight) => weight == &expected,
                // A missing mirror partner is only consistent with a zero weight.
                None => p.weight.is_zero(),
            }
        })
    }

    pub fn weights_f64(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (exact_to_f64(&p.offset), exact_to_f64(&p.weight)))
            .collect()
    }

    /// Apply the stencil to exact samples `f(offset)` (unit spacing).
    pub fn apply_exact(&self, f: impl Fn(&Exact) -> Exact) -> Exact {
        self.points
            .iter()
            .fold(Exact::zero(), |acc, p| acc + &p.weight * f(&p.offset))
    }
}

impl fmt::Display for StencilCoefficients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "d{}/a{} {} [",
            self.key.derivative_order,
            self.key.accuracy_order,
            self.key.kind.as_str()
        )?;
        for (idx, point) in self.points.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", point.offset, point.weight)?;
        }
        write!(f, "]")
    }
}

/// Centered stencil with the default limits.
pub fn derive(derivative_order: u32, accuracy_order: u32) -> GenResult<StencilCoefficients> {
    derive_with(
        StencilKey::centered(derivative_order, accuracy_order),
        &StencilLimits::default(),
    )
}

pub fn derive_with(key: StencilKey, limits: &StencilLimits) -> GenResult<StencilCoefficients> {
    validate_key(key, limits)?;

    let offsets = sample_offsets(key);
    let (matrix, rhs) = taylor_system(&offsets, key.derivative_order);
    let weights = solve_exact(matrix, rhs).ok_or_else(|| GenError::UnsupportedOrder {
        derivative_order: key.derivative_order,
        accuracy_order: key.accuracy_order,
        reason: "singular Taylor system".to_string(),
    })?;

    let odd_centered = key.kind == StencilKind::Centered && key.derivative_order % 2 == 1;
    let points = offsets
        .into_iter()
        .zip(weights.iter().cloned())
        .filter(|(offset, weight)| {
            // The center weight of an odd centered derivative vanishes by antisymmetry.
            if odd_centered && offset.is_zero() {
                debug_assert!(weight.is_zero());
                return false;
            }
            true
        })
        .map(|(offset, weight)| StencilPoint { offset, weight })
        .collect();

    Ok(StencilCoefficients { key, points })
}

fn validate_key(key: StencilKey, limits: &StencilLimits) -> GenResult<()> {
    let reject = |reason: &str| {
        Err(GenError::UnsupportedOrder {
            derivative_order: key.derivative_order,
            accuracy_order: key.accuracy_order,
            reason: reason.to_string(),
        })
    };

    if key.derivative_order == 0 {
        return reject("derivative order must be at least 1");
    }
    if key.derivative_order > limits.max_derivative_order {
        return reject("derivative order exceeds the configured maximum");
    }
    if key.accuracy_order < 2 || key.accuracy_order % 2 != 0 {
        return reject("accuracy order must be even and at least 2");
    }
    if key.accuracy_order > limits.max_accuracy_order {
        return reject("accuracy order exceeds the configured maximum");
    }
    Ok(())
}

fn sample_offsets(key: StencilKey) -> Vec<Exact> {
    let d = key.derivative_order as i64;
    let a = key.accuracy_order as i64;
    match key.kind {
        StencilKind::Centered => {
            let half_width = (d + 1) / 2 - 1 + a / 2;
            (-half_width..=half_width).map(exact_int).collect()
        }
        StencilKind::Staggered => {
            let half_count = (d + a) / 2;
            let mut offsets: Vec<Exact> = (1..=half_count)
                .rev()
                .map(|i| exact_ratio(-(2 * i - 1), 2))
                .collect();
            offsets.extend((1..=half_count).map(|i| exact_ratio(2 * i - 1, 2)));
            offsets
        }
    }
}

fn taylor_system(offsets: &[Exact], derivative_order: u32) -> (DMatrix<Exact>, DVector<Exact>) {
    let n = offsets.len();
    let matrix = DMatrix::from_fn(n, n, |row, col| num_traits::pow(offsets[col].clone(), row));
    let factorial = (1..=derivative_order as i64).fold(BigInt::one(), |acc, k| acc * k);
    let rhs = DVector::from_fn(n, |row, _| {
        if row == derivative_order as usize {
            BigRational::from_integer(factorial.clone())
        } else {
            Exact::zero()
        }
    });
    (matrix, rhs)
}

/// Gauss-Jordan elimination over the rationals; `None` when the system is singular.
fn solve_exact(mut a: DMatrix<Exact>, mut b: DVector<Exact>) -> Option<DVector<Exact>> {
    let n = a.nrows();
    for col in 0..n {
        let pivot = (col..n).find(|&row| !a[(row, col)].is_zero())?;
        if pivot != col {
            a.swap_rows(pivot, col);
            b.swap_rows(pivot, col);
        }

        let inv = a[(col, col)].recip();
        for c in col..n {
            let scaled = &a[(col, c)] * &inv;
            a[(col, c)] = scaled;
        }
        let scaled = &b[col] * &inv;
        b[col] = scaled;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[(row, col)].clone();
            if factor.is_zero() {
                continue;
            }
            for c in col..n {
                let reduced = &a[(row, c)] - &factor * &a[(col, c)];
                a[(row, c)] = reduced;
            }
            let reduced = &b[row] - &factor * &b[col];
            b[row] = reduced;
        }
    }
    Some(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Memoizes derivations by [`StencilKey`].
///
/// The cache is an explicit object handed to the equation model (usually behind an `Rc`) rather
/// than ambient global state. After [`StencilCache::freeze`] it no longer stores new entries;
/// lookups of unknown keys still derive, they just are not remembered.
#[derive(Debug, Default)]
pub struct StencilCache {
    limits: StencilLimits,
    entries: RefCell<IndexMap<StencilKey, Rc<StencilCoefficients>>>,
    frozen: Cell<bool>,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl StencilCache {
    pub fn new(limits: StencilLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn shared(limits: StencilLimits) -> Rc<Self> {
        Rc::new(Self::new(limits))
    }

    pub fn limits(&self) -> &StencilLimits {
        &self.limits
    }

    pub fn get(&self, key: StencilKey) -> GenResult<Rc<StencilCoefficients>> {
        if let Some(found) = self.entries.borrow().get(&key) {
            self.hits.set(self.hits.get() + 1);
            return Ok(Rc::clone(found));
        }

        self.misses.set(self.misses.get() + 1);
        let derived = Rc::new(derive_with(key, &self.limits)?);
        if !self.frozen.get() {
            log::debug!("stencil cache: derived {}", derived);
            self.entries.borrow_mut().insert(key, Rc::clone(&derived));
        }
        Ok(derived)
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.get(),
            misses: self.misses.get(),
        }
    }
}
