use serde::{Deserialize, Serialize};

/// Explicit time-stepping schemes available to [`crate::solver::model::EquationModel::add_time_update`].
///
/// `rate` is the spatial right-hand side evaluated at the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeScheme {
    /// `u_next = u + dt * rate`
    #[default]
    ForwardEuler,
    /// `u_next = 2 u - u_prev + dt^2 * rate`, for second-order-in-time equations.
    Leapfrog,
}

impl TimeScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeScheme::ForwardEuler => "forward_euler",
            TimeScheme::Leapfrog => "leapfrog",
        }
    }

    /// Number of rotating buffer slots an updated field needs under this scheme.
    pub fn time_levels(self) -> usize {
        match self {
            TimeScheme::ForwardEuler => 2,
            TimeScheme::Leapfrog => 3,
        }
    }
}

impl std::str::FromStr for TimeScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "forward_euler" | "forward-euler" | "euler" => Ok(TimeScheme::ForwardEuler),
            "leapfrog" | "leap_frog" | "leap-frog" => Ok(TimeScheme::Leapfrog),
            _ => Err(format!("unknown time scheme: {}", value)),
        }
    }
}
