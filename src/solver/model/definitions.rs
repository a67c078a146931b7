use std::rc::Rc;

use crate::solver::config::PipelineConfig;
use crate::solver::error::GenResult;
use crate::solver::model::EquationModel;
use crate::solver::stencil::StencilCache;

mod elastic;
mod heat;
mod wave;

pub use elastic::elastic2d_model;
pub use heat::heat2d_model;
pub use wave::{wave1d_model, wave2d_model};

pub type ModelBuilder = fn(Rc<StencilCache>, &PipelineConfig) -> GenResult<EquationModel>;

/// A named equation model the CLI and benches can build by id.
#[derive(Debug, Clone, Copy)]
pub struct ModelDefinition {
    pub id: &'static str,
    pub summary: &'static str,
    builder: ModelBuilder,
}

impl ModelDefinition {
    /// Builds the model against a fresh stencil cache sized from `config`.
    pub fn build(&self, config: &PipelineConfig) -> GenResult<EquationModel> {
        self.build_with_cache(StencilCache::shared(config.stencil_limits()), config)
    }

    pub fn build_with_cache(
        &self,
        cache: Rc<StencilCache>,
        config: &PipelineConfig,
    ) -> GenResult<EquationModel> {
        (self.builder)(cache, config)
    }
}

/// Built-in model registry, in the order the CLI lists them.
pub fn all_models() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition {
            id: "wave1d",
            summary: "1-D acoustic wave, leapfrog, clamped ends",
            builder: wave1d_model,
        },
        ModelDefinition {
            id: "wave2d",
            summary: "2-D acoustic wave with a velocity medium, leapfrog, clamped faces",
            builder: wave2d_model,
        },
        ModelDefinition {
            id: "heat2d",
            summary: "2-D heat equation, forward Euler, fixed and insulated faces",
            builder: heat2d_model,
        },
        ModelDefinition {
            id: "elastic2d",
            summary: "2-D velocity-stress elastic wave on a staggered grid with a free surface",
            builder: elastic2d_model,
        },
    ]
}

pub fn model_by_id(id: &str) -> Option<ModelDefinition> {
    all_models().into_iter().find(|model| model.id == id)
}

pub fn model_ids() -> Vec<&'static str> {
    all_models().iter().map(|model| model.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ids_are_unique_and_resolvable() {
        let ids = model_ids();
        assert_eq!(ids, vec!["wave1d", "wave2d", "heat2d", "elastic2d"]);
        for id in ids {
            assert_eq!(model_by_id(id).map(|m| m.id), Some(id));
        }
        assert!(model_by_id("navier_stokes").is_none());
    }

    #[test]
    fn every_model_finalizes_at_default_and_fourth_order() {
        for accuracy_order in [2, 4] {
            let config = PipelineConfig {
                accuracy_order,
                ..PipelineConfig::default()
            };
            for definition in all_models() {
                let model = definition.build(&config).unwrap();
                let finalized = model.finalize().unwrap();
                assert!(
                    !finalized.equations().is_empty(),
                    "{} has no equations",
                    definition.id
                );
            }
        }
    }
}
