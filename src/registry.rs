//! Axiom registry and JSON config loader for document reranking.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::axiom::algebra::DEFAULT_MINIMUM_VOTES_FRACTION;
use crate::axiom::precondition::DEFAULT_LENGTH_MARGIN_FRACTION;
use crate::axiom::{
    compare_ids, Always, ApproximatelySameLength, AxiomError, AxiomExpr, AxiomRef, OriginalRank,
    StrictlyGreater,
};
use crate::cache::{MemoryPreferenceStore, PreferenceStore};
use crate::types::{Query, RankedDocument};

/// Axiom expression over queries and ranked documents.
pub type DocumentAxiom = AxiomExpr<Query, RankedDocument>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxiomSpec {
    /// A registered axiom, e.g. `ORIG`.
    Named {
        name: String,
    },
    Constant {
        value: f64,
    },
    Sum {
        operands: Vec<AxiomSpec>,
    },
    Product {
        operands: Vec<AxiomSpec>,
    },
    Inverse {
        operand: Box<AxiomSpec>,
    },
    Negate {
        operand: Box<AxiomSpec>,
    },
    Normalize {
        operand: Box<AxiomSpec>,
    },
    Conjunction {
        operands: Vec<AxiomSpec>,
    },
    Vote {
        operands: Vec<AxiomSpec>,
        #[serde(default = "default_vote_fraction")]
        minimum_votes_fraction: f64,
    },
    Cascade {
        operands: Vec<AxiomSpec>,
    },
    Masked {
        operand: Box<AxiomSpec>,
        precondition: PreconditionSpec,
    },
    /// Memoize the operand in the registry's preference store.
    Cached {
        operand: Box<AxiomSpec>,
        /// Cache key namespace; defaults to the operand's name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreconditionSpec {
    Always,
    SameLength {
        #[serde(default = "default_margin_fraction")]
        margin_fraction: f64,
    },
}

fn default_vote_fraction() -> f64 {
    DEFAULT_MINIMUM_VOTES_FRACTION
}

fn default_margin_fraction() -> f64 {
    DEFAULT_LENGTH_MARGIN_FRACTION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxiomConfig {
    /// Registers the built axiom under this name when loaded into a registry.
    pub name: Option<String>,
    pub axiom: AxiomSpec,
}

/// A ranking to analyze or rerank, with the axiom to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxiomRequest {
    pub query: Query,
    pub documents: Vec<RankedDocument>,
    pub axiom: AxiomSpec,
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("unknown axiom '{0}'")]
    UnknownAxiom(String),
    #[error("invalid axiom spec: {0}")]
    Invalid(String),
    #[error(transparent)]
    Axiom(#[from] AxiomError),
    #[error("failed to read axiom config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse axiom config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Named axioms available to specs, plus the store `cached` nodes write to.
///
/// Built once at startup and passed by reference.
pub struct AxiomRegistry {
    axioms: HashMap<String, AxiomRef<Query, RankedDocument>>,
    store: Arc<dyn PreferenceStore>,
}

impl Default for AxiomRegistry {
    fn default() -> Self {
        let mut axioms: HashMap<String, AxiomRef<Query, RankedDocument>> = HashMap::new();
        axioms.insert("ORIG".to_string(), Arc::new(OriginalRank::<RankedDocument>::new()));
        axioms.insert(
            "SCORE".to_string(),
            Arc::new(StrictlyGreater::new(
                "SCORE",
                |a: &RankedDocument, b: &RankedDocument| a.score.partial_cmp(&b.score),
            )),
        );
        axioms.insert(
            "ID".to_string(),
            Arc::new(StrictlyGreater::new("ID", compare_ids::<RankedDocument>)),
        );
        axioms.insert("UNIFORM_0".to_string(), DocumentAxiom::constant(0.0).into_ref());
        Self {
            axioms,
            store: Arc::new(MemoryPreferenceStore::new()),
        }
    }
}

impl AxiomRegistry {
    /// Use `store` for `cached` nodes instead of the in-memory default.
    pub fn with_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &Arc<dyn PreferenceStore> {
        &self.store
    }

    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.axioms.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, name: &str) -> Option<AxiomRef<Query, RankedDocument>> {
        self.axioms.get(name).cloned()
    }

    pub fn insert(&mut self, name: impl Into<String>, axiom: AxiomRef<Query, RankedDocument>) {
        self.axioms.insert(name.into(), axiom);
    }

    /// Build `config` and register it when it carries a name.
    pub fn register_config(&mut self, config: &AxiomConfig) -> Result<DocumentAxiom, SpecError> {
        let axiom = axiom_from_spec(&config.axiom, self)?;
        if let Some(name) = &config.name {
            if name.trim().is_empty() {
                return Err(SpecError::Invalid("axiom name must be non-empty".to_string()));
            }
            self.insert(name.clone(), axiom.clone().into_ref());
        }
        Ok(axiom)
    }
}

pub fn axiom_from_spec(
    spec: &AxiomSpec,
    registry: &AxiomRegistry,
) -> Result<DocumentAxiom, SpecError> {
    validate_axiom_spec(spec)?;
    build(spec, registry)
}

pub fn load_axiom_from_path(
    path: impl AsRef<Path>,
    registry: &AxiomRegistry,
) -> Result<DocumentAxiom, SpecError> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let config: AxiomConfig = serde_json::from_str(&raw)?;
    axiom_from_spec(&config.axiom, registry)
}

fn build(spec: &AxiomSpec, registry: &AxiomRegistry) -> Result<DocumentAxiom, SpecError> {
    let all = |operands: &[AxiomSpec]| -> Result<Vec<DocumentAxiom>, SpecError> {
        operands.iter().map(|op| build(op, registry)).collect()
    };
    Ok(match spec {
        AxiomSpec::Named { name } => registry
            .get(name)
            .map(DocumentAxiom::from_ref)
            .ok_or_else(|| SpecError::UnknownAxiom(name.clone()))?,
        AxiomSpec::Constant { value } => DocumentAxiom::constant(*value),
        AxiomSpec::Sum { operands } => DocumentAxiom::sum(all(operands)?),
        AxiomSpec::Product { operands } => DocumentAxiom::product(all(operands)?),
        AxiomSpec::Inverse { operand } => build(operand, registry)?.inverse(),
        AxiomSpec::Negate { operand } => build(operand, registry)?.negate(),
        AxiomSpec::Normalize { operand } => build(operand, registry)?.normalize(),
        AxiomSpec::Conjunction { operands } => DocumentAxiom::conjunction(all(operands)?),
        AxiomSpec::Vote {
            operands,
            minimum_votes_fraction,
        } => DocumentAxiom::vote(all(operands)?, *minimum_votes_fraction)?,
        AxiomSpec::Cascade { operands } => DocumentAxiom::cascade(all(operands)?),
        AxiomSpec::Masked {
            operand,
            precondition,
        } => {
            let inner = build(operand, registry)?;
            match precondition {
                PreconditionSpec::Always => inner.masked(Always),
                PreconditionSpec::SameLength { margin_fraction } => {
                    inner.masked(ApproximatelySameLength::new(*margin_fraction))
                }
            }
        }
        AxiomSpec::Cached { operand, namespace } => {
            let inner = build(operand, registry)?;
            match namespace {
                Some(namespace) => inner.cached_as(Arc::clone(registry.store()), namespace.clone()),
                None => inner.cached(Arc::clone(registry.store())),
            }
        }
    })
}

fn validate_axiom_spec(spec: &AxiomSpec) -> Result<(), SpecError> {
    let invalid = |msg: &str| Err(SpecError::Invalid(msg.to_string()));
    match spec {
        AxiomSpec::Named { name } => {
            if name.trim().is_empty() {
                return invalid("named axiom must have a non-empty name");
            }
        }
        AxiomSpec::Constant { value } => {
            if !value.is_finite() {
                return invalid("constant must be finite");
            }
        }
        AxiomSpec::Sum { operands }
        | AxiomSpec::Product { operands }
        | AxiomSpec::Conjunction { operands }
        | AxiomSpec::Cascade { operands } => {
            if operands.is_empty() {
                return invalid("operator needs at least one operand");
            }
            for op in operands {
                validate_axiom_spec(op)?;
            }
        }
        AxiomSpec::Vote {
            operands,
            minimum_votes_fraction,
        } => {
            if operands.is_empty() {
                return invalid("vote needs at least one operand");
            }
            if !(0.0..=1.0).contains(minimum_votes_fraction) {
                return Err(AxiomError::InvalidVoteFraction(*minimum_votes_fraction).into());
            }
            for op in operands {
                validate_axiom_spec(op)?;
            }
        }
        AxiomSpec::Inverse { operand }
        | AxiomSpec::Negate { operand }
        | AxiomSpec::Normalize { operand } => validate_axiom_spec(operand)?,
        AxiomSpec::Cached { operand, namespace } => {
            if matches!(namespace, Some(ns) if ns.trim().is_empty()) {
                return invalid("cache namespace must be non-empty");
            }
            validate_axiom_spec(operand)?;
        }
        AxiomSpec::Masked {
            operand,
            precondition,
        } => {
            if let PreconditionSpec::SameLength { margin_fraction } = precondition {
                if !margin_fraction.is_finite() || *margin_fraction < 0.0 {
                    return invalid("margin_fraction must be a non-negative number");
                }
            }
            validate_axiom_spec(operand)?;
        }
    }
    Ok(())
}
