use skiff_core::TaskGraphError;
use strum::{EnumDiscriminants, IntoDiscriminant as _};

use crate::BatchResult;

#[derive(Debug, thiserror::Error)]
#[error("{inner}")]
pub struct SolverError {
    kind: SolverErrorKind,
    #[source]
    inner: SolverErrorInner,
}

impl SolverError {
    pub fn kind(&self) -> SolverErrorKind {
        self.kind
    }

    /// The settled per-task outcomes, when the error carries them
    /// (`TasksFailed`).
    pub fn batch_results(&self) -> Option<&BatchResult> {
        match &self.inner {
            SolverErrorInner::TasksFailed { results, .. } => Some(results),
            _ => None,
        }
    }
}

impl<T: Into<SolverErrorInner>> From<T> for SolverError {
    fn from(value: T) -> Self {
        let inner = value.into();
        let kind = inner.discriminant();
        Self { inner, kind }
    }
}

#[derive(Debug, thiserror::Error, EnumDiscriminants)]
#[strum_discriminants(name(SolverErrorKind), vis(pub))]
pub(crate) enum SolverErrorInner {
    #[error(transparent)]
    TaskGraph(#[from] TaskGraphError),

    #[error("nothing to solve: the submitted batch is empty")]
    EmptyBatch,

    #[error("{failed} of {total} tasks failed")]
    TasksFailed {
        failed: usize,
        total: usize,
        results: BatchResult,
    },

    #[error(transparent)]
    Unknown(#[from] eyre::Report),
}

pub type SolverResult<T> = Result<T, SolverError>;
