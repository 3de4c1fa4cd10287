/// Decentralized identifiers
pub mod did;
/// DID document model
pub mod did_doc;
/// Handles (DNS-style aliases for DIDs)
pub mod handle;
/// Either a handle or a DID
pub mod ident;

use miette::{Diagnostic, SourceSpan};
use smol_str::SmolStr;

/// Parse failure for one of the AT Protocol identifier types.
#[derive(Debug, Clone, PartialEq, Eq, Diagnostic)]
#[diagnostic(
    code(protoflare::types::identifier),
    help("DIDs look like `did:plc:abc123`, handles like `alice.example.com`")
)]
pub struct IdentifierError {
    /// Which identifier type was being parsed
    pub spec: SmolStr,
    /// The rejected input
    #[source_code]
    pub source: String,
    /// Highlighted span of the input
    #[label("here")]
    pub span: SourceSpan,
    /// What was wrong with it
    pub problem: IdentifierProblem,
}

impl std::fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.spec, self.problem)
    }
}

impl std::error::Error for IdentifierError {}

/// The reason an identifier was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierProblem {
    /// Input longer than the identifier's limit
    #[error("too long ({actual} > {max})")]
    TooLong {
        /// Maximum permitted length
        max: usize,
        /// Length of the input
        actual: usize,
    },
    /// Input does not match the identifier's syntax
    #[error("does not match the required syntax")]
    Syntax,
}

impl IdentifierError {
    pub(crate) fn too_long(spec: &'static str, source: &str, max: usize) -> Self {
        Self {
            spec: SmolStr::new_static(spec),
            source: source.to_string(),
            span: (max, source.len().saturating_sub(max)).into(),
            problem: IdentifierProblem::TooLong {
                max,
                actual: source.len(),
            },
        }
    }

    pub(crate) fn syntax(spec: &'static str, source: &str) -> Self {
        Self {
            spec: SmolStr::new_static(spec),
            source: source.to_string(),
            span: (0, source.len()).into(),
            problem: IdentifierProblem::Syntax,
        }
    }
}
