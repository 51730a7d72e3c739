//! Errors raised while constructing commands and the build graph.
//!
//! These all surface before any process runs.  Failures of individual
//! commands during a run are not errors in this sense; see `work::FailReason`.

/// A construction-time error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Two commands declare the same output path.
    #[error("{path:?} is produced by both {first:?} and {second:?}")]
    DuplicateOutput {
        path: String,
        first: String,
        second: String,
    },

    /// Two commands with the same id.
    #[error("command id {0:?} is used twice")]
    DuplicateId(String),

    /// The dependency graph has a cycle; the path starts and ends on the same
    /// command.
    #[error("dependency cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A command line slot like `{in2}` that names no input, output or arg.
    #[error("unresolved substitution {slot:?} in {template:?}")]
    UnresolvedSubstitution { slot: String, template: String },

    /// A `{name}` placeholder in a name template without a value.
    #[error("missing variable {0:?}")]
    MissingVariable(String),

    /// A command that lists one of its own outputs as an input.
    #[error("{id:?} depends on its own output {path:?}")]
    SelfDependency { id: String, path: String },

    /// A declaration lacks something it needs.
    #[error("{kind}: missing {field}")]
    MissingField { kind: String, field: String },

    /// A declaration field with an unusable value.
    #[error("invalid {field} {value:?}")]
    InvalidValue { field: String, value: String },

    /// A declaration of a kind the registry doesn't know.
    #[error("unknown command kind {0:?}")]
    UnknownKind(String),

    /// Commands were added since the graph was last linked.
    #[error("graph has commands added since it was linked")]
    Unlinked,

    /// A requested target that is neither a command id nor a known path.
    #[error("unknown target {0:?}")]
    UnknownTarget(String),
}

pub type Result<T> = std::result::Result<T, Error>;
