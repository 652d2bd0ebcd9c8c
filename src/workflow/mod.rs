pub mod parser;
pub mod types;

pub use parser::{expand_env_vars, load_workflow, parse_workflow};
pub use types::{LoadError, LoadResult, StepSpec, WorkflowSpec};
