pub mod api;
pub mod config;
pub mod error;
pub mod error_value;
pub mod property;
pub mod rules;
pub mod subprogram;
pub mod trace;

// Re-export commonly used types
pub use api::{assert_, checkify, checkify_fn, checkify_with, Checkified, StagedCheck};
pub use config::CheckifyConfig;
pub use error::CheckError;
pub use error_value::{assert_func, next_code, ErrorValue};
pub use property::{run_fuzz, FuzzConfig, FuzzFailure, FuzzResult};
pub use rules::{CheckRule, PredicateFn, RuleTable};
pub use subprogram::{checkify_subprogram, ErrorAvals, ErrorSlots};
pub use trace::{reduce_batched, ErrorTrace, Tracked};
