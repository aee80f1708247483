//! Query router
//!
//! Classifies a query and picks the workflow route:
//!
//! ```text
//! Complexity | Route | Debate budget (default)
//! -----------|-------|------------------------
//! simple     | fast  | 0   (classify → extract → synthesize)
//! medium     | full  | 12
//! complex    | full  | 40
//! critical   | full  | 60
//! ```

pub mod classifier;

pub use classifier::{Classifier, ClassifyError};
