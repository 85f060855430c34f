//! Veriflow - batch eligibility verification for exported order/user tables
//!
//! Resolves directory metadata for every subject in the input, enforces an
//! all-or-nothing coverage gate, then runs a priority-ordered rule set over
//! each row to decide whether the purchasing email plausibly belongs to the
//! named account holder. Output is an annotated row artifact plus a JSON run
//! report with per-stage timings and a content hash.

pub mod coverage;
pub mod credentials;
pub mod http;
pub mod pipeline;
pub mod resolver;
pub mod rows;
pub mod rules;
pub mod settings;
pub mod validation;

pub use coverage::{CoverageDiagnostic, CoverageGate};
pub use credentials::{Credential, CredentialSource};
pub use http::{AuthHttpClient, SessionContext};
pub use pipeline::{PipelineConfig, PipelineOrchestrator, RunResult};
pub use resolver::{MetadataResolver, SubjectMetadata};
pub use rows::Row;
pub use rules::Decision;
pub use settings::Settings;
