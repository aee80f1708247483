//! Verifier: evidence-backed checks on agent claims.
//!
//! ```text
//! claim ──▶ checkable? ──no──▶ skipped
//!              │yes
//!              ▼
//!         cache hit? ──yes──┐
//!              │no          │
//!              ▼            ▼
//!   GuardedEvidence::search ─▶ similarity ▶ source priority ▶ figure match
//!                                                             │
//!                                          verified / unverified + warning
//! ```

pub mod engine;
pub mod evidence;

pub use engine::{VerificationEngine, VerificationResult};
pub use evidence::{Evidence, EvidenceError, EvidenceIndex, GuardedEvidence, LookupError, NoEvidence};
