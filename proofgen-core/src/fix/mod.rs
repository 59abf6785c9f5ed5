//! Proof-fix state machine.
//!
//! A generated proof starts non-validated; the [`ProofChecker`] makes it
//! valid or non-valid. A non-valid proof whose version is below
//! `maxRoundsNumber` may be fixed, which appends a new round to the
//! [`ProofFixChain`] of its target. [`FixLoop`] drives these rounds until
//! a valid proof is found or the chain cannot grow any more.

mod chain;
mod checker;
mod fix_loop;

pub use chain::{BenchmarkedProof, FixRound, ProofFixChain, ProofRef, ProofStatus, RoundOutcome};
pub use checker::{ProofCheckResult, ProofChecker};
pub use fix_loop::{ChainTermination, FixLoop, FixLoopOutcome};
