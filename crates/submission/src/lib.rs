//! Batch submission for the ARC CE REST client.
//!
//! [`Submitter::submit`] takes a list of job description texts and returns a
//! [`BatchResults`] with exactly one entry per description, at the
//! description's original index. Every stage can fail for an individual item
//! without affecting the others:
//!
//! 1. parse the description,
//! 2. match its queue, walltime, and runtimes against the CE,
//! 3. normalize and unparse it,
//! 4. submit all surviving items in one bulk call,
//! 5. upload local inputs of the submitted jobs.

mod results;
mod submit;

pub use results::{BatchResults, ItemOutcome, SubmittedJob};
pub use submit::{SubmitOptions, Submitter};
