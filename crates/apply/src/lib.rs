//! Converge apply: generic reconcile primitives over an [`ObjectStore`].
//!
//! - [`upsert`]: fetch-or-create, then patch only when the transform changed something.
//! - [`update_with_retry`] / [`patch_with_retry`]: re-run fetch, transform and write until
//!   the write lands or the [`RetryPolicy`] budget is spent.
//! - [`wait_until`] / [`wait_until_empty`]: poll until an object (or a selected set) reaches
//!   a caller-defined state.
//!
//! Every call is a plain sequence of store calls; the only suspension points besides the
//! store itself are the sleeps between retry and poll cycles.

#![forbid(unsafe_code)]

mod retry;
mod store;
mod upsert;
mod wait;

pub use converge_core::{Identity, RetryPolicy, Selector, Settings, StoreError, VerbResult};
pub use converge_patch::{MergeKeys, OperationList, Patch, PatchError, PatchOperation, PatchStrategy};
pub use retry::{patch_with_retry, update_with_retry};
pub use store::ObjectStore;
pub use upsert::{patch_object, upsert};
pub use wait::{wait_until, wait_until_absent, wait_until_empty, wait_until_listed};

fn describe_last(last: &Option<StoreError>) -> String {
    match last {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Serialization or diff failure. Never retried.
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// A retry or poll budget ran out.
    #[error("failed to {operation} {kind} {target} after {attempts} attempts{}", describe_last(.last))]
    Exhausted {
        operation: &'static str,
        kind: String,
        target: String,
        attempts: u32,
        last: Option<StoreError>,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_not_found())
    }

    /// Attempts made before giving up, for exhausted budgets.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
