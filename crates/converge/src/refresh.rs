//! Refresh: record what the code already shows.
//!
//! Runs an inference provider over every declared resource and turns each
//! verdict that differs from state into one mutation. Nothing is written
//! here; the caller commits the mutations under the lock.

use crate::inference::{Inference, InferenceProvider};
use crate::model::{Address, Mutation, State, Status};
use crate::spec::Spec;
use std::path::Path;

/// One resource's verdict and the change it implies
#[derive(Debug, Clone)]
pub struct RefreshEntry {
    pub address: Address,
    pub inference: Inference,
    /// `None` when state is left alone
    pub mutation: Option<Mutation>,
    /// Why there is no mutation
    pub note: Option<&'static str>,
}

impl RefreshEntry {
    fn unchanged(address: &Address, inference: Inference, note: &'static str) -> Self {
        Self {
            address: address.clone(),
            inference,
            mutation: None,
            note: Some(note),
        }
    }
}

/// Infer every spec resource in address order.
///
/// Without `force`, resources already recorded with a status other than
/// missing are reported but not touched. A missing verdict never writes.
pub fn refresh(
    spec: &Spec,
    state: &State,
    provider: &dyn InferenceProvider,
    root: &Path,
    force: bool,
) -> Vec<RefreshEntry> {
    spec.resources
        .iter()
        .map(|(address, declared)| {
            let inference = provider.infer(address, declared, root).unwrap_or_else(|e| {
                log::warn!("Inference failed for {address}: {e:#}");
                Inference::from_confidence(provider.name(), 0.0)
            });
            let recorded = state.get(address);

            if !force && recorded.is_some_and(|r| r.status != Status::Missing) {
                return RefreshEntry::unchanged(address, inference, "already recorded");
            }

            let mutation = match inference.status {
                Status::Implemented => {
                    let unchanged = recorded.is_some_and(|r| {
                        r.status == Status::Implemented
                            && r.files == inference.files
                            && inference
                                .symbols
                                .iter()
                                .all(|(name, symbol)| r.symbols.get(name) == Some(symbol))
                    });
                    if unchanged {
                        return RefreshEntry::unchanged(address, inference, "no change");
                    }
                    Mutation::MarkCreated {
                        address: address.clone(),
                        files: inference.files.clone(),
                        symbols: inference.symbols.clone(),
                        depends_on: declared.depends_on.clone(),
                        agent: None,
                    }
                }
                Status::Partial => {
                    let reason = format!(
                        "inferred by {} at {:.0}% confidence",
                        inference.provider,
                        inference.confidence * 100.0
                    );
                    let unchanged = recorded.is_some_and(|r| {
                        r.status == Status::Partial
                            && r.attribute_str("partial_reason") == Some(reason.as_str())
                    });
                    if unchanged {
                        return RefreshEntry::unchanged(address, inference, "no change");
                    }
                    Mutation::MarkPartial {
                        address: address.clone(),
                        reason,
                    }
                }
                _ => return RefreshEntry::unchanged(address, inference, "no evidence found"),
            };

            RefreshEntry {
                address: address.clone(),
                inference,
                mutation: Some(mutation),
                note: None,
            }
        })
        .collect()
}
