//! Inference interface: confidence-scored implementation status from code.
//!
//! The engine does no code analysis itself. Providers are ranked; the chain
//! accepts the first confident answer and otherwise keeps the best one seen.

use crate::model::{Address, Status, SymbolStatus};
use crate::spec::ResourceSpec;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// Confidence at or above which an inference is accepted without asking further
pub const CONFIDENT: f64 = 0.7;

/// A provider's verdict about one resource
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub status: Status,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub symbols: BTreeMap<String, SymbolStatus>,
    /// Files that were found and scanned
    pub files: Vec<String>,
    /// Human-readable findings ("found fn login in src/auth.rs")
    pub evidence: Vec<String>,
    pub provider: String,
}

impl Inference {
    /// Build from a confidence, deriving the status
    pub fn from_confidence(provider: impl Into<String>, confidence: f64) -> Self {
        Self {
            status: Status::from_confidence(confidence),
            confidence,
            symbols: BTreeMap::new(),
            files: Vec::new(),
            evidence: Vec::new(),
            provider: provider.into(),
        }
    }

    pub fn is_confident(&self) -> bool {
        self.confidence >= CONFIDENT
    }

    /// Names among `names` that were not found
    pub fn missing_symbols<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| !self.symbols.get(*name).is_some_and(SymbolStatus::is_present))
            .cloned()
            .collect()
    }
}

/// Something that can judge whether a resource is implemented
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn infer(&self, address: &Address, resource: &ResourceSpec, root: &Path) -> Result<Inference>;
}

/// Ranked providers behind one interface
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Box<dyn InferenceProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl InferenceProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl InferenceProvider for ProviderChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn infer(&self, address: &Address, resource: &ResourceSpec, root: &Path) -> Result<Inference> {
        let mut best: Option<Inference> = None;

        for provider in &self.providers {
            match provider.infer(address, resource, root) {
                Ok(inference) if inference.is_confident() => {
                    log::debug!(
                        "{} inferred {} for {} ({:.2})",
                        provider.name(),
                        inference.status,
                        address,
                        inference.confidence
                    );
                    return Ok(inference);
                }
                Ok(inference) => {
                    if best
                        .as_ref()
                        .is_none_or(|b| inference.confidence > b.confidence)
                    {
                        best = Some(inference);
                    }
                }
                Err(e) => {
                    log::debug!("Inference provider {} failed for {address}: {e}", provider.name());
                }
            }
        }

        Ok(best.unwrap_or_else(|| Inference::from_confidence(self.name(), 0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, f64);

    impl InferenceProvider for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn infer(&self, _: &Address, _: &ResourceSpec, _: &Path) -> Result<Inference> {
            Ok(Inference::from_confidence(self.0, self.1))
        }
    }

    struct Broken;

    impl InferenceProvider for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn infer(&self, _: &Address, _: &ResourceSpec, _: &Path) -> Result<Inference> {
            anyhow::bail!("parser unavailable")
        }
    }

    fn run(chain: &ProviderChain) -> Inference {
        chain
            .infer(
                &"feature.a".parse().unwrap(),
                &ResourceSpec::new(),
                Path::new("."),
            )
            .unwrap()
    }

    #[test]
    fn test_first_confident_provider_wins() {
        let chain = ProviderChain::new()
            .with(Broken)
            .with(Fixed("ast", 0.9))
            .with(Fixed("regex", 1.0));
        let result = run(&chain);
        assert_eq!(result.provider, "ast");
        assert_eq!(result.status, Status::Implemented);
    }

    #[test]
    fn test_best_unconfident_result_is_kept() {
        let chain = ProviderChain::new()
            .with(Fixed("ast", 0.4))
            .with(Fixed("regex", 0.5))
            .with(Fixed("heuristic", 0.1));
        let result = run(&chain);
        assert_eq!(result.provider, "regex");
        assert_eq!(result.status, Status::Partial);
    }

    #[test]
    fn test_empty_chain_reports_missing() {
        let result = run(&ProviderChain::new());
        assert_eq!(result.status, Status::Missing);
        assert!(result.confidence.abs() < f64::EPSILON);
    }
}
