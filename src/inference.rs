//! Regex-based symbol inference
//!
//! Looks for definitions of each declared symbol inside the resource's
//! declared files. Cheap and language-agnostic; good enough to tell a stub
//! from an implementation, not to judge correctness.

use anyhow::{Context, Result};
use converge::model::SymbolLocation;
use converge::{Address, Inference, InferenceProvider, ResourceSpec, SymbolPresence, SymbolStatus};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Definition keywords across the languages we commonly see
const KEYWORDS: &str = r"fn|def|class|struct|enum|trait|interface|function|type|const";

pub struct RegexInference;

impl RegexInference {
    fn pattern(symbol: &str) -> Result<Regex> {
        // `Class.method` is looked up by its last segment
        let name = symbol.rsplit(['.', ':']).next().unwrap_or(symbol);
        Regex::new(&format!(
            r"(?m)^[ \t]*(?:(?:pub(?:\([^)]*\))?|export|async|static|public|private)[ \t]+)*({KEYWORDS})[ \t]+{}\b",
            regex::escape(name)
        ))
        .with_context(|| format!("Invalid symbol name: {symbol}"))
    }

    fn locate(pattern: &Regex, file: &str, content: &str) -> Option<(String, SymbolLocation)> {
        let found = pattern.captures(content)?;
        let keyword = found.get(1)?.as_str();
        let offset = found.get(0)?.start();
        // matches always start at a line start
        let line = u32::try_from(content[..offset].matches('\n').count() + 1).unwrap_or(u32::MAX);
        Some((
            symbol_kind(keyword).to_string(),
            SymbolLocation {
                file: file.to_string(),
                line_start: line,
                line_end: line,
            },
        ))
    }
}

fn symbol_kind(keyword: &str) -> &str {
    match keyword {
        "fn" | "def" | "function" => "function",
        "class" | "struct" | "interface" => "class",
        other => other,
    }
}

impl InferenceProvider for RegexInference {
    fn name(&self) -> &str {
        "regex"
    }

    fn infer(&self, address: &Address, resource: &ResourceSpec, root: &Path) -> Result<Inference> {
        let sources: Vec<(String, String)> = resource
            .files
            .iter()
            .filter_map(|file| {
                fs::read_to_string(root.join(file))
                    .ok()
                    .map(|content| (file.clone(), content))
            })
            .collect();

        if resource.symbols.is_empty() {
            // nothing to look for: judge by the declared files existing
            let confidence = if resource.files.is_empty() {
                0.0
            } else {
                sources.len() as f64 / resource.files.len() as f64
            };
            let mut inference = Inference::from_confidence(self.name(), confidence);
            inference.evidence = sources
                .iter()
                .map(|(file, _)| format!("{file} exists"))
                .collect();
            inference.files = sources.into_iter().map(|(file, _)| file).collect();
            return Ok(inference);
        }

        let mut symbols = std::collections::BTreeMap::new();
        let mut evidence = Vec::new();
        for symbol in &resource.symbols {
            let pattern = Self::pattern(symbol)?;
            let hit = sources
                .iter()
                .find_map(|(file, content)| Self::locate(&pattern, file, content));
            let status = match hit {
                Some((kind, location)) => {
                    evidence.push(format!(
                        "found {kind} {symbol} in {}:{}",
                        location.file, location.line_start
                    ));
                    SymbolStatus {
                        kind,
                        status: SymbolPresence::Implemented,
                        location: Some(location),
                    }
                }
                None => SymbolStatus {
                    kind: "unknown".to_string(),
                    status: SymbolPresence::Missing,
                    location: None,
                },
            };
            symbols.insert(symbol.clone(), status);
        }

        let found = symbols.values().filter(|s| s.is_present()).count();
        let confidence = found as f64 / symbols.len() as f64;
        log::debug!(
            "{address}: {found}/{} symbols found in {} files",
            symbols.len(),
            sources.len()
        );

        let mut inference = Inference::from_confidence(self.name(), confidence);
        inference.symbols = symbols;
        inference.files = sources.into_iter().map(|(file, _)| file).collect();
        inference.evidence = evidence;
        Ok(inference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::Status;

    fn resource(files: &[&str], symbols: &[&str]) -> ResourceSpec {
        ResourceSpec {
            files: files.iter().map(|f| (*f).to_string()).collect(),
            symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
            ..ResourceSpec::default()
        }
    }

    fn address() -> Address {
        "feature.auth".parse().unwrap()
    }

    #[test]
    fn test_finds_symbols_across_languages() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("auth.rs"),
            "use std::io;\n\npub async fn login() {}\npub(crate) struct Session;\n",
        )
        .unwrap();
        fs::write(dir.path().join("util.py"), "class Token:\n    def refresh(self):\n        pass\n").unwrap();

        let inference = RegexInference
            .infer(
                &address(),
                &resource(&["auth.rs", "util.py"], &["login", "Session", "Token.refresh"]),
                dir.path(),
            )
            .unwrap();

        assert!((inference.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(inference.status, Status::Implemented);
        let login = &inference.symbols["login"];
        assert_eq!(login.kind, "function");
        assert_eq!(login.location.as_ref().unwrap().line_start, 3);
        assert_eq!(inference.symbols["Session"].kind, "class");
        assert_eq!(
            inference.symbols["Token.refresh"].location.as_ref().unwrap().file,
            "util.py"
        );
    }

    #[test]
    fn test_missing_symbols_lower_confidence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("auth.rs"), "fn login() {}\n// fn logout is todo\n").unwrap();

        let inference = RegexInference
            .infer(&address(), &resource(&["auth.rs"], &["login", "logout"]), dir.path())
            .unwrap();

        assert!((inference.confidence - 0.5).abs() < f64::EPSILON);
        assert!(!inference.is_confident());
        assert_eq!(
            inference.missing_symbols(&["login".to_string(), "logout".to_string()]),
            vec!["logout".to_string()]
        );
    }

    #[test]
    fn test_prefix_is_not_a_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("auth.rs"), "fn login_user() {}\n").unwrap();

        let inference = RegexInference
            .infer(&address(), &resource(&["auth.rs"], &["login"]), dir.path())
            .unwrap();
        assert!(!inference.symbols["login"].is_present());
    }

    #[test]
    fn test_no_symbols_judges_by_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "").unwrap();

        let inference = RegexInference
            .infer(&address(), &resource(&["a.rs", "b.rs"], &[]), dir.path())
            .unwrap();
        assert!((inference.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(inference.evidence, vec!["a.rs exists".to_string()]);
        assert_eq!(inference.files, vec!["a.rs".to_string()]);
    }
}
