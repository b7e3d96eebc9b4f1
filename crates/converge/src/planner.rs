//! Planner - compares a spec against recorded state and produces a plan

use crate::error::{ConvergeError, Result};
use crate::graph::DependencyGraph;
use crate::model::{Address, Resource, State, Status};
use crate::spec::{ResourceSpec, Spec};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// What a plan action would do to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    NoOp,
}

impl ActionKind {
    /// Marker used when rendering a plan
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared symbols and files not yet backed by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialDetail {
    pub missing_symbols: Vec<String>,
    pub missing_files: Vec<String>,
}

impl PartialDetail {
    pub fn is_empty(&self) -> bool {
        self.missing_symbols.is_empty() && self.missing_files.is_empty()
    }
}

impl fmt::Display for PartialDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing_symbols.is_empty() {
            parts.push(format!("missing symbols: {}", self.missing_symbols.join(", ")));
        }
        if !self.missing_files.is_empty() {
            parts.push(format!("missing files: {}", self.missing_files.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanAction {
    pub address: Address,
    pub kind: ActionKind,
    pub reason: String,
    pub dependencies: BTreeSet<Address>,
    /// Set on updates of implemented resources whose declaration is not fully matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialDetail>,
}

impl PlanAction {
    fn new(address: Address, kind: ActionKind, reason: impl Into<String>) -> Self {
        Self {
            address,
            kind,
            reason: reason.into(),
            dependencies: BTreeSet::new(),
            partial: None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.kind != ActionKind::NoOp
    }
}

/// Ordered set of actions that would bring state in line with the spec.
///
/// Derived and disposable: never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
    /// Weighted share of spec resources already converged, 0.0 - 100.0
    pub convergence: f64,
}

impl Plan {
    /// Actions that change something, in plan order
    pub fn actionable(&self) -> impl Iterator<Item = &PlanAction> {
        self.actions.iter().filter(|a| a.is_actionable())
    }

    pub fn has_changes(&self) -> bool {
        self.actionable().next().is_some()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    pub fn get(&self, address: &Address) -> Option<&PlanAction> {
        self.actions.iter().find(|a| &a.address == address)
    }

    /// Narrow the plan to a single address
    pub fn select(&self, address: &Address) -> Result<Self> {
        let action = self
            .get(address)
            .ok_or_else(|| ConvergeError::UnknownResource {
                address: address.clone(),
            })?;
        Ok(Self {
            actions: vec![action.clone()],
            convergence: self.convergence,
        })
    }

    /// One-line summary, e.g. "2 to create, 1 to update, 0 to delete"
    pub fn summary(&self) -> String {
        if !self.has_changes() {
            return "No changes. State matches spec.".to_string();
        }
        format!(
            "{} to create, {} to update, {} to delete",
            self.count(ActionKind::Create),
            self.count(ActionKind::Update),
            self.count(ActionKind::Delete)
        )
    }
}

/// Compute the plan for `spec` against `state`.
///
/// The spec's dependency graph is validated first; any dangling reference or
/// cycle aborts with every problem listed.
pub fn diff(spec: &Spec, state: &State) -> Result<Plan> {
    let graph = DependencyGraph::from_spec(spec);
    let errors = graph.validate();
    if !errors.is_empty() {
        return Err(ConvergeError::Dependency { errors });
    }

    let mut actions = Vec::with_capacity(spec.len());
    for address in graph.topological_order()? {
        let Some(declared) = spec.get(&address) else {
            continue;
        };
        let mut action = plan_resource(&address, declared, state.get(&address));
        action.dependencies = declared.depends_on.clone();
        actions.push(action);
    }

    for recorded in state.resources() {
        if spec.contains(&recorded.address) {
            continue;
        }
        let mut action = PlanAction::new(
            recorded.address.clone(),
            ActionKind::Delete,
            "present in state, not declared in spec",
        );
        action.dependencies = recorded.depends_on.clone();
        actions.push(action);
    }

    let plan = Plan {
        actions,
        convergence: convergence(spec, state),
    };
    log::debug!("Plan: {} ({:.1}% converged)", plan.summary(), plan.convergence);
    Ok(plan)
}

fn plan_resource(address: &Address, declared: &ResourceSpec, recorded: Option<&Resource>) -> PlanAction {
    let Some(recorded) = recorded else {
        return PlanAction::new(
            address.clone(),
            ActionKind::Create,
            "declared in spec, not present in state",
        );
    };

    match recorded.status {
        Status::Missing => PlanAction::new(address.clone(), ActionKind::Update, "recorded as missing"),
        Status::Partial => PlanAction::new(
            address.clone(),
            ActionKind::Update,
            recorded
                .attribute_str("partial_reason")
                .unwrap_or("partially implemented"),
        ),
        Status::Broken => PlanAction::new(
            address.clone(),
            ActionKind::Update,
            recorded
                .attribute_str("broken_reason")
                .unwrap_or("broken, needs fixing"),
        ),
        Status::Deprecated => PlanAction::new(address.clone(), ActionKind::NoOp, "deprecated"),
        Status::Implemented => {
            let detail = unmatched(declared, recorded);
            if detail.is_empty() {
                PlanAction::new(address.clone(), ActionKind::NoOp, "fully implemented")
            } else {
                let mut action = PlanAction::new(
                    address.clone(),
                    ActionKind::Update,
                    format!("implemented, but {detail}"),
                );
                action.partial = Some(detail);
                action
            }
        }
    }
}

/// Declared symbols and files that recorded state does not back
fn unmatched(declared: &ResourceSpec, recorded: &Resource) -> PartialDetail {
    let present = recorded.present_symbols();
    PartialDetail {
        missing_symbols: declared
            .symbols
            .iter()
            .filter(|s| !present.contains(s.as_str()))
            .cloned()
            .collect(),
        missing_files: declared
            .files
            .iter()
            .filter(|f| !recorded.files.contains(f))
            .cloned()
            .collect(),
    }
}

/// Weighted convergence over spec resources, rounded to one decimal.
///
/// Implemented and deprecated count 100, partial 50, anything else 0.
/// An empty spec is fully converged.
pub fn convergence(spec: &Spec, state: &State) -> f64 {
    if spec.is_empty() {
        return 100.0;
    }
    let total: f64 = spec
        .resources
        .keys()
        .map(|a| state.status_of(a).map_or(0.0, |s| s.convergence_weight()))
        .sum();
    let score = total / spec.len() as f64;
    (score * 10.0).round() / 10.0
}

/// An action whose dependency is not yet implemented
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedAction {
    pub address: Address,
    pub blocked_by: Address,
    /// `None` when the dependency is absent from state
    pub status: Option<Status>,
}

impl fmt::Display for BlockedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} blocked by {} ({status})", self.address, self.blocked_by),
            None => write!(f, "{} blocked by {} (not in state)", self.address, self.blocked_by),
        }
    }
}

/// List create/update actions whose dependencies are not implemented yet
pub fn check_dependencies(plan: &Plan, state: &State) -> Vec<BlockedAction> {
    plan.actionable()
        .filter(|a| matches!(a.kind, ActionKind::Create | ActionKind::Update))
        .flat_map(|action| {
            action.dependencies.iter().filter_map(move |dep| {
                let status = state.status_of(dep);
                (status != Some(Status::Implemented)).then(|| BlockedAction {
                    address: action.address.clone(),
                    blocked_by: dep.clone(),
                    status,
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mutation, SymbolPresence, SymbolStatus};
    use chrono::Utc;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn auth_spec() -> Spec {
        Spec::new()
            .with(addr("feature.auth_login"), ResourceSpec::new())
            .with(
                addr("feature.auth_refresh"),
                ResourceSpec::new().with_dependency(addr("feature.auth_login")),
            )
    }

    fn actionable(plan: &Plan) -> Vec<(ActionKind, String)> {
        plan.actionable()
            .map(|a| (a.kind, a.address.to_string()))
            .collect()
    }

    #[test]
    fn test_auth_scenario() {
        let spec = auth_spec();
        let mut state = State::new();

        let plan = diff(&spec, &state).unwrap();
        assert_eq!(
            actionable(&plan),
            vec![
                (ActionKind::Create, "feature.auth_login".to_string()),
                (ActionKind::Create, "feature.auth_refresh".to_string()),
            ]
        );
        assert!(plan.convergence.abs() < f64::EPSILON);
        assert_eq!(
            plan.actions[0].reason,
            "declared in spec, not present in state"
        );

        state
            .apply(&Mutation::created(addr("feature.auth_login"), vec![]), Utc::now())
            .unwrap();

        let plan = diff(&spec, &state).unwrap();
        assert!((plan.convergence - 50.0).abs() < f64::EPSILON);
        assert_eq!(
            actionable(&plan),
            vec![(ActionKind::Create, "feature.auth_refresh".to_string())]
        );
        // the converged resource stays in the plan as a no-op
        assert_eq!(plan.get(&addr("feature.auth_login")).unwrap().kind, ActionKind::NoOp);
    }

    #[test]
    fn test_dependencies_come_first_regardless_of_name() {
        let spec = Spec::new()
            .with(
                addr("feature.a_dependent"),
                ResourceSpec::new().with_dependency(addr("module.z_base")),
            )
            .with(addr("module.z_base"), ResourceSpec::new());
        let plan = diff(&spec, &State::new()).unwrap();
        let order: Vec<String> = plan.actions.iter().map(|a| a.address.to_string()).collect();
        assert_eq!(order, vec!["module.z_base", "feature.a_dependent"]);
    }

    #[test]
    fn test_partial_and_broken_use_stored_reason() {
        let spec = Spec::new()
            .with(addr("feature.a"), ResourceSpec::new())
            .with(addr("feature.b"), ResourceSpec::new());
        let mut state = State::new();
        let now = Utc::now();
        state
            .apply(
                &Mutation::MarkPartial {
                    address: addr("feature.a"),
                    reason: "missing tests".into(),
                },
                now,
            )
            .unwrap();
        state
            .apply(
                &Mutation::MarkBroken {
                    address: addr("feature.b"),
                    reason: String::new(),
                },
                now,
            )
            .unwrap();

        let plan = diff(&spec, &state).unwrap();
        let a = plan.get(&addr("feature.a")).unwrap();
        assert_eq!(a.kind, ActionKind::Update);
        assert_eq!(a.reason, "missing tests");
        let b = plan.get(&addr("feature.b")).unwrap();
        assert_eq!(b.reason, "broken, needs fixing");
        assert!((plan.convergence - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_implemented_with_missing_symbols_is_partial_update() {
        let spec = Spec::new().with(
            addr("feature.login"),
            ResourceSpec::new()
                .with_file("src/login.rs")
                .with_file("src/session.rs")
                .with_symbol("login")
                .with_symbol("logout"),
        );
        let mut state = State::new();
        let mut symbols = std::collections::BTreeMap::new();
        symbols.insert(
            "login".to_string(),
            SymbolStatus {
                kind: "function".into(),
                status: SymbolPresence::Implemented,
                location: None,
            },
        );
        symbols.insert(
            "logout".to_string(),
            SymbolStatus {
                kind: "function".into(),
                status: SymbolPresence::Missing,
                location: None,
            },
        );
        state
            .apply(
                &Mutation::MarkCreated {
                    address: addr("feature.login"),
                    files: vec!["src/login.rs".into()],
                    symbols,
                    depends_on: BTreeSet::new(),
                    agent: None,
                },
                Utc::now(),
            )
            .unwrap();

        let plan = diff(&spec, &state).unwrap();
        let action = &plan.actions[0];
        assert_eq!(action.kind, ActionKind::Update);
        let detail = action.partial.as_ref().unwrap();
        assert_eq!(detail.missing_symbols, vec!["logout".to_string()]);
        assert_eq!(detail.missing_files, vec!["src/session.rs".to_string()]);
        assert!(action.reason.contains("missing symbols: logout"));
    }

    #[test]
    fn test_deprecated_is_noop_and_counts_as_converged() {
        let spec = Spec::new().with(addr("feature.old"), ResourceSpec::new());
        let mut state = State::new();
        let mut resource = Resource::new(addr("feature.old"));
        resource.status = Status::Deprecated;
        state.insert(resource);

        let plan = diff(&spec, &state).unwrap();
        assert!(!plan.has_changes());
        assert!((plan.convergence - 100.0).abs() < f64::EPSILON);
        assert_eq!(plan.summary(), "No changes. State matches spec.");
    }

    #[test]
    fn test_undeclared_state_resources_become_deletes_last() {
        let spec = Spec::new().with(addr("feature.kept"), ResourceSpec::new());
        let mut state = State::new();
        let now = Utc::now();
        state
            .apply(&Mutation::created(addr("feature.gone"), vec![]), now)
            .unwrap();
        state
            .apply(&Mutation::created(addr("api.gone"), vec![]), now)
            .unwrap();

        let plan = diff(&spec, &state).unwrap();
        assert_eq!(
            actionable(&plan),
            vec![
                (ActionKind::Create, "feature.kept".to_string()),
                (ActionKind::Delete, "api.gone".to_string()),
                (ActionKind::Delete, "feature.gone".to_string()),
            ]
        );
        assert_eq!(plan.summary(), "1 to create, 0 to update, 2 to delete");
    }

    #[test]
    fn test_invalid_graph_aborts_planning() {
        let spec = Spec::new()
            .with(
                addr("feature.a"),
                ResourceSpec::new().with_dependency(addr("feature.b")),
            )
            .with(
                addr("feature.b"),
                ResourceSpec::new().with_dependency(addr("feature.a")),
            )
            .with(
                addr("feature.c"),
                ResourceSpec::new().with_dependency(addr("feature.ghost")),
            );
        match diff(&spec, &State::new()) {
            Err(ConvergeError::Dependency { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected dependency error, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_inputs_identical_plans() {
        let spec = auth_spec();
        let state = State::new();
        assert_eq!(diff(&spec, &state).unwrap(), diff(&spec, &state).unwrap());
    }

    #[test]
    fn test_empty_spec_is_fully_converged() {
        assert!((convergence(&Spec::new(), &State::new()) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_convergence_rounds_to_one_decimal() {
        let spec = Spec::new()
            .with(addr("feature.a"), ResourceSpec::new())
            .with(addr("feature.b"), ResourceSpec::new())
            .with(addr("feature.c"), ResourceSpec::new());
        let mut state = State::new();
        state
            .apply(&Mutation::created(addr("feature.a"), vec![]), Utc::now())
            .unwrap();
        assert!((convergence(&spec, &state) - 33.3).abs() < 1e-9);
    }

    #[test]
    fn test_check_dependencies_reports_blocked() {
        let spec = auth_spec();
        let state = State::new();
        let plan = diff(&spec, &state).unwrap();
        let blocked = check_dependencies(&plan, &state);
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].address, addr("feature.auth_refresh"));
        assert_eq!(blocked[0].blocked_by, addr("feature.auth_login"));
        assert_eq!(blocked[0].status, None);
    }

    #[test]
    fn test_select_single_action() {
        let plan = diff(&auth_spec(), &State::new()).unwrap();
        let single = plan.select(&addr("feature.auth_refresh")).unwrap();
        assert_eq!(single.actions.len(), 1);
        assert!(plan.select(&addr("feature.nope")).is_err());
    }
}
