//! Driver capability traits and the problem definitions drivers own.

use mf_core::VarMeta;
use mf_expr::{Expression, RelOp, Relation};
use mf_system::{ExecutionPlan, ParamConstraint, RunContext};
use tracing::info;

use crate::error::{SolverError, SolverResult};

/// A driver-controlled input.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub target: String,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl Parameter {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            low: None,
            high: None,
        }
    }

    pub fn with_bounds(mut self, low: f64, high: f64) -> Self {
        self.low = Some(low);
        self.high = Some(high);
        self
    }

    /// Bounds after falling back to the target's declared `low`/`high`.
    ///
    /// A supplied bound may tighten the declared range but never widen it.
    pub fn resolved_bounds(&self, meta: &VarMeta) -> SolverResult<(Option<f64>, Option<f64>)> {
        let target = &self.target;
        let low = match (self.low, meta.low) {
            (Some(l), Some(ml)) if l < ml => {
                return Err(SolverError::config(format!(
                    "parameter '{target}': lower limit {l} is below the variable's lower limit {ml}"
                )));
            }
            (Some(l), _) => Some(l),
            (None, ml) => ml,
        };
        let high = match (self.high, meta.high) {
            (Some(h), Some(mh)) if h > mh => {
                return Err(SolverError::config(format!(
                    "parameter '{target}': upper limit {h} is above the variable's upper limit {mh}"
                )));
            }
            (Some(h), _) => Some(h),
            (None, mh) => mh,
        };
        if let (Some(l), Some(h)) = (low, high)
            && l > h
        {
            return Err(SolverError::config(format!(
                "parameter '{target}': lower limit {l} exceeds upper limit {h}"
            )));
        }
        Ok((low, high))
    }
}

/// Slack allowed when testing an equality relation.
pub const EQ_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub lhs: Expression,
    pub relation: RelOp,
    pub rhs: Expression,
}

impl Constraint {
    /// Parse `"a = b"`, `"a < b"` or `"a > b"`.
    pub fn parse(text: &str) -> SolverResult<Self> {
        let rel = Relation::parse(text)?;
        Ok(Self {
            lhs: rel.lhs,
            relation: rel.op,
            rhs: rel.rhs,
        })
    }

    pub fn text(&self) -> String {
        format!("{} {} {}", self.lhs.text(), self.relation.symbol(), self.rhs.text())
    }

    /// Whether the relation holds at the plan's current point. Equality
    /// allows a relative slack of [`EQ_TOLERANCE`].
    pub fn holds(&self, plan: &ExecutionPlan) -> SolverResult<bool> {
        let l = plan.evaluate(&self.lhs)?;
        let r = plan.evaluate(&self.rhs)?;
        Ok(match self.relation {
            RelOp::Lt => l < r,
            RelOp::Gt => l > r,
            RelOp::Eq => (l - r).abs() <= EQ_TOLERANCE * (1.0 + r.abs()),
        })
    }

    pub fn referenced_varpaths(&self) -> Vec<String> {
        let mut v = self.lhs.referenced_varpaths();
        for r in self.rhs.referenced_varpaths() {
            if !v.contains(&r) {
                v.push(r);
            }
        }
        v
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub expr: Expression,
}

impl Objective {
    pub fn parse(text: &str) -> SolverResult<Self> {
        Ok(Self {
            expr: Expression::parse(text)?,
        })
    }
}

pub trait HasParameters {
    fn parameters(&self) -> &[Parameter];

    fn add_parameter(&mut self, param: Parameter) -> SolverResult<()>;

    fn clear_parameters(&mut self);
}

pub trait HasEqConstraints {
    fn eq_constraints(&self) -> &[Constraint];

    fn add_constraint(&mut self, text: &str) -> SolverResult<()>;

    fn clear_constraints(&mut self);
}

pub trait HasObjectives {
    fn objectives(&self) -> &[Objective];

    fn add_objective(&mut self, text: &str) -> SolverResult<()>;
}

/// Relations that end iteration as soon as any of them holds.
pub trait HasStopConditions {
    fn stop_conditions(&self) -> &[Constraint];

    fn add_stop_condition(&mut self, text: &str) -> SolverResult<()>;

    fn clear_stop_conditions(&mut self);

    fn should_stop(&self, plan: &ExecutionPlan) -> SolverResult<bool> {
        for c in self.stop_conditions() {
            if c.holds(plan)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// What the model knows about the driver's workflow before it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowInfo {
    /// The workflow's components form at least one true cycle.
    pub has_cycle: bool,
    /// Some workflow component declares implicit states.
    pub has_states: bool,
}

/// Outcome of one driver execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    pub converged: bool,
    pub iterations: usize,
    pub residual_norm: f64,
    /// Residual norm after every pass.
    pub history: Vec<f64>,
}

impl SolveReport {
    /// Turn non-convergence into an error when `strict` is set.
    pub fn into_result(self, strict: bool, what: &str) -> SolverResult<SolveReport> {
        if strict && !self.converged {
            return Err(SolverError::Divergence {
                what: what.to_string(),
                iterations: self.iterations,
                residual_norm: self.residual_norm,
            });
        }
        Ok(self)
    }
}

/// A driver: iterates its workflow over an execution plan.
///
/// Capabilities beyond running are exposed through the `as_*` accessors,
/// so callers never need to know the concrete driver type.
pub trait Driver: Send {
    fn kind(&self) -> &'static str;

    /// Components the driver iterates, in preferred order. `None` means all.
    fn workflow(&self) -> Option<&[String]>;

    fn as_parameters(&self) -> Option<&dyn HasParameters> {
        None
    }

    fn as_eq_constraints(&self) -> Option<&dyn HasEqConstraints> {
        None
    }

    fn as_objectives(&self) -> Option<&dyn HasObjectives> {
        None
    }

    fn as_stop_conditions(&self) -> Option<&dyn HasStopConditions> {
        None
    }

    fn check_config(&self, _info: &WorkflowInfo) -> SolverResult<()> {
        Ok(())
    }

    fn execute(&mut self, plan: &mut ExecutionPlan, ctx: &RunContext<'_>) -> SolverResult<SolveReport>;
}

pub(crate) fn add_unique_parameter(params: &mut Vec<Parameter>, param: Parameter) -> SolverResult<()> {
    if params.iter().any(|p| p.target == param.target) {
        return Err(SolverError::config(format!(
            "'{}' is already a parameter",
            param.target
        )));
    }
    params.push(param);
    Ok(())
}

pub(crate) fn add_eq_constraint(constraints: &mut Vec<Constraint>, text: &str) -> SolverResult<()> {
    let c = Constraint::parse(text)?;
    if c.relation != RelOp::Eq {
        return Err(SolverError::config(format!("'{text}' is not an equality constraint")));
    }
    constraints.push(c);
    Ok(())
}

/// Parameters and constraints must balance, and there must be something
/// to iterate on: pairs, a true cycle, or implicit states.
pub(crate) fn check_pairs(driver: &str, params: usize, constraints: usize, info: &WorkflowInfo) -> SolverResult<()> {
    if params != constraints {
        return Err(SolverError::config(format!(
            "{driver}: {params} parameters but {constraints} equality constraints"
        )));
    }
    if params == 0 && !info.has_cycle && !info.has_states {
        return Err(SolverError::config(format!(
            "{driver}: workflow has no cycle, no states and no parameter/constraint pairs to iterate"
        )));
    }
    Ok(())
}

/// Pair the driver's parameters with its equality constraints by order.
///
/// The side of each constraint that mentions the parameter becomes its
/// parameter side; otherwise the left-hand side does.
pub fn param_constraints(driver: &dyn Driver) -> Vec<ParamConstraint> {
    let (Some(params), Some(cons)) = (driver.as_parameters(), driver.as_eq_constraints()) else {
        return Vec::new();
    };
    params
        .parameters()
        .iter()
        .zip(cons.eq_constraints())
        .map(|(p, c)| {
            let (param_side, other) = if !c.lhs.refers_to(&p.target) && c.rhs.refers_to(&p.target) {
                (c.rhs.clone(), c.lhs.clone())
            } else {
                (c.lhs.clone(), c.rhs.clone())
            };
            ParamConstraint {
                target: p.target.clone(),
                param_side,
                other,
            }
        })
        .collect()
}

/// Plain single pass over the workflow.
#[derive(Debug, Clone, Default)]
pub struct RunOnce {
    workflow: Option<Vec<String>>,
    objectives: Vec<Objective>,
}

impl RunOnce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow(mut self, comps: &[&str]) -> Self {
        self.workflow = Some(comps.iter().map(|c| c.to_string()).collect());
        self
    }
}

impl HasObjectives for RunOnce {
    fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    fn add_objective(&mut self, text: &str) -> SolverResult<()> {
        self.objectives.push(Objective::parse(text)?);
        Ok(())
    }
}

impl Driver for RunOnce {
    fn kind(&self) -> &'static str {
        "run_once"
    }

    fn workflow(&self) -> Option<&[String]> {
        self.workflow.as_deref()
    }

    fn as_objectives(&self) -> Option<&dyn HasObjectives> {
        Some(self)
    }

    fn execute(&mut self, plan: &mut ExecutionPlan, ctx: &RunContext<'_>) -> SolverResult<SolveReport> {
        plan.run(ctx)?;
        let norm = plan.residual_norm(mf_core::NormKind::Infinity);
        info!(residual = norm, "single pass finished");
        Ok(SolveReport {
            converged: true,
            iterations: 1,
            residual_norm: norm,
            history: vec![norm],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Paired {
        params: Vec<Parameter>,
        cons: Vec<Constraint>,
    }

    impl HasParameters for Paired {
        fn parameters(&self) -> &[Parameter] {
            &self.params
        }
        fn add_parameter(&mut self, param: Parameter) -> SolverResult<()> {
            add_unique_parameter(&mut self.params, param)
        }
        fn clear_parameters(&mut self) {
            self.params.clear();
        }
    }

    impl HasEqConstraints for Paired {
        fn eq_constraints(&self) -> &[Constraint] {
            &self.cons
        }
        fn add_constraint(&mut self, text: &str) -> SolverResult<()> {
            add_eq_constraint(&mut self.cons, text)
        }
        fn clear_constraints(&mut self) {
            self.cons.clear();
        }
    }

    impl Driver for Paired {
        fn kind(&self) -> &'static str {
            "paired"
        }
        fn workflow(&self) -> Option<&[String]> {
            None
        }
        fn as_parameters(&self) -> Option<&dyn HasParameters> {
            Some(self)
        }
        fn as_eq_constraints(&self) -> Option<&dyn HasEqConstraints> {
            Some(self)
        }
        fn execute(&mut self, _: &mut ExecutionPlan, _: &RunContext<'_>) -> SolverResult<SolveReport> {
            Ok(SolveReport {
                converged: true,
                iterations: 0,
                residual_norm: 0.0,
                history: vec![],
            })
        }
    }

    #[test]
    fn parameter_side_follows_the_target() {
        let mut d = Paired {
            params: vec![],
            cons: vec![],
        };
        d.add_parameter(Parameter::new("d1.y2")).unwrap();
        d.add_parameter(Parameter::new("a.x")).unwrap();
        d.add_constraint("d2.y2 = d1.y2").unwrap();
        d.add_constraint("a.x = 2*b.y").unwrap();
        let pairs = param_constraints(&d);
        assert_eq!(pairs[0].param_side.text(), "d1.y2");
        assert_eq!(pairs[0].other.text(), "d2.y2");
        assert_eq!(pairs[1].param_side.text(), "a.x");
    }

    #[test]
    fn duplicate_parameter_and_inequality_are_rejected() {
        let mut d = Paired {
            params: vec![],
            cons: vec![],
        };
        d.add_parameter(Parameter::new("x")).unwrap();
        assert!(matches!(
            d.add_parameter(Parameter::new("x")),
            Err(SolverError::Configuration { .. })
        ));
        assert!(matches!(
            d.add_constraint("x < 3"),
            Err(SolverError::Configuration { .. })
        ));
    }

    #[test]
    fn pairs_must_balance_or_a_cycle_must_exist() {
        let cyclic = WorkflowInfo {
            has_cycle: true,
            ..Default::default()
        };
        let implicit = WorkflowInfo {
            has_states: true,
            ..Default::default()
        };
        let acyclic = WorkflowInfo::default();
        assert!(check_pairs("fp", 1, 1, &acyclic).is_ok());
        assert!(check_pairs("fp", 0, 0, &implicit).is_ok());
        assert!(check_pairs("fp", 0, 0, &cyclic).is_ok());
        assert!(check_pairs("fp", 0, 0, &acyclic).is_err());
        assert!(check_pairs("fp", 2, 1, &cyclic).is_err());
    }

    #[test]
    fn strict_report_becomes_divergence() {
        let report = SolveReport {
            converged: false,
            iterations: 25,
            residual_norm: 0.5,
            history: vec![],
        };
        assert!(report.clone().into_result(false, "fixed point").is_ok());
        match report.into_result(true, "fixed point") {
            Err(SolverError::Divergence { iterations, .. }) => assert_eq!(iterations, 25),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parameter_bounds_default_to_and_stay_within_metadata() {
        let meta = VarMeta::input("x").with_bounds(-5.0, 5.0);
        let p = Parameter::new("c.x");
        assert_eq!(p.resolved_bounds(&meta).unwrap(), (Some(-5.0), Some(5.0)));

        let tighter = Parameter::new("c.x").with_bounds(-1.0, 2.0);
        assert_eq!(tighter.resolved_bounds(&meta).unwrap(), (Some(-1.0), Some(2.0)));

        let too_low = Parameter::new("c.x").with_bounds(-10.0, 2.0);
        let err = too_low.resolved_bounds(&meta).unwrap_err();
        assert!(matches!(err, SolverError::Configuration { .. }));
        assert!(err.to_string().contains("lower limit -10"), "{err}");

        let too_high = Parameter::new("c.x").with_bounds(0.0, 6.0);
        assert!(too_high.resolved_bounds(&meta).is_err());

        let inverted = Parameter::new("c.y").with_bounds(3.0, 1.0);
        assert!(inverted.resolved_bounds(&VarMeta::input("y")).is_err());
        assert_eq!(
            Parameter::new("c.y").resolved_bounds(&VarMeta::input("y")).unwrap(),
            (None, None)
        );
    }
}
