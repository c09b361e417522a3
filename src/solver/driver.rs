//! Main iteration driver
//!
//! Runs the outer trust-region loop: evaluate the model, build the weighted
//! Jacobians, obtain a step from the trust-region controller, test the
//! trial point, update the region, check the convergence criteria. The
//! implicit-model continuation and the restart logic wrap the same loop.

use nalgebra::{DMatrix, DVector};

use super::log::SolverLog;
use super::parameters::{CovarianceMode, RegressionMode, SolverParameters};
use super::problem::OdrProblem;
use super::state::{SolverState, TrialBuffers};
use super::step::{covariance_factor, StepContext};
use super::trust_region::{find_step, StepKind};
use crate::errors::{assemble_info, ConvergenceKind, EvalPhase, FitError, Warning};
use crate::jacobian::{
    self, check_derivatives, estimate_function_precision, EngineError, JacobianMethod,
    JacobianRequest, JacobianScratch, Jacobians,
};
use crate::model::{ModelStop, OdrModel};
use crate::scaling;
use crate::weights::{factor_delta_weights, factor_response_weights, ResponseWeights};

/// Cap on consecutive rejected steps before the iteration gives up
const MAX_SUB_ITERATIONS: usize = 100;
/// Acceptance threshold on the gain ratio
const ACCEPT_RATIO: f64 = 1.0e-4;
/// Scoring of a trial point the model refused to evaluate
const RETREAT_SHRINK: f64 = 0.075;
/// Implicit continuation: growth factor and ceiling of the penalty
const PENALTY_FACTOR: f64 = 10.0;
const PENALTY_CEILING: f64 = 1000.0;

/// Final account of a fit
#[derive(Debug)]
pub struct FitReport {
    pub beta: DVector<f64>,
    pub delta: DMatrix<f64>,
    /// Packed diagnostic (stop digit plus warning flags)
    pub info: i32,
    pub convergence: ConvergenceKind,
    pub warnings: Vec<Warning>,
    /// `√S` at the solution, delta penalty included
    pub rnorm: f64,
    pub niter: usize,
    pub nfev: usize,
    pub njev: usize,
    pub irank: usize,
    pub rcond: f64,
    /// Estimated parameters the rank determination pivoted out
    pub beta_fixed_by_pivot: Vec<bool>,
    /// Derivative-check codes, when a check ran
    pub msgb: Option<Vec<i8>>,
    pub msgd: Option<Vec<i8>>,
}

/// Metrics of the step that ended one outer iteration
struct AcceptedStep {
    actred: f64,
    prered: f64,
    ratio: f64,
    alpha: f64,
    kind: StepKind,
    irank: usize,
    rcond: f64,
    pivot: Vec<usize>,
}

/// Result of one outer iteration
enum IterationOutcome {
    Accepted(AcceptedStep),
    /// Every trial was rejected and the shrinking region fell below the
    /// parameter tolerance; the committed state is untouched
    RegionCollapsed,
}

/// Orthogonal distance regression solver
///
/// Owns the problem data, the resolution parameters and, once a solve has
/// started, the full iteration state. The state survives the call: a
/// cancelled or stopped fit leaves the last accepted iterate inspectable
/// through [`OdrSolver::state`], and a solve with the restart flag set
/// continues from it with a fresh iteration budget.
pub struct OdrSolver {
    problem: OdrProblem,
    parameters: SolverParameters,
    initial_beta: DVector<f64>,
    state: Option<SolverState>,
    log: Option<SolverLog>,
    outcome: Option<ConvergenceKind>,
}

impl OdrSolver {
    pub fn new(problem: OdrProblem, parameters: SolverParameters, initial_beta: DVector<f64>) -> Self {
        OdrSolver {
            problem,
            parameters,
            initial_beta,
            state: None,
            log: None,
            outcome: None,
        }
    }

    /// Activate the gathering of the log
    ///
    /// The path must be provided (as .txt file). This generates a .txt file
    /// at the given path with fit informations.
    pub fn activate_debug(&mut self, path: &str) {
        self.log = Some(SolverLog::new(path));
    }

    pub fn get_parameters(&self) -> &SolverParameters {
        &self.parameters
    }

    /// Replace the resolution parameters, e.g. to raise the iteration
    /// budget and set the restart flag before resuming
    pub fn set_parameters(&mut self, parameters: SolverParameters) {
        self.parameters = parameters;
    }

    /// The iteration state, available after a solve started (also after a
    /// failure, holding the last accepted iterate)
    pub fn state(&self) -> Option<&SolverState> {
        self.state.as_ref()
    }

    /// The core function performing the fit on a given model
    pub fn solve<M: OdrModel>(&mut self, model: &mut M) -> Result<FitReport, FitError> {
        if self.parameters.get_jacobian_method().is_analytic() && !model.jacobian_provided() {
            panic!("analytic Jacobians requested but the model does not provide them");
        }

        let restart = self.parameters.get_restart() && self.state.is_some();
        if !restart {
            self.initialize(model)?;
        }

        if let Some(log) = &self.log {
            log.add_parameters(&self.parameters.to_string());
        }

        let outcome = match self.parameters.get_mode() {
            RegressionMode::Implicit => self.solve_implicit(model)?,
            _ => self.run_outer(model, self.parameters.get_maxit())?,
        };

        self.prepare_covariance(model);
        self.outcome = Some(outcome);
        Ok(self.build_report(outcome))
    }

    /// Report of the last successful solve, rebuilt from the saved state
    pub fn report(&self) -> Option<FitReport> {
        self.outcome.map(|outcome| self.build_report(outcome))
    }

    // ----- initialization ------------------------------------------------

    fn initialize<M: OdrModel>(&mut self, model: &mut M) -> Result<(), FitError> {
        let n = self.problem.n();
        let m = self.problem.m();
        let np = model.len_beta();
        let nq = model.len_response();
        let mode = self.parameters.get_mode();
        let ols = mode == RegressionMode::OrdinaryLeastSquares;
        let implicit = mode == RegressionMode::Implicit;

        if n == 0 || m == 0 || np == 0 || nq == 0 {
            let code = 10000
                + if n == 0 { 1000 } else { 0 }
                + if m == 0 { 100 } else { 0 }
                + if np == 0 { 10 } else { 0 }
                + if nq == 0 { 1 } else { 0 };
            return Err(FitError::InvalidDimensions {
                code,
                details: format!("n = {}, m = {}, np = {}, nq = {}", n, m, np, nq),
            });
        }

        if self.initial_beta.len() != np {
            return Err(FitError::InvalidShape {
                code: 20001,
                details: format!(
                    "initial beta has length {}, the model announces np = {}",
                    self.initial_beta.len(),
                    np
                ),
            });
        }

        if !implicit {
            match self.problem.get_y() {
                Some(y) if y.nrows() == n && y.ncols() == nq => {}
                Some(y) => {
                    return Err(FitError::InvalidShape {
                        code: 20001,
                        details: format!(
                            "y is {} x {}, expected {} x {}",
                            y.nrows(),
                            y.ncols(),
                            n,
                            nq
                        ),
                    })
                }
                None => {
                    return Err(FitError::InvalidShape {
                        code: 20001,
                        details: "an explicit problem requires responses y".to_string(),
                    })
                }
            }
        }

        // Fix mask and estimated parameter count.
        let free_beta: Vec<usize> = match self.problem.get_fixed_beta() {
            None => (0..np).collect(),
            Some(mask) => {
                if mask.len() != np {
                    return Err(FitError::InvalidShape {
                        code: 20003,
                        details: format!("fix mask has length {}, np = {}", mask.len(), np),
                    });
                }
                (0..np).filter(|&k| !mask[k]).collect()
            }
        };
        let npp = free_beta.len();
        if npp == 0 {
            return Err(FitError::InvalidDimensions {
                code: 10010,
                details: "every parameter is fixed".to_string(),
            });
        }

        // Weights.
        let response_weights = factor_response_weights(self.problem.get_we(), n, nq)?;
        if response_weights.nnzw < npp {
            return Err(FitError::InvalidWeights(
                crate::weights::WeightError::TooFewNonZero {
                    nnzw: response_weights.nnzw,
                    npp,
                },
            ));
        }
        let delta_weights = if ols {
            None
        } else {
            Some(factor_delta_weights(self.problem.get_wd(), n, m)?)
        };

        // Scales.
        let sclb = match self.parameters.get_sclb() {
            Some(user) => {
                if user.len() != np {
                    return Err(FitError::InvalidShape {
                        code: 20004,
                        details: format!("sclb has length {}, np = {}", user.len(), np),
                    });
                }
                if user.iter().any(|&v| v <= 0.0) {
                    return Err(FitError::InvalidScale {
                        details: "sclb entries must be strictly positive".to_string(),
                    });
                }
                user.clone()
            }
            None => scaling::default_beta_scales(&self.initial_beta),
        };
        let scld = match self.parameters.get_scld() {
            Some(user) => {
                let expanded = broadcast_rows(user, n, m).ok_or_else(|| FitError::InvalidShape {
                    code: 20004,
                    details: format!(
                        "scld is {} x {}, expected {} x {} (or a single row)",
                        user.nrows(),
                        user.ncols(),
                        n,
                        m
                    ),
                })?;
                if expanded.iter().any(|&v| v <= 0.0) {
                    return Err(FitError::InvalidScale {
                        details: "scld entries must be strictly positive".to_string(),
                    });
                }
                expanded
            }
            None => scaling::default_delta_scales(self.problem.get_x()),
        };
        let typb = DVector::from_fn(np, |k, _| 1.0 / sclb[k]);
        let ssf = DVector::from_fn(npp, |c, _| sclb[free_beta[c]]);

        // Initial deltas.
        let mut delta = DMatrix::zeros(n, m);
        if self.parameters.get_use_supplied_delta() && !ols {
            match self.problem.get_initial_delta() {
                Some(d0) => delta.copy_from(d0),
                None => {
                    return Err(FitError::InvalidShape {
                        code: 20005,
                        details: "supplied initial delta requested but none was set".to_string(),
                    })
                }
            }
        }
        let xplusd = self.problem.get_x() + &delta;

        // First model evaluation.
        let mut fn_values = DMatrix::zeros(n, nq);
        let mut nfev = 0;
        eval_model(model, &self.initial_beta, &xplusd, &mut fn_values, &mut nfev).map_err(
            |_| FitError::ModelStopped {
                phase: EvalPhase::Initial,
            },
        )?;

        let mut residuals = DVector::zeros(n * nq);
        stack_weighted_residuals(
            &fn_values,
            if implicit { None } else { self.problem.get_y() },
            &response_weights,
            &mut residuals,
        );
        let rnorm = rnorm_from(&residuals, &delta, delta_weights.as_ref());

        let nrow = select_representative_row(self.problem.get_x());

        // Function precision.
        let method = self.parameters.get_jacobian_method();
        let mut scratch_f = DMatrix::zeros(n, nq);
        let (neta, eta) = match self.parameters.get_ndigit() {
            Some(nd) => {
                let nd = nd.clamp(2, 15);
                (nd, 10.0_f64.powi(-(nd as i32)))
            }
            None => {
                if method == JacobianMethod::Analytic {
                    (15, 1.0e-15)
                } else {
                    estimate_function_precision(
                        model,
                        &self.initial_beta,
                        &xplusd,
                        &fn_values,
                        nrow,
                        &typb,
                        &mut scratch_f,
                        &mut nfev,
                    )
                    .map_err(|_| FitError::ModelStopped {
                        phase: EvalPhase::NoiseEstimation,
                    })?
                }
            }
        };

        // Finite-difference steps.
        let central = method == JacobianMethod::CentralDifference;
        let stpb = match self.parameters.get_stpb() {
            Some(user) => {
                if user.len() != np {
                    return Err(FitError::InvalidShape {
                        code: 20004,
                        details: format!("stpb has length {}, np = {}", user.len(), np),
                    });
                }
                if user.iter().any(|&v| v <= 0.0) {
                    return Err(FitError::InvalidScale {
                        details: "stpb entries must be strictly positive".to_string(),
                    });
                }
                user.clone()
            }
            None => DVector::from_element(np, scaling::default_relative_step(neta, central)),
        };
        let stpd = match self.parameters.get_stpd() {
            Some(user) => broadcast_rows(user, n, m).ok_or_else(|| FitError::InvalidShape {
                code: 20004,
                details: format!(
                    "stpd is {} x {}, expected {} x {} (or a single row)",
                    user.nrows(),
                    user.ncols(),
                    n,
                    m
                ),
            })?,
            None => DMatrix::from_element(n, m, scaling::default_relative_step(neta, central)),
        };

        let mut njev = 0;
        let mut warnings = Vec::new();
        let mut msgb = None;
        let mut msgd = None;
        let mut jacobian_scratch = JacobianScratch::new(n, m, np, nq);

        // Derivative verification.
        if method == JacobianMethod::AnalyticChecked {
            let check = check_derivatives(
                model,
                &self.initial_beta,
                &xplusd,
                &fn_values,
                nrow,
                &free_beta,
                self.problem.get_fixed_x(),
                eta,
                &typb,
                !ols,
                &mut jacobian_scratch,
                &mut nfev,
                &mut njev,
            )
            .map_err(|_| FitError::ModelStopped {
                phase: EvalPhase::DerivativeCheck,
            })?;

            if check.beta_flag == 2 {
                warnings.push(Warning::JacobianBetaSuspect);
            }
            if check.delta_flag == 2 {
                warnings.push(Warning::JacobianDeltaSuspect);
            }
            if check.beta_flag == 1 || check.delta_flag == 1 {
                warnings.push(Warning::JacobianQuestionable);
            }
            msgb = Some(check.msgb);
            msgd = Some(check.msgd);
        }

        // Initial trust region from the scaled norm of the starting point.
        let mut scaled_sq = 0.0;
        for &k in &free_beta {
            let v = sclb[k] * self.initial_beta[k];
            scaled_sq += v * v;
        }
        for i in 0..n {
            for j in 0..m {
                let v = scld[(i, j)] * delta[(i, j)];
                scaled_sq += v * v;
            }
        }
        let taufac = self.parameters.get_taufac();
        let tau = if scaled_sq > 0.0 {
            taufac * scaled_sq.sqrt()
        } else {
            taufac
        };

        self.state = Some(SolverState {
            beta: self.initial_beta.clone(),
            delta,
            xplusd,
            fn_values,
            residuals,
            jac: Jacobians::zeros(n, nq, npp, m),
            rnorm,
            tau,
            alpha: 0.0,
            niter: 0,
            nfev,
            njev,
            irank: 0,
            rcond: 1.0,
            warnings,
            beta_fixed_by_pivot: vec![false; np],
            msgb,
            msgd,
            free_beta,
            sclb,
            scld,
            ssf,
            typb,
            stpb,
            stpd,
            neta,
            eta,
            nnzw: response_weights.nnzw,
            nrow,
            response_weights,
            delta_weights,
            covariance: None,
            step_workspace: super::step::StepWorkspace::new(n, m, nq, npp),
            jacobian_scratch,
            trial: TrialBuffers::new(n, m, np, nq),
            shadow: TrialBuffers::new(n, m, np, nq),
        });
        self.outcome = None;

        Ok(())
    }

    // ----- outer loop -----------------------------------------------------

    fn run_outer<M: OdrModel>(
        &mut self,
        model: &mut M,
        budget: usize,
    ) -> Result<ConvergenceKind, FitError> {
        let mode = self.parameters.get_mode();
        let implicit = mode == RegressionMode::Implicit;
        let sstol = self.parameters.get_sstol();
        let partol = self.parameters.get_partol();

        let mut iterations = 0;
        while iterations < budget {
            {
                let state = self.state.as_mut().expect("outer loop without state");
                if state.rnorm == 0.0 {
                    return Ok(ConvergenceKind::SumOfSquares);
                }
            }

            self.build_jacobians(model)?;

            let accepted = match self.iterate_once(model, implicit, partol)? {
                IterationOutcome::Accepted(accepted) => accepted,
                IterationOutcome::RegionCollapsed => return Ok(ConvergenceKind::Parameter),
            };
            iterations += 1;

            let state = self.state.as_mut().expect("outer loop without state");
            state.niter += 1;
            state.irank = accepted.irank;
            state.rcond = accepted.rcond;
            state.alpha = accepted.alpha;

            for flag in state.beta_fixed_by_pivot.iter_mut() {
                *flag = false;
            }
            if accepted.irank > 0 {
                record_rank_warning(&mut state.warnings, accepted.irank);
                let npp = state.free_beta.len();
                for p in (npp - accepted.irank)..npp {
                    let free_position = accepted.pivot[p];
                    state.beta_fixed_by_pivot[state.free_beta[free_position]] = true;
                }
            }

            if let Some(log) = &self.log {
                log.add_new_iteration(
                    state.niter,
                    state.rnorm,
                    accepted.actred,
                    accepted.prered,
                    state.tau,
                    accepted.alpha,
                    match accepted.kind {
                        StepKind::GaussNewton => "Gauss-Newton",
                        StepKind::LevenbergMarquardt { .. } => "Levenberg",
                        StepKind::BestEffort => "best effort",
                    },
                );
            }

            // Convergence tests.
            let ss_converged = accepted.actred.abs() <= sstol
                && accepted.prered <= sstol
                && 0.5 * accepted.ratio <= 1.0;
            let par_converged = !implicit && state.tau <= partol * scaled_beta_norm(state);
            match (ss_converged, par_converged) {
                (true, true) => return Ok(ConvergenceKind::Both),
                (true, false) => return Ok(ConvergenceKind::SumOfSquares),
                (false, true) => return Ok(ConvergenceKind::Parameter),
                (false, false) => {}
            }
        }

        Err(FitError::IterationLimit)
    }

    /// One outer iteration: repeat the trust-region search on a fixed
    /// Jacobian until a trial is accepted
    fn iterate_once<M: OdrModel>(
        &mut self,
        model: &mut M,
        implicit: bool,
        partol: f64,
    ) -> Result<IterationOutcome, FitError> {
        let mode = self.parameters.get_mode();
        let ols = mode == RegressionMode::OrdinaryLeastSquares;

        let mut sub_iterations = 0;
        loop {
            sub_iterations += 1;
            if sub_iterations > MAX_SUB_ITERATIONS {
                return Err(FitError::StepLoopOverflow);
            }

            let x = self.problem.get_x();
            let fixed_x = self.problem.get_fixed_x();
            let y = if mode == RegressionMode::Implicit {
                None
            } else {
                self.problem.get_y()
            };
            let state = self.state.as_mut().expect("iteration without state");

            let tr = {
                let ctx = StepContext {
                    residuals: &state.residuals,
                    jacb: &state.jac.jacb,
                    jacd: &state.jac.jacd,
                    delta: &state.delta,
                    delta_weights: state.delta_weights.as_ref(),
                    fixed_x,
                    ssf: &state.ssf,
                    tt: &state.scld,
                    n: x.nrows(),
                    m: x.ncols(),
                    nq: state.fn_values.ncols(),
                    npp: state.free_beta.len(),
                    epsfcn: state.eta,
                };
                find_step(&ctx, &mut state.step_workspace, state.tau, state.alpha).map_err(
                    |err| FitError::NumericalFailure {
                        details: err.details,
                    },
                )?
            };

            fill_trial(state, x, &tr.result, ols);
            let trial_ok = evaluate_trial(model, state, y)?;

            let rnorm = state.rnorm;
            let rnorm_trial = state.trial.rnorm;
            let actred = if rnorm_trial < 10.0 * rnorm {
                1.0 - (rnorm_trial / rnorm) * (rnorm_trial / rnorm)
            } else {
                -1.0
            };
            let prered = (tr.result.predicted_sq
                + 2.0 * tr.alpha * tr.result.pnorm * tr.result.pnorm)
                / (rnorm * rnorm);
            let ratio = if prered > 0.0 { actred / prered } else { 0.0 };

            let mut accepted = AcceptedStep {
                actred,
                prered,
                ratio,
                alpha: tr.alpha,
                kind: tr.kind,
                irank: tr.result.irank,
                rcond: tr.result.rcond,
                pivot: tr.result.pivot.clone(),
            };

            if ratio < 0.25 {
                let denominator = prered - 0.5 * actred;
                let factor = if denominator > 0.0 {
                    (0.5 * prered / denominator).clamp(0.1, 0.5)
                } else {
                    0.1
                };
                state.tau *= factor;
                accepted.alpha = tr.alpha / factor;
                state.alpha = accepted.alpha;
            } else if ratio > 0.75 && tr.kind.doubling_eligible() && trial_ok {
                // Internal doubling: keep the good trial in the shadow
                // block, enlarge the region and re-solve from the same
                // iterate; a failed double rolls back to the shadow.
                state.shadow.copy_from(&state.trial);
                let saved_tau = state.tau;
                state.tau = 2.0 * tr.result.pnorm;
                let half_alpha = 0.5 * tr.alpha;

                let tr2 = {
                    let ctx = StepContext {
                        residuals: &state.residuals,
                        jacb: &state.jac.jacb,
                        jacd: &state.jac.jacd,
                        delta: &state.delta,
                        delta_weights: state.delta_weights.as_ref(),
                        fixed_x,
                        ssf: &state.ssf,
                        tt: &state.scld,
                        n: x.nrows(),
                        m: x.ncols(),
                        nq: state.fn_values.ncols(),
                        npp: state.free_beta.len(),
                        epsfcn: state.eta,
                    };
                    find_step(&ctx, &mut state.step_workspace, state.tau, half_alpha).map_err(
                        |err| FitError::NumericalFailure {
                            details: err.details,
                        },
                    )?
                };

                fill_trial(state, x, &tr2.result, ols);
                let double_ok = evaluate_trial(model, state, y)?;

                if double_ok && state.trial.rnorm < state.shadow.rnorm {
                    let rnorm_double = state.trial.rnorm;
                    accepted.actred = 1.0 - (rnorm_double / rnorm) * (rnorm_double / rnorm);
                    accepted.prered = (tr2.result.predicted_sq
                        + 2.0 * tr2.alpha * tr2.result.pnorm * tr2.result.pnorm)
                        / (rnorm * rnorm);
                    accepted.ratio = if accepted.prered > 0.0 {
                        accepted.actred / accepted.prered
                    } else {
                        0.0
                    };
                    accepted.alpha = tr2.alpha;
                    accepted.kind = tr2.kind;
                    accepted.irank = tr2.result.irank;
                    accepted.rcond = tr2.result.rcond;
                    accepted.pivot = tr2.result.pivot.clone();
                    if let Some(log) = &self.log {
                        log.add_internal_doubling(true);
                    }
                } else {
                    let (trial, shadow) = (&mut state.trial, &state.shadow);
                    trial.copy_from(shadow);
                    state.tau = saved_tau;
                    if let Some(log) = &self.log {
                        log.add_internal_doubling(false);
                    }
                }

                commit_trial(state);
                return Ok(IterationOutcome::Accepted(accepted));
            }

            if ratio >= ACCEPT_RATIO && trial_ok {
                commit_trial(state);
                return Ok(IterationOutcome::Accepted(accepted));
            }

            // Rejected: the region shrank above; check whether it collapsed
            // below the parameter tolerance before trying again.
            if let Some(log) = &self.log {
                log.add_rejection(ratio, state.tau);
            }
            if !implicit && state.tau <= partol * scaled_beta_norm(state) {
                return Ok(IterationOutcome::RegionCollapsed);
            }
        }
    }

    // ----- implicit continuation -------------------------------------------

    fn solve_implicit<M: OdrModel>(&mut self, model: &mut M) -> Result<ConvergenceKind, FitError> {
        let maxit = self.parameters.get_maxit();
        let partol = self.parameters.get_partol();
        let taufac = self.parameters.get_taufac();

        let mut penalty = self.parameters.get_penalty_start().abs();
        if penalty == 0.0 {
            penalty = 10.0;
        }

        {
            let state = self.state.as_mut().expect("implicit solve without state");
            state
                .delta_weights
                .as_mut()
                .expect("implicit mode carries delta weights")
                .set_penalty(penalty);
            state.rnorm = rnorm_from(&state.residuals, &state.delta, state.delta_weights.as_ref());
        }

        let mut previous_beta: Option<DVector<f64>> = None;
        let mut used = 0;

        loop {
            let before = self.state.as_ref().expect("state").niter;
            let budget = maxit - used;
            if budget == 0 {
                return Err(FitError::IterationLimit);
            }
            self.run_outer(model, budget)?;
            used += self.state.as_ref().expect("state").niter - before;

            let state = self.state.as_mut().expect("state");
            if let Some(previous) = &previous_beta {
                let mut change_sq = 0.0;
                for &k in &state.free_beta {
                    let v = state.sclb[k] * (state.beta[k] - previous[k]);
                    change_sq += v * v;
                }
                if change_sq.sqrt() <= partol {
                    return Ok(ConvergenceKind::Parameter);
                }
            }
            previous_beta = Some(state.beta.clone());

            penalty *= PENALTY_FACTOR;
            if penalty > PENALTY_CEILING {
                return Err(FitError::PenaltyDiverged);
            }
            state
                .delta_weights
                .as_mut()
                .expect("implicit mode carries delta weights")
                .set_penalty(penalty);

            // Refresh the objective for the new penalty and reopen the
            // trust region around the current iterate.
            state.rnorm = rnorm_from(&state.residuals, &state.delta, state.delta_weights.as_ref());
            let scaled = scaled_point_norm(state);
            state.tau = if scaled > 0.0 { taufac * scaled } else { taufac };
            state.alpha = 0.0;

            if let Some(log) = &self.log {
                log.add_penalty_step(penalty);
            }
        }
    }

    // ----- helpers ---------------------------------------------------------

    fn build_jacobians<M: OdrModel>(&mut self, model: &mut M) -> Result<(), FitError> {
        let method = self.parameters.get_jacobian_method();
        let ols = self.parameters.get_mode() == RegressionMode::OrdinaryLeastSquares;
        let fixed_x = self.problem.get_fixed_x();
        let state = self.state.as_mut().expect("jacobian build without state");

        let request = JacobianRequest {
            beta: &state.beta,
            xplusd: &state.xplusd,
            fn_current: &state.fn_values,
            delta: &state.delta,
            free_beta: &state.free_beta,
            fixed_x,
            stpb: &state.stpb,
            stpd: &state.stpd,
            typb: &state.typb,
            with_delta: !ols,
        };

        jacobian::evaluate(
            model,
            method,
            &request,
            &state.response_weights,
            &mut state.jac,
            &mut state.jacobian_scratch,
            &mut state.nfev,
            &mut state.njev,
        )
        .map_err(|err| match err {
            EngineError::Stop(ModelStop::Cancel) => FitError::UserCancelled,
            EngineError::Stop(ModelStop::Retreat) => FitError::ModelStopped {
                phase: EvalPhase::Jacobian,
            },
            EngineError::NonZeroDeltaUnderOls => FitError::OlsDeltaCorrupted,
        })
    }

    /// Prepare the factored reduced Jacobian for the covariance
    /// post-processing; never turns a finished fit into a failure
    fn prepare_covariance<M: OdrModel>(&mut self, model: &mut M) {
        match self.parameters.get_covariance() {
            CovarianceMode::Skip => return,
            CovarianceMode::Refresh => {
                if self.build_jacobians(model).is_err() {
                    return;
                }
            }
            CovarianceMode::ReuseJacobian => {}
        }

        let x = self.problem.get_x();
        let fixed_x = self.problem.get_fixed_x();
        let state = self.state.as_mut().expect("covariance without state");
        let ctx = StepContext {
            residuals: &state.residuals,
            jacb: &state.jac.jacb,
            jacd: &state.jac.jacd,
            delta: &state.delta,
            delta_weights: state.delta_weights.as_ref(),
            fixed_x,
            ssf: &state.ssf,
            tt: &state.scld,
            n: x.nrows(),
            m: x.ncols(),
            nq: state.fn_values.ncols(),
            npp: state.free_beta.len(),
            epsfcn: state.eta,
        };
        if let Ok(factor) = covariance_factor(&ctx, &mut state.step_workspace) {
            state.covariance = Some(factor);
        }
    }

    fn build_report(&self, convergence: ConvergenceKind) -> FitReport {
        let state = self.state.as_ref().expect("report without state");
        FitReport {
            beta: state.beta.clone(),
            delta: state.delta.clone(),
            info: assemble_info(convergence.info_digit(), &state.warnings),
            convergence,
            warnings: state.warnings.clone(),
            rnorm: state.rnorm,
            niter: state.niter,
            nfev: state.nfev,
            njev: state.njev,
            irank: state.irank,
            rcond: state.rcond,
            beta_fixed_by_pivot: state.beta_fixed_by_pivot.clone(),
            msgb: state.msgb.clone(),
            msgd: state.msgd.clone(),
        }
    }
}

/// Short call: fit `model` to `(x, y)` starting from `beta0`, with defaults
/// for everything else
pub fn fit<M: OdrModel>(
    model: &mut M,
    x: DMatrix<f64>,
    y: DMatrix<f64>,
    beta0: DVector<f64>,
) -> Result<FitReport, FitError> {
    let problem = OdrProblem::new(x, y);
    let mut solver = OdrSolver::new(problem, SolverParameters::default(), beta0);
    solver.solve(model)
}

// ----- free helpers --------------------------------------------------------

fn eval_model<M: OdrModel>(
    model: &mut M,
    beta: &DVector<f64>,
    xplusd: &DMatrix<f64>,
    out: &mut DMatrix<f64>,
    nfev: &mut usize,
) -> Result<(), ModelStop> {
    *nfev += 1;
    model.evaluate(beta, xplusd, out)
}

/// Stack `we1 (fn - y)` (or `we1 fn` when `y` is absent) into `out`
fn stack_weighted_residuals(
    fn_values: &DMatrix<f64>,
    y: Option<&DMatrix<f64>>,
    weights: &ResponseWeights,
    out: &mut DVector<f64>,
) {
    let n = fn_values.nrows();
    let nq = fn_values.ncols();
    let mut raw = DVector::zeros(nq);
    let mut weighted = DVector::zeros(nq);
    for i in 0..n {
        for l in 0..nq {
            raw[l] = match y {
                Some(y) => fn_values[(i, l)] - y[(i, l)],
                None => fn_values[(i, l)],
            };
        }
        weights.weigh(i, &raw, &mut weighted);
        for l in 0..nq {
            out[i + n * l] = weighted[l];
        }
    }
}

/// `√S`: weighted residual norm plus the delta penalty
fn rnorm_from(
    residuals: &DVector<f64>,
    delta: &DMatrix<f64>,
    delta_weights: Option<&crate::weights::DeltaWeights>,
) -> f64 {
    let mut total = residuals.norm_squared();
    if let Some(wd) = delta_weights {
        let m = delta.ncols();
        let mut delta_i = DVector::zeros(m);
        for i in 0..delta.nrows() {
            for j in 0..m {
                delta_i[j] = delta[(i, j)];
            }
            total += wd.quadratic(i, &delta_i);
        }
    }
    total.sqrt()
}

/// First row of `x` with no zero entry, for the derivative check and the
/// noise estimation
fn select_representative_row(x: &DMatrix<f64>) -> usize {
    for i in 0..x.nrows() {
        if (0..x.ncols()).all(|j| x[(i, j)] != 0.0) {
            return i;
        }
    }
    0
}

fn scaled_beta_norm(state: &SolverState) -> f64 {
    let mut acc = 0.0;
    for &k in &state.free_beta {
        let v = state.sclb[k] * state.beta[k];
        acc += v * v;
    }
    acc.sqrt()
}

fn scaled_point_norm(state: &SolverState) -> f64 {
    let mut acc = 0.0;
    for &k in &state.free_beta {
        let v = state.sclb[k] * state.beta[k];
        acc += v * v;
    }
    for i in 0..state.delta.nrows() {
        for j in 0..state.delta.ncols() {
            let v = state.scld[(i, j)] * state.delta[(i, j)];
            acc += v * v;
        }
    }
    acc.sqrt()
}

fn record_rank_warning(warnings: &mut Vec<Warning>, irank: usize) {
    if let Some(Warning::RankDeficient { irank: existing }) = warnings
        .iter_mut()
        .find(|w| matches!(w, Warning::RankDeficient { .. }))
    {
        *existing = irank;
        return;
    }
    warnings.push(Warning::RankDeficient { irank });
}

/// Build the trial iterate `(β + s, δ + t)` into the trial buffers
fn fill_trial(
    state: &mut SolverState,
    x: &DMatrix<f64>,
    step: &super::step::StepResult,
    ols: bool,
) {
    state.trial.beta.copy_from(&state.beta);
    for (c, &k) in state.free_beta.iter().enumerate() {
        state.trial.beta[k] += step.s[c];
    }
    if ols {
        state.trial.delta.fill(0.0);
        state.trial.xplusd.copy_from(x);
    } else {
        for i in 0..state.delta.nrows() {
            for j in 0..state.delta.ncols() {
                state.trial.delta[(i, j)] = state.delta[(i, j)] + step.t[(i, j)];
                state.trial.xplusd[(i, j)] = x[(i, j)] + state.trial.delta[(i, j)];
            }
        }
    }
}

/// Evaluate the model at the trial point; a retreat request scores the
/// trial as catastrophically worse instead of failing
fn evaluate_trial<M: OdrModel>(
    model: &mut M,
    state: &mut SolverState,
    y: Option<&DMatrix<f64>>,
) -> Result<bool, FitError> {
    let evaluation = {
        let trial = &mut state.trial;
        let result = model.evaluate(&trial.beta, &trial.xplusd, &mut trial.fn_values);
        state.nfev += 1;
        result
    };
    match evaluation {
        Ok(()) => {
            stack_weighted_residuals(
                &state.trial.fn_values,
                y,
                &state.response_weights,
                &mut state.trial.residuals,
            );
            state.trial.rnorm = rnorm_from(
                &state.trial.residuals,
                &state.trial.delta,
                state.delta_weights.as_ref(),
            );
            Ok(true)
        }
        Err(ModelStop::Cancel) => Err(FitError::UserCancelled),
        Err(ModelStop::Retreat) => {
            state.trial.rnorm = state.rnorm / RETREAT_SHRINK;
            Ok(false)
        }
    }
}

/// Commit the trial buffers as the current iterate
fn commit_trial(state: &mut SolverState) {
    state.beta.copy_from(&state.trial.beta);
    state.delta.copy_from(&state.trial.delta);
    state.xplusd.copy_from(&state.trial.xplusd);
    state.fn_values.copy_from(&state.trial.fn_values);
    state.residuals.copy_from(&state.trial.residuals);
    state.rnorm = state.trial.rnorm;
}

/// Expand a shared row into a full table when needed
fn broadcast_rows(user: &DMatrix<f64>, n: usize, m: usize) -> Option<DMatrix<f64>> {
    if user.nrows() == n && user.ncols() == m {
        Some(user.clone())
    } else if user.nrows() == 1 && user.ncols() == m {
        let mut expanded = DMatrix::zeros(n, m);
        for i in 0..n {
            for j in 0..m {
                expanded[(i, j)] = user[(0, j)];
            }
        }
        Some(expanded)
    } else {
        None
    }
}
