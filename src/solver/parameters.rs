use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::jacobian::JacobianMethod;

/// Which regression problem is being solved
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegressionMode {
    /// Orthogonal distance regression on an explicit model `y ≈ f(β, x+δ)`
    Explicit,
    /// Implicit model `f(β, x+δ) ≈ 0` with a penalty continuation on `δ`
    Implicit,
    /// Ordinary least squares: `δ` pinned to zero
    OrdinaryLeastSquares,
}

impl fmt::Display for RegressionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit orthogonal distance"),
            Self::Implicit => write!(f, "implicit orthogonal distance"),
            Self::OrdinaryLeastSquares => write!(f, "ordinary least squares"),
        }
    }
}

/// What to prepare for the covariance post-processing at exit
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CovarianceMode {
    /// Rebuild the Jacobians at the solution before factoring
    Refresh,
    /// Factor the Jacobians of the last iteration as they are
    ReuseJacobian,
    /// Prepare nothing
    Skip,
}

/// A minimal struct holding the resolution parameters
///
/// # Parameters
///
/// ## Mode and Jacobians
/// The regression mode selects between explicit/implicit orthogonal
/// distance and ordinary least squares; the Jacobian method selects
/// analytic derivatives (optionally verified at startup) or forward/central
/// finite differences.
///
/// ## Tolerances
/// `sstol` bounds the relative change of the sum of squares, `partol` the
/// scaled step norm; the defaults are `√ε` and `ε^(2/3)`.
///
/// ## Trust region
/// `taufac` scales the initial trust-region radius relative to the scaled
/// norm of the starting point.
///
/// ## Max iteration
/// The maximum number of outer iterations for one `solve` call. A restart
/// continues from the saved state with a fresh budget.
///
/// ## Function accuracy
/// `ndigit` overrides the estimated number of reliable decimal digits of
/// the model output; when absent it is measured at startup.
///
/// ## Implicit penalty
/// `penalty_start` seeds the continuation; it is multiplied by ten on every
/// penalty step until `beta` stabilizes or the ceiling of 1000 is passed.
pub struct SolverParameters {
    mode: RegressionMode,
    jacobian_method: JacobianMethod,
    covariance: CovarianceMode,
    use_supplied_delta: bool,
    restart: bool,
    maxit: usize,
    sstol: f64,
    partol: f64,
    taufac: f64,
    ndigit: Option<usize>,
    penalty_start: f64,
    stpb: Option<DVector<f64>>,
    stpd: Option<DMatrix<f64>>,
    sclb: Option<DVector<f64>>,
    scld: Option<DMatrix<f64>>,
}

impl Default for SolverParameters {
    fn default() -> Self {
        SolverParameters {
            mode: RegressionMode::Explicit,
            jacobian_method: JacobianMethod::ForwardDifference,
            covariance: CovarianceMode::Refresh,
            use_supplied_delta: false,
            restart: false,
            maxit: 50,
            sstol: f64::EPSILON.sqrt(),
            partol: f64::EPSILON.powf(2.0 / 3.0),
            taufac: 1.0,
            ndigit: None,
            penalty_start: 10.0,
            stpb: None,
            stpd: None,
            sclb: None,
            scld: None,
        }
    }
}

impl SolverParameters {
    pub fn new(mode: RegressionMode, jacobian_method: JacobianMethod) -> Self {
        SolverParameters {
            mode,
            jacobian_method,
            ..Default::default()
        }
    }

    /// Decode the packed job integer into parameters
    ///
    /// Decimal digits, least significant first:
    /// - digit 0: `0` explicit, `1` implicit, `>= 2` ordinary least squares
    /// - digit 1: `0` forward differences, `1` central differences,
    ///   `2` analytic with verification, `3` analytic
    /// - digit 2: `0` covariance with refreshed Jacobians, `1` covariance
    ///   reusing the last Jacobians, `>= 2` none
    /// - digit 3: `0` zero initial `δ`, `1` caller-supplied
    /// - digit 4: `1` restart
    pub fn from_job(job: i32) -> Self {
        let digit = |p: u32| (job / 10_i32.pow(p)) % 10;
        let mode = match digit(0) {
            0 => RegressionMode::Explicit,
            1 => RegressionMode::Implicit,
            _ => RegressionMode::OrdinaryLeastSquares,
        };
        let jacobian_method = match digit(1) {
            0 => JacobianMethod::ForwardDifference,
            1 => JacobianMethod::CentralDifference,
            2 => JacobianMethod::AnalyticChecked,
            _ => JacobianMethod::Analytic,
        };
        let covariance = match digit(2) {
            0 => CovarianceMode::Refresh,
            1 => CovarianceMode::ReuseJacobian,
            _ => CovarianceMode::Skip,
        };
        let mut parameters = SolverParameters::new(mode, jacobian_method);
        parameters.covariance = covariance;
        parameters.use_supplied_delta = digit(3) == 1;
        parameters.restart = digit(4) == 1;
        parameters
    }

    pub fn get_mode(&self) -> RegressionMode {
        self.mode
    }

    pub fn get_jacobian_method(&self) -> JacobianMethod {
        self.jacobian_method
    }

    pub fn get_covariance(&self) -> CovarianceMode {
        self.covariance
    }

    pub fn get_use_supplied_delta(&self) -> bool {
        self.use_supplied_delta
    }

    pub fn get_restart(&self) -> bool {
        self.restart
    }

    pub fn get_maxit(&self) -> usize {
        self.maxit
    }

    pub fn get_sstol(&self) -> f64 {
        self.sstol
    }

    pub fn get_partol(&self) -> f64 {
        self.partol
    }

    pub fn get_taufac(&self) -> f64 {
        self.taufac
    }

    pub fn get_ndigit(&self) -> Option<usize> {
        self.ndigit
    }

    pub fn get_penalty_start(&self) -> f64 {
        self.penalty_start
    }

    pub fn get_stpb(&self) -> Option<&DVector<f64>> {
        self.stpb.as_ref()
    }

    pub fn get_stpd(&self) -> Option<&DMatrix<f64>> {
        self.stpd.as_ref()
    }

    pub fn get_sclb(&self) -> Option<&DVector<f64>> {
        self.sclb.as_ref()
    }

    pub fn get_scld(&self) -> Option<&DMatrix<f64>> {
        self.scld.as_ref()
    }

    pub fn set_covariance(&mut self, covariance: CovarianceMode) {
        self.covariance = covariance;
    }

    pub fn set_use_supplied_delta(&mut self, use_supplied_delta: bool) {
        self.use_supplied_delta = use_supplied_delta;
    }

    pub fn set_restart(&mut self, restart: bool) {
        self.restart = restart;
    }

    pub fn set_maxit(&mut self, maxit: usize) {
        self.maxit = maxit;
    }

    pub fn set_tolerances(&mut self, sstol: f64, partol: f64) {
        if sstol <= 0.0 || partol <= 0.0 {
            panic!(
                "Tolerances must be strictly positive, provided values were {} and {}",
                sstol, partol
            );
        }
        self.sstol = sstol;
        self.partol = partol;
    }

    pub fn set_taufac(&mut self, taufac: f64) {
        if taufac <= 0.0 {
            panic!(
                "taufac must be strictly positive, provided value was {}",
                taufac
            );
        }
        self.taufac = taufac;
    }

    pub fn set_ndigit(&mut self, ndigit: usize) {
        self.ndigit = Some(ndigit);
    }

    /// Seed of the implicit-model penalty continuation; only the magnitude
    /// matters
    pub fn set_penalty_start(&mut self, penalty_start: f64) {
        self.penalty_start = penalty_start.abs();
    }

    pub fn set_steps(&mut self, stpb: Option<DVector<f64>>, stpd: Option<DMatrix<f64>>) {
        self.stpb = stpb;
        self.stpd = stpd;
    }

    pub fn set_scales(&mut self, sclb: Option<DVector<f64>>, scld: Option<DMatrix<f64>>) {
        self.sclb = sclb;
        self.scld = scld;
    }
}

impl fmt::Display for SolverParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut content = String::from("Solver parameters\n");
        content.push_str("=================\n\n");
        let separation_line =
            "+------------------------------+-----------------+-----------------+-----------------+-----------------+\n";
        let header =
            "|            Mode              |  Max iteration  |      sstol      |     partol      |     taufac      |\n";

        content.push_str(separation_line);
        content.push_str(header);
        content.push_str(separation_line);
        content.push_str(&format!("| {:width$}", self.mode.to_string(), width = 29));
        content.push_str(&format!("| {:width$}", self.maxit.to_string(), width = 16));
        content.push_str(&format!("| {:width$.8e}", self.sstol, width = 16));
        content.push_str(&format!("| {:width$.8e}", self.partol, width = 16));
        content.push_str(&format!("| {:width$}", self.taufac.to_string(), width = 16));
        content.push_str("|\n");
        content.push_str(separation_line);
        content.push('\n');

        write!(f, "{}", content)
    }
}

impl fmt::Debug for SolverParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Solver parameters")
            .field("Mode", &self.mode)
            .field("Jacobian method", &self.jacobian_method)
            .field("Max iteration", &self.maxit)
            .field("sstol", &self.sstol)
            .field("partol", &self.partol)
            .field("taufac", &self.taufac)
            .field("Restart", &self.restart)
            .finish()
    }
}
