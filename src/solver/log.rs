use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;

#[cfg(feature = "additional_log_info")]
use chrono::prelude::*;

const SEPARATION_ITER: &str = "=========================\n\n";
const SEPARATION_LINE: &str =
    "+-------+----------------------+----------------------+----------------------+----------------------+----------------------+--------------+\n";
const TITLE_LINE: &str =
    "| Iter  |        rnorm         |   actual reduction   | predicted reduction  |         tau          |        alpha         |     step     |\n";
const FLOAT_WIDTH: usize = 21;
const INT_WIDTH: usize = 6;

pub struct SolverLog {
    path: String,
}

#[cfg(feature = "additional_log_info")]
fn write_time(content: &mut String) {
    let utc: DateTime<Utc> = Utc::now();
    let local: DateTime<Local> = Local::now();

    content.push_str("Fit start:\n");

    content.push_str("  - UTC:   ");
    content.push_str(&utc.to_rfc2822());
    content.push('\n');
    content.push_str("  - Local: ");
    content.push_str(&local.to_rfc2822());
    content.push('\n');
}

#[cfg(feature = "additional_log_info")]
fn write_user_infos(content: &mut String) {
    content.push_str("OS: ");
    content.push_str(&whoami::distro());
    content.push('\n');
    content.push_str("Host: ");
    content.push_str(&whoami::devicename());
    content.push('\n');
    content.push_str("Username: ");
    content.push_str(&whoami::username());
    content.push('\n');
}

#[cfg(feature = "additional_log_info")]
fn write_rustc_info(content: &mut String) {
    content.push_str("Rust version: ");
    content.push_str(&rustc_version_runtime::version().to_string());
    content.push('\n');
}

/// Log for debugging information
///
/// This object defines the format and concatenate the debugging informations
impl SolverLog {
    pub fn new(path: &str) -> Self {
        let mut file = File::create(path).unwrap();

        let mut content = String::new();
        content.push_str("Runner informations\n");
        content.push_str("===================\n\n");

        #[cfg(feature = "additional_log_info")]
        {
            write_user_infos(&mut content);
            write_rustc_info(&mut content);
        }

        const VERSION: &str = env!("CARGO_PKG_VERSION");
        content.push_str("odr_solver version: ");
        content.push_str(VERSION);
        content.push('\n');

        #[cfg(feature = "additional_log_info")]
        write_time(&mut content);

        content.push('\n');

        write!(file, "{}", content).unwrap();

        SolverLog {
            path: path.to_string(),
        }
    }

    pub fn add_content(&self, new_content: &str) {
        let mut file = OpenOptions::new().append(true).open(&self.path).unwrap();
        write!(file, "{}", new_content).unwrap();
    }

    pub fn add_parameters(&self, solver_parameters: &str) {
        self.add_content(solver_parameters);
    }

    /// One block per accepted outer iteration
    pub fn add_new_iteration(
        &self,
        iter: usize,
        rnorm: f64,
        actred: f64,
        prered: f64,
        tau: f64,
        alpha: f64,
        step_kind: &str,
    ) {
        let mut entry = String::new();
        entry.push_str(SEPARATION_ITER);
        entry.push_str(&format!("Iteration: {}\n\n", iter));
        entry.push_str(SEPARATION_LINE);
        entry.push_str(TITLE_LINE);
        entry.push_str(SEPARATION_LINE);
        entry.push_str(&format!("| {:width$}", iter.to_string(), width = INT_WIDTH));
        for value in [rnorm, actred, prered, tau, alpha] {
            entry.push_str(&format!("| {:width$.12e}", value, width = FLOAT_WIDTH));
        }
        entry.push_str(&format!("| {:width$}|", step_kind, width = 13));
        entry.push('\n');
        entry.push_str(SEPARATION_LINE);
        entry.push('\n');
        self.add_content(&entry);
    }

    /// Mark an internal doubling attempt
    pub fn add_internal_doubling(&self, accepted: bool) {
        if accepted {
            self.add_content("Internal doubling accepted\n\n");
        } else {
            self.add_content("Internal doubling rejected, previous trial restored\n\n");
        }
    }

    /// Mark a rejected trial step
    pub fn add_rejection(&self, ratio: f64, tau: f64) {
        self.add_content(&format!(
            "Step rejected (gain ratio {:e}), trust region shrunk to {:e}\n\n",
            ratio, tau
        ));
    }

    /// Mark a penalty increase of the implicit continuation
    pub fn add_penalty_step(&self, penalty: f64) {
        self.add_content(&format!(
            "Implicit continuation: penalty raised to {:e}\n\n",
            penalty
        ));
    }
}
