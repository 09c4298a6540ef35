//! Static verification seam.
//!
//! Type and lint checking are external collaborators: the orchestrator
//! hands them exactly the stale units and only cares whether the error
//! set is empty. A non-empty set aborts the build before any
//! compilation, leaving the previous manifest untouched.

use std::process::Command;

use anyhow::{Context, Result};

use crate::unit::SourceUnit;

/// One checker finding, reported verbatim to the operator.
#[derive(Debug, Clone)]
pub struct CheckDiagnostic {
    pub unit: String,
    pub message: String,
}

/// External type/lint checker contract.
pub trait StaticCheck: Sync {
    /// Check the given (stale) units. Diagnostics mean "abort"; an
    /// `Err` means the checker itself could not run, which is also
    /// fatal.
    fn check(&self, units: &[&SourceUnit]) -> Result<Vec<CheckDiagnostic>>;
}

/// No verification. The default for projects without a checker
/// configured.
pub struct NoCheck;

impl StaticCheck for NoCheck {
    fn check(&self, _units: &[&SourceUnit]) -> Result<Vec<CheckDiagnostic>> {
        Ok(Vec::new())
    }
}

/// Runs an external checker command with the stale unit paths
/// appended; a non-zero exit turns the combined output into
/// diagnostics.
pub struct CommandCheck {
    pub program: String,
    pub args: Vec<String>,
}

impl StaticCheck for CommandCheck {
    fn check(&self, units: &[&SourceUnit]) -> Result<Vec<CheckDiagnostic>> {
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(units.iter().map(|u| u.path.as_os_str()))
            .output()
            .with_context(|| format!("failed to run checker `{}`", self.program))?;

        if output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(vec![CheckDiagnostic {
            unit: String::new(),
            message: format!("{stdout}{stderr}").trim().to_string(),
        }])
    }
}
