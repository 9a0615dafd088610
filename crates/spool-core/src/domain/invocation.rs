//! Invocation - `procedure(args…)` built from a claimed job.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ExecutionError;
use super::job::ClaimedJob;

/// A rendered call of a job procedure.
///
/// The procedure name is spliced into statement text, so it must be a plain
/// identifier, optionally qualified by one schema name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    procedure: String,
    arguments: Option<String>,
}

impl Invocation {
    pub fn new(
        procedure: impl Into<String>,
        arguments: Option<String>,
    ) -> Result<Self, ExecutionError> {
        let procedure = procedure.into();
        if !is_qualified_identifier(&procedure) {
            return Err(ExecutionError::InvalidProcedure(procedure));
        }
        Ok(Self {
            procedure,
            arguments,
        })
    }

    pub fn for_job(job: &ClaimedJob) -> Result<Self, ExecutionError> {
        Self::new(job.procedure.clone(), job.rendered_arguments.clone())
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Rendered argument list without the parentheses.
    pub fn arguments(&self) -> &str {
        self.arguments.as_deref().unwrap_or("")
    }

    /// Statement text that runs the call as a result-producing query.
    pub fn statement(&self) -> String {
        format!("SELECT {self}")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.procedure, self.arguments())
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_qualified_identifier(name: &str) -> bool {
    match name.split_once('.') {
        Some((schema, function)) => is_identifier(schema) && is_identifier(function),
        None => is_identifier(name),
    }
}

/// Status of one executed statement.
///
/// Codes follow the server-programming interface (`SELECT` = 5). Anything
/// other than `Select` means the statement did not produce a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementStatus {
    Select,
    Other(i32),
}

impl StatementStatus {
    pub const SELECT_CODE: i32 = 5;

    pub fn from_code(code: i32) -> Self {
        if code == Self::SELECT_CODE {
            Self::Select
        } else {
            Self::Other(code)
        }
    }

    pub fn code(self) -> i32 {
        match self {
            StatementStatus::Select => Self::SELECT_CODE,
            StatementStatus::Other(code) => code,
        }
    }

    pub fn is_select(self) -> bool {
        matches!(self, StatementStatus::Select)
    }
}
