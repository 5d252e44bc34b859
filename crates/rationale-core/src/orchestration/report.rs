use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Outcome of starting every integration of a project
///
/// One integration failing to start does not prevent the others from
/// starting; failures are collected here instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStartReport {
    pub project_id: String,
    /// Integrations whose run was launched
    pub started: Vec<String>,
    /// Integrations that are not active
    pub skipped: Vec<String>,
    /// Integration ID and error message for each failed start
    pub failed: Vec<(String, String)>,
}

impl ProjectStartReport {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse into a single error when any start failed
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(Error::ProjectStartFailed(self.failed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        let mut report = ProjectStartReport::new("p1");
        report.started.push("int-1".into());
        assert!(report.clone().into_result().is_ok());

        report.failed.push(("int-2".into(), "boom".into()));
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, Error::ProjectStartFailed(f) if f.len() == 1));
    }
}
