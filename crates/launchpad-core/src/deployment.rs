//! Deployment model and its status state machine.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::id::{DeploymentId, ProjectId};
use crate::{Error, Result};

/// Environment-variable set handed over by the dispatcher.
///
/// Kept sorted so that everything derived from it (env file, function
/// configuration) is byte-stable across retries.
pub type EnvVars = BTreeMap<String, String>;

/// Which build path a deployment takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum BuildCategory {
    /// Pre-rendered site uploaded to the static hosting platform.
    #[display("static")]
    Static,
    /// Request-handling service packaged for the function platform.
    #[display("dynamic")]
    Dynamic,
}

impl std::str::FromStr for BuildCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(BuildCategory::Static),
            "dynamic" => Ok(BuildCategory::Dynamic),
            other => Err(Error::Configuration(format!(
                "unknown build category '{}', expected 'static' or 'dynamic'",
                other
            ))),
        }
    }
}

/// Pipeline status.
///
/// `pending → building → {failed, built} → packaging → {failed, packaged}
/// → provisioning → {failed, deployed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[display("pending")]
    Pending,
    #[display("building")]
    Building,
    #[display("built")]
    Built,
    #[display("packaging")]
    Packaging,
    #[display("packaged")]
    Packaged,
    #[display("provisioning")]
    Provisioning,
    #[display("deployed")]
    Deployed,
    #[display("failed")]
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }

    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Building)
                | (Building, Built)
                | (Building, Failed)
                | (Built, Packaging)
                | (Packaging, Packaged)
                | (Packaging, Failed)
                | (Packaged, Provisioning)
                | (Provisioning, Deployed)
                | (Provisioning, Failed)
        )
    }
}

/// One build-and-deploy attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub project: ProjectId,
    pub category: BuildCategory,
    /// Checked-out source tree the build runs in.
    pub source_dir: PathBuf,
    /// Where the source came from, when the dispatcher said so.
    pub source_url: Option<String>,
    pub env: EnvVars,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(
        project: ProjectId,
        category: BuildCategory,
        source_dir: impl Into<PathBuf>,
        env: EnvVars,
    ) -> Self {
        Self {
            id: DeploymentId::new(),
            project,
            category,
            source_dir: source_dir.into(),
            source_url: None,
            env,
            status: DeploymentStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn advance(&mut self, next: DeploymentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the attempt failed from whichever working state it is in.
    ///
    /// Returns false when the current state has no failure edge (e.g. it
    /// already finished).
    pub fn fail(&mut self) -> bool {
        self.advance(DeploymentStatus::Failed).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::*;

    fn deployment() -> Deployment {
        Deployment::new(
            ProjectId::parse("demo").unwrap(),
            BuildCategory::Static,
            "/tmp/demo",
            EnvVars::new(),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut d = deployment();
        for next in [Building, Built, Packaging, Packaged, Provisioning, Deployed] {
            d.advance(next).unwrap();
        }
        assert!(d.status.is_terminal());
    }

    #[test]
    fn test_failure_edges() {
        for from in [Building, Packaging, Provisioning] {
            assert!(from.can_transition_to(Failed), "{from} should fail");
        }
        for from in [Pending, Built, Packaged, Deployed, Failed] {
            assert!(!from.can_transition_to(Failed), "{from} should not fail");
        }
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut d = deployment();
        let err = d.advance(Packaging).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: Pending,
                to: Packaging
            }
        ));
        assert_eq!(d.status, Pending);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut d = deployment();
        d.advance(Building).unwrap();
        assert!(d.fail());
        assert!(!d.fail());
        assert!(d.advance(Building).is_err());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("static".parse::<BuildCategory>().unwrap(), BuildCategory::Static);
        assert_eq!(" Dynamic ".parse::<BuildCategory>().unwrap(), BuildCategory::Dynamic);
        assert!("backend".parse::<BuildCategory>().is_err());
    }
}
