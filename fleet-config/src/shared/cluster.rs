use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// `config_path` value telling the bootstrap to use the pod's service account credentials.
pub const IN_CLUSTER_CONFIG_PATH: &str = "in-cluster";

/// A cluster declared in the static configuration file.
///
/// Declared clusters are materialised as read-only records at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDeclaration {
    /// Stable identifier. Non-UUID values are mapped to a deterministic UUID.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Path of the kubeconfig file, or [`IN_CLUSTER_CONFIG_PATH`].
    ///
    /// The lowercase aliases match camelCase keys after the file loader has lowercased them.
    #[serde(alias = "configpath", alias = "configPath")]
    pub config_path: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub description: String,
    /// Candidate for the initial active cluster when none is configured.
    #[serde(default, alias = "isactive", alias = "isActive")]
    pub is_active: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ClusterDeclaration {
    pub fn is_in_cluster(&self) -> bool {
        self.config_path == IN_CLUSTER_CONFIG_PATH
    }
}

/// Checks that every declaration has a name and that names are unique.
pub fn validate_cluster_declarations(
    declarations: &[ClusterDeclaration],
) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(declarations.len());
    for declaration in declarations {
        if declaration.name.trim().is_empty() {
            return Err(ValidationError::UnnamedClusterDeclaration);
        }
        if !seen.insert(declaration.name.as_str()) {
            return Err(ValidationError::DuplicateClusterDeclaration(
                declaration.name.clone(),
            ));
        }
    }

    Ok(())
}

/// Tuning of the cluster connection cache and its health prober.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterManagerConfig {
    /// Seconds between two health probe rounds.
    pub health_check_interval_secs: u64,
    /// Deadline of a single discovery probe.
    pub probe_timeout_secs: u64,
    /// Deadline for turning a kubeconfig into a client bundle.
    pub build_timeout_secs: u64,
    /// Deadline of a single cluster store call.
    pub store_timeout_secs: u64,
    /// Number of clusters probed concurrently during a health round.
    pub max_concurrent_probes: usize,
}

impl Default for ClusterManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            probe_timeout_secs: 5,
            build_timeout_secs: 5,
            store_timeout_secs: 10,
            max_concurrent_probes: 1,
        }
    }
}

impl ClusterManagerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.health_check_interval_secs == 0 {
            return Err(ValidationError::ZeroDuration("health_check_interval_secs"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ValidationError::ZeroDuration("probe_timeout_secs"));
        }
        if self.build_timeout_secs == 0 {
            return Err(ValidationError::ZeroDuration("build_timeout_secs"));
        }
        if self.store_timeout_secs == 0 {
            return Err(ValidationError::ZeroDuration("store_timeout_secs"));
        }

        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Never returns zero so a misconfigured value still probes sequentially.
    pub fn probe_concurrency(&self) -> usize {
        self.max_concurrent_probes.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(name: &str) -> ClusterDeclaration {
        ClusterDeclaration {
            id: None,
            name: name.to_string(),
            config_path: "/etc/kube/config".to_string(),
            provider: String::new(),
            environment: String::new(),
            region: String::new(),
            description: String::new(),
            is_active: false,
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn declarations_accept_camel_case_keys() {
        let yaml = r#"
name: prod
configPath: in-cluster
isActive: true
labels:
  team: platform
"#;
        let declaration: ClusterDeclaration = serde_yaml::from_str(yaml).unwrap();

        assert!(declaration.is_active);
        assert!(declaration.is_in_cluster());
        assert_eq!(declaration.labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(declaration.id, None);
    }

    #[test]
    fn declarations_accept_lowercased_keys() {
        let yaml = "name: prod\nconfigpath: /etc/kube/prod\nisactive: true\n";

        let declaration: ClusterDeclaration = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(declaration.config_path, "/etc/kube/prod");
        assert!(declaration.is_active);
    }

    #[test]
    fn duplicate_declaration_names_are_rejected() {
        let declarations = vec![declaration("dev"), declaration("dev")];

        let result = validate_cluster_declarations(&declarations);

        assert!(matches!(
            result,
            Err(ValidationError::DuplicateClusterDeclaration(name)) if name == "dev"
        ));
    }

    #[test]
    fn unnamed_declarations_are_rejected() {
        let declarations = vec![declaration(" ")];

        assert!(matches!(
            validate_cluster_declarations(&declarations),
            Err(ValidationError::UnnamedClusterDeclaration)
        ));
    }

    #[test]
    fn manager_config_defaults_are_valid() {
        let config = ClusterManagerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.store_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn zero_probe_timeout_is_rejected() {
        let config = ClusterManagerConfig {
            probe_timeout_secs: 0,
            ..ClusterManagerConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::ZeroDuration("probe_timeout_secs"))
        ));
    }
}
