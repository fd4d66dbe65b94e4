// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::glue_errors::GlueError;
    use clap::Parser;
    use kube::api::GroupVersionKind;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::try_parse_from(["glue-operator"]).unwrap();

        assert_eq!(config.concurrency, 16);
        assert_eq!(config.field_manager, "glue-operator");
        assert!(config.resource_label_selectors.is_empty());
        assert!(config.default_glue_labels().unwrap().is_empty());
    }

    #[test]
    fn test_label_selectors_parse_per_kind() {
        // Arrange
        let config = OperatorConfig::try_parse_from([
            "glue-operator",
            "--resource-label-selector",
            "v1#ConfigMap=app=web,tier=front",
            "--resource-label-selector",
            "apps/v1#Deployment=team",
        ])
        .unwrap();

        // Act
        let selectors = config.label_selectors().unwrap();

        // Assert
        assert_eq!(
            selectors.get(&GroupVersionKind::gvk("", "v1", "ConfigMap")),
            Some(&"app=web,tier=front".to_string())
        );
        assert_eq!(
            selectors.get(&GroupVersionKind::gvk("apps", "v1", "Deployment")),
            Some(&"team".to_string())
        );
    }

    #[test]
    fn test_malformed_label_selector_entry() {
        let config = OperatorConfig {
            resource_label_selectors: vec!["v1/ConfigMap".to_string()],
            ..Default::default()
        };

        assert!(matches!(
            config.label_selectors(),
            Err(GlueError::Configuration { .. })
        ));
    }

    #[test]
    fn test_default_glue_labels_from_simple_selector() {
        let with_value = OperatorConfig {
            glue_label_selector: Some("team=a".to_string()),
            ..Default::default()
        };
        let key_only = OperatorConfig {
            glue_label_selector: Some("managed".to_string()),
            ..Default::default()
        };

        let with_value = with_value.default_glue_labels().unwrap();
        let key_only = key_only.default_glue_labels().unwrap();

        assert_eq!(with_value.get("team"), Some(&"a".to_string()));
        assert_eq!(key_only.get("managed"), Some(&String::new()));
    }

    #[test]
    fn test_complex_selector_requires_explicit_labels() {
        let complex = OperatorConfig {
            glue_label_selector: Some("team in (a,b)".to_string()),
            ..Default::default()
        };
        let explicit = OperatorConfig {
            glue_label_selector: Some("team in (a,b)".to_string()),
            managed_glue_labels: vec!["team=a".to_string(), "env=prod".to_string()],
            ..Default::default()
        };

        assert!(matches!(
            complex.default_glue_labels(),
            Err(GlueError::Configuration { .. })
        ));
        let labels = explicit.default_glue_labels().unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("env"), Some(&"prod".to_string()));
    }
}
