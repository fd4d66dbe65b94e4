// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for workflow error types.

#[cfg(test)]
mod tests {
    use crate::glue_errors::*;

    #[test]
    fn test_non_unique_names_message_lists_duplicates() {
        let error = GlueError::NonUniqueNames {
            duplicates: vec!["cm".to_string(), "secret".to_string()],
        };

        assert_eq!(error.to_string(), "Non unique names found: cm,secret");
    }

    #[test]
    fn test_validation_errors_are_terminal() {
        assert!(!GlueError::NonUniqueNames {
            duplicates: vec!["cm".to_string()]
        }
        .is_retryable());
        assert!(!GlueError::validation("bulk without template").is_retryable());
    }

    #[test]
    fn test_render_and_sandbox_errors_are_retried() {
        assert!(GlueError::render("configMap1", "undefined value").is_retryable());
        assert!(GlueError::Sandbox {
            reason: "syntax error".to_string()
        }
        .is_retryable());
        assert!(GlueError::configuration("selector conflict").is_retryable());
    }

    #[test]
    fn test_routing_ambiguity_message() {
        let error = GlueError::RoutingAmbiguity {
            resource: "configMap1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "cm-1".to_string(),
            count: 2,
        };

        assert_eq!(
            error.to_string(),
            "Child resource 'configMap1' matches 2 observed ConfigMap objects named 'cm-1'"
        );
    }

    #[test]
    fn test_aggregate_joins_node_failures() {
        let error = GlueError::Aggregate(vec![
            NodeFailure {
                resource: "a".to_string(),
                error: GlueError::render("a", "boom"),
            },
            NodeFailure {
                resource: "b".to_string(),
                error: GlueError::Sandbox {
                    reason: "bad".to_string(),
                },
            },
        ]);

        assert_eq!(
            error.to_string(),
            "2 resource(s) failed to reconcile: a: Failed to render 'a': boom; b: Script condition failed: bad"
        );
    }

    #[test]
    fn test_aggregate_retryable_when_any_failure_is() {
        let terminal_only = GlueError::Aggregate(vec![NodeFailure {
            resource: "a".to_string(),
            error: GlueError::validation("x"),
        }]);
        let mixed = GlueError::Aggregate(vec![
            NodeFailure {
                resource: "a".to_string(),
                error: GlueError::validation("x"),
            },
            NodeFailure {
                resource: "b".to_string(),
                error: GlueError::render("b", "y"),
            },
        ]);

        assert!(!terminal_only.is_retryable());
        assert!(mixed.is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(GlueError::validation("x").category(), "validation_error");
        assert_eq!(GlueError::render("a", "x").category(), "render_error");
        assert_eq!(
            GlueError::CleanupPending {
                name: "g".to_string()
            }
            .category(),
            "cleanup_pending"
        );
    }
}
