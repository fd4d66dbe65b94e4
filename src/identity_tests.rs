// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `identity.rs`

#[cfg(test)]
mod tests {
    use crate::crd::ChildResourceSpec;
    use crate::glue_errors::GlueError;
    use crate::identity::*;
    use crate::templating::TemplateRenderer;
    use kube::api::GroupVersionKind;
    use serde_json::json;

    fn template_child(template: &str) -> ChildResourceSpec {
        ChildResourceSpec {
            name: "child".to_string(),
            resource_template: Some(template.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_gvk_from_api_version() {
        assert_eq!(
            gvk_from_api_version("apps/v1", "Deployment"),
            GroupVersionKind::gvk("apps", "v1", "Deployment")
        );
        assert_eq!(
            gvk_from_api_version("v1", "ConfigMap"),
            GroupVersionKind::gvk("", "v1", "ConfigMap")
        );
    }

    #[test]
    fn test_simple_gvk_string() {
        assert_eq!(
            simple_gvk_string(&GroupVersionKind::gvk("apps", "v1", "Deployment")),
            "apps/v1#Deployment"
        );
        assert_eq!(
            simple_gvk_string(&GroupVersionKind::gvk("", "v1", "ConfigMap")),
            "v1#ConfigMap"
        );
    }

    #[test]
    fn test_child_gvk_from_static_resource() {
        let child = ChildResourceSpec {
            name: "cm".to_string(),
            resource: Some(json!({"apiVersion": "v1", "kind": "ConfigMap"})),
            ..Default::default()
        };

        assert_eq!(
            child_gvk(&child).unwrap(),
            GroupVersionKind::gvk("", "v1", "ConfigMap")
        );
    }

    #[test]
    fn test_child_gvk_scans_template_and_bulk_list() {
        let single = template_child("apiVersion: \"apps/v1\"\nkind: Deployment\nmetadata:\n  name: x\n");
        let bulk = template_child(
            "{% for n in names %}\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: \"{{ n }}\"\n{% endfor %}\n",
        );

        assert_eq!(
            child_gvk(&single).unwrap(),
            GroupVersionKind::gvk("apps", "v1", "Deployment")
        );
        assert_eq!(
            child_gvk(&bulk).unwrap(),
            GroupVersionKind::gvk("", "v1", "ConfigMap")
        );
    }

    #[test]
    fn test_child_gvk_ignores_nested_keys() {
        let child = template_child(
            "metadata:\n  name: x\n  labels:\n    kind: fancy\n    apiVersion: v9\napiVersion: v1\nkind: ConfigMap\n",
        );
        let items = template_child(
            "items:\n{% for n in names %}\n  - apiVersion: v1\n    kind: Secret\n    metadata:\n      labels:\n        kind: nested\n{% endfor %}\n",
        );

        assert_eq!(
            child_gvk(&child).unwrap(),
            GroupVersionKind::gvk("", "v1", "ConfigMap")
        );
        assert_eq!(
            child_gvk(&items).unwrap(),
            GroupVersionKind::gvk("", "v1", "Secret")
        );
    }

    #[test]
    fn test_instance_id_display() {
        assert_eq!(InstanceId::new("sample", "default").to_string(), "default/sample");
    }

    #[test]
    fn test_child_gvk_missing_kind_is_validation_error() {
        let child = template_child("apiVersion: v1\nmetadata:\n  name: x\n");

        assert!(matches!(
            child_gvk(&child),
            Err(GlueError::Validation { .. })
        ));
    }

    #[test]
    fn test_resolve_child_renders_templated_name() {
        // Arrange
        let child = template_child(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  labels:\n    name: ignored\n  name: \"{{ parent.metadata.name }}-cm\"\ndata:\n  name: also-ignored\n",
        );
        let data = json!({"parent": {"metadata": {"name": "web"}}});

        // Act
        let identity =
            resolve_child(&child, &data, &TemplateRenderer::new(), "default").unwrap();

        // Assert
        assert_eq!(identity.name, "web-cm");
        assert_eq!(identity.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn test_resolve_child_explicit_namespace_and_cluster_scope() {
        let renderer = TemplateRenderer::new();
        let namespaced = ChildResourceSpec {
            name: "cm".to_string(),
            resource: Some(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "cm-1", "namespace": "other"}
            })),
            ..Default::default()
        };
        let cluster = ChildResourceSpec {
            name: "ns".to_string(),
            cluster_scoped: true,
            resource: Some(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "team-a"}
            })),
            ..Default::default()
        };

        let namespaced = resolve_child(&namespaced, &json!({}), &renderer, "default").unwrap();
        let cluster = resolve_child(&cluster, &json!({}), &renderer, "default").unwrap();

        assert_eq!(namespaced.namespace.as_deref(), Some("other"));
        assert_eq!(cluster.namespace, None);
        assert_eq!(cluster.name, "team-a");
    }

    #[test]
    fn test_resolve_child_undefined_binding_names_the_child() {
        let child = template_child("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: \"{{ missing.name }}\"\n");

        let result = resolve_child(&child, &json!({}), &TemplateRenderer::new(), "default");

        match result {
            Err(GlueError::Render { resource, .. }) => assert_eq!(resource, "child"),
            other => panic!("expected render error, got {other:?}"),
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My_App-WebPage"), "my-app-webpage");
        assert_eq!(sanitize_name("--web.page--"), "web.page");
        assert_eq!(sanitize_name(&"a".repeat(80)).len(), 63);
    }

}
