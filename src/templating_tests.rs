// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `templating.rs`

#[cfg(test)]
mod tests {
    use crate::glue_errors::GlueError;
    use crate::templating::*;
    use serde_json::json;

    #[test]
    fn test_render_simple_binding() {
        let renderer = TemplateRenderer::new();
        let data = json!({"glueMetadata": {"name": "sample", "namespace": "default"}});

        let out = renderer
            .render("{{ glueMetadata.name }}-copy", &data)
            .unwrap();

        assert_eq!(out, "sample-copy");
    }

    #[test]
    fn test_base64_filters_round_trip() {
        let renderer = TemplateRenderer::new();
        let data = json!({"secret": {"data": {"password": "aGVsbG8="}}});

        let decoded = renderer
            .render("{{ secret.data.password | decodeBase64 }}", &data)
            .unwrap();
        let encoded = renderer.render("{{ 'hello' | encodeBase64 }}", &data).unwrap();

        assert_eq!(decoded, "hello");
        assert_eq!(encoded, "aGVsbG8=");
    }

    #[test]
    fn test_decode_invalid_base64_is_render_error() {
        let renderer = TemplateRenderer::new();

        let result = renderer.render("{{ 'not base64!' | decodeBase64 }}", &json!({}));

        assert!(matches!(result, Err(GlueError::Render { .. })));
    }

    #[test]
    fn test_undefined_binding_is_render_error() {
        let renderer = TemplateRenderer::new();

        let result = renderer.render("{{ configMap1.data.key }}", &json!({}));

        assert!(matches!(result, Err(GlueError::Render { .. })));
    }

    #[test]
    fn test_render_object_preserves_type_of_single_expression() {
        // Arrange
        let renderer = TemplateRenderer::new();
        let data = json!({"parent": {"spec": {"replicas": 3, "image": "nginx"}}});
        let object = json!({
            "spec": {
                "replicas": "{{ parent.spec.replicas }}",
                "image": "registry/{{ parent.spec.image }}",
                "paused": false
            }
        });

        // Act
        let rendered = renderer.render_object(&object, &data).unwrap();

        // Assert
        assert_eq!(rendered["spec"]["replicas"], json!(3));
        assert_eq!(rendered["spec"]["image"], json!("registry/nginx"));
        assert_eq!(rendered["spec"]["paused"], json!(false));
    }

    #[test]
    fn test_render_object_renders_keys_and_lists() {
        let renderer = TemplateRenderer::new();
        let data = json!({"glueMetadata": {"name": "sample"}});
        let object = json!({
            "data": {"{{ glueMetadata.name }}.txt": "x"},
            "items": ["{{ glueMetadata.name }}", "static"]
        });

        let rendered = renderer.render_object(&object, &data).unwrap();

        assert_eq!(rendered["data"]["sample.txt"], json!("x"));
        assert_eq!(rendered["items"], json!(["sample", "static"]));
    }

    #[test]
    fn test_render_object_keeps_empty_expression_as_string() {
        let renderer = TemplateRenderer::new();
        let data = json!({"value": ""});

        let rendered = renderer
            .render_object(&json!({"key": "{{ value }}"}), &data)
            .unwrap();

        assert_eq!(rendered["key"], json!(""));
    }

    #[test]
    fn test_render_yaml_list() {
        let renderer = TemplateRenderer::new();
        let data = json!({"names": ["a", "b"]});
        let template = "{% for n in names %}\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: cm-{{ n }}\n{% endfor %}\n";

        let rendered = renderer.render_yaml(template, &data).unwrap();

        let items = rendered.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["metadata"]["name"], json!("cm-a"));
        assert_eq!(items[1]["metadata"]["name"], json!("cm-b"));
    }

    #[test]
    fn test_parse_yaml_rejects_malformed_output() {
        let result = parse_yaml("key: [unterminated");

        assert!(matches!(result, Err(GlueError::Render { .. })));
    }
}
