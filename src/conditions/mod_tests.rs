// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the `conditions` module

#[cfg(test)]
mod tests {
    use crate::conditions::readiness::is_ready;
    use crate::conditions::script::{build_program, to_lua_literal, LuaSandbox, ScriptSandbox};
    use crate::conditions::{parse_bool, ConditionEvaluator};
    use crate::crd::ConditionSpec;
    use crate::glue_errors::GlueError;
    use crate::templating::TemplateRenderer;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new(
            TemplateRenderer::default(),
            Arc::new(LuaSandbox::new(8 * 1024 * 1024, Duration::from_millis(500))),
        )
    }

    fn script(source: &str) -> ConditionSpec {
        ConditionSpec::ScriptCondition {
            script: source.to_string(),
        }
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("  TRUE\n"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_deployment_readiness_follows_replicas() {
        let mut deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 2}
        });
        assert!(!is_ready(Some(&deployment)));

        deployment["status"]["readyReplicas"] = json!(3);
        assert!(is_ready(Some(&deployment)));
    }

    #[test]
    fn test_deployment_without_status_is_not_ready() {
        let deployment = json!({"kind": "Deployment", "spec": {"replicas": 1}});
        assert!(!is_ready(Some(&deployment)));
    }

    #[test]
    fn test_pod_readiness() {
        let running = json!({"kind": "Pod", "status": {"phase": "Running"}});
        let pending = json!({"kind": "Pod", "status": {"phase": "Pending"}});
        let not_ready = json!({
            "kind": "Pod",
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "False"}]
            }
        });

        assert!(is_ready(Some(&running)));
        assert!(!is_ready(Some(&pending)));
        assert!(!is_ready(Some(&not_ready)));
    }

    #[test]
    fn test_configmap_is_ready_when_it_exists() {
        let cm = json!({"apiVersion": "v1", "kind": "ConfigMap", "data": {}});
        assert!(is_ready(Some(&cm)));
        assert!(!is_ready(None));
        assert!(!is_ready(Some(&serde_json::Value::Null)));
    }

    #[test]
    fn test_available_condition_decides_for_other_kinds() {
        let unavailable = json!({
            "kind": "Widget",
            "status": {"conditions": [{"type": "Available", "status": "False"}]}
        });
        assert!(!is_ready(Some(&unavailable)));
    }

    #[test]
    fn test_negated_readiness() {
        let evaluator = evaluator();
        let negated = ConditionSpec::ReadyCondition { negated: true };

        assert!(evaluator.is_met(&negated, None, &json!({})).unwrap());
        assert!(!evaluator
            .is_met(&negated, Some(&json!({"kind": "ConfigMap"})), &json!({}))
            .unwrap());
    }

    #[test]
    fn test_template_condition_sees_target_and_context() {
        let evaluator = evaluator();
        let condition = ConditionSpec::TemplateCondition {
            template: r#"{{ target.data.mode == settings.data.mode }}"#.to_string(),
        };
        let target = json!({"data": {"mode": "blue"}});
        let data = json!({"settings": {"data": {"mode": "blue"}}});

        assert!(evaluator.is_met(&condition, Some(&target), &data).unwrap());
    }

    #[test]
    fn test_template_condition_with_missing_target() {
        let evaluator = evaluator();
        let condition = ConditionSpec::TemplateCondition {
            template: "{{ target is none }}".to_string(),
        };

        assert!(evaluator.is_met(&condition, None, &json!({})).unwrap());
    }

    #[test]
    fn test_script_expression() {
        let evaluator = evaluator();
        let target = json!({"data": {"replicas": "3"}});

        assert!(evaluator
            .is_met(&script(r#"target.data.replicas == "3""#), Some(&target), &json!({}))
            .unwrap());
        assert!(!evaluator
            .is_met(&script("target.data.replicas == \"4\""), Some(&target), &json!({}))
            .unwrap());
    }

    #[test]
    fn test_script_chunk_with_return() {
        let evaluator = evaluator();
        let source = r"
            local total = 0
            for _, v in ipairs(target.items) do
              total = total + v
            end
            return total > 5
        ";
        let target = json!({"items": [1, 2, 3]});

        assert!(evaluator.is_met(&script(source), Some(&target), &json!({})).unwrap());
    }

    #[test]
    fn test_script_sees_sibling_bindings() {
        let evaluator = evaluator();
        let data = json!({
            "configMap1": {"data": {"key": "value1"}},
            "glueMetadata": {"name": "sample", "namespace": "default"}
        });

        let met = evaluator
            .is_met(
                &script(r#"configMap1.data.key == "value1" and glueMetadata.name == "sample""#),
                None,
                &data,
            )
            .unwrap();

        assert!(met);
    }

    #[test]
    fn test_script_missing_target_is_nil() {
        let evaluator = evaluator();
        assert!(evaluator.is_met(&script("target == nil"), None, &json!({})).unwrap());
    }

    #[test]
    fn test_script_runtime_error_is_sandbox_error() {
        let evaluator = evaluator();

        let err = evaluator
            .is_met(&script("target.data.missing.field == 1"), None, &json!({}))
            .unwrap_err();

        assert!(matches!(err, GlueError::Sandbox { .. }));
    }

    #[test]
    fn test_script_cannot_load_code() {
        let evaluator = evaluator();

        let err = evaluator
            .is_met(&script(r#"require("os") ~= nil"#), None, &json!({}))
            .unwrap_err();

        assert!(matches!(err, GlueError::Sandbox { .. }));
    }

    #[test]
    fn test_script_infinite_loop_times_out() {
        let sandbox = LuaSandbox::new(8 * 1024 * 1024, Duration::from_millis(50));

        let result = sandbox.execute("while true do end");

        assert!(matches!(result, Err(GlueError::Sandbox { .. })));
    }

    #[test]
    fn test_script_has_no_print() {
        let sandbox = LuaSandbox::new(8 * 1024 * 1024, Duration::from_millis(500));

        let result = sandbox.execute("print('hello') emit('done')");

        assert!(matches!(result, Err(GlueError::Sandbox { .. })));
        assert_eq!(
            sandbox.execute("emit(tostring(print == nil))").unwrap(),
            "true"
        );
    }

    #[test]
    fn test_script_memory_limit() {
        let sandbox = LuaSandbox::new(1024 * 1024, Duration::from_secs(5));

        let result = sandbox.execute(
            r#"local t = {} for i = 1, 10000000 do t[i] = string.rep("x", 64) .. i end emit("done")"#,
        );

        assert!(matches!(result, Err(GlueError::Sandbox { .. })));
    }

    #[test]
    fn test_script_bindings_named_after_builtins() {
        let evaluator = evaluator();
        let data = json!({
            "emit": {"data": {"key": "a"}},
            "tostring": {"data": {"key": "b"}}
        });

        let met = evaluator
            .is_met(&script(r#"emit.data.key == "a" and tostring.data.key == "b""#), None, &data)
            .unwrap();

        assert!(met);
    }

    #[test]
    fn test_script_with_many_bindings() {
        let evaluator = evaluator();
        let mut bindings = serde_json::Map::new();
        for i in 0..300 {
            bindings.insert(format!("configMap{i}"), json!({"data": {"index": i}}));
        }
        let data = serde_json::Value::Object(bindings);

        let met = evaluator
            .is_met(&script("configMap299.data.index == 299"), None, &data)
            .unwrap();

        assert!(met);
    }

    #[test]
    fn test_build_program_skips_invalid_identifiers() {
        let data = json!({
            "good_name": 1,
            "bad-name": 2,
            "end": 3
        });

        let program = build_program("true", None, &data);

        assert!(program.contains("\ntarget = nil\n"));
        assert!(program.contains("\ngood_name = 1\n"));
        assert!(!program.contains("bad-name"));
        assert!(!program.contains("\nend = 3"));
        assert!(program.contains("return true"));
    }

    #[test]
    fn test_lua_literal_escapes_strings() {
        let literal = to_lua_literal(&json!({"k": "a\"b\n"}));
        assert_eq!(literal, r#"{["k"] = "a\"b\n"}"#);
        assert_eq!(to_lua_literal(&json!([1, null, true])), "{1, nil, true}");
    }
}
