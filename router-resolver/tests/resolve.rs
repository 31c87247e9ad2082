//! End-to-end resolver tests: plan + raw data in, response document out.

use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use router_resolver::plan::ArrayNode;
use router_resolver::plan::CustomNode;
use router_resolver::plan::CustomResolve;
use router_resolver::plan::Field;
use router_resolver::plan::FieldInfo;
use router_resolver::plan::FieldSource;
use router_resolver::plan::LeafNode;
use router_resolver::plan::Node;
use router_resolver::plan::ObjectNode;
use router_resolver::plan::StringNode;
use router_resolver::AuthorizationDeny;
use router_resolver::Authorizer;
use router_resolver::Context;
use router_resolver::GraphCoordinate;
use router_resolver::OperationKind;
use router_resolver::PostProcessingConfiguration;
use router_resolver::RateLimitOptions;
use router_resolver::RateLimiter;
use router_resolver::RenameTypeName;
use router_resolver::Resolvable;
use router_resolver::ResolveError;
use router_resolver::ResolveStats;
use router_resolver::TraceProvider;
use router_resolver::TracingOptions;
use serde_json_bytes::json;
use serde_json_bytes::Value;
use tower::BoxError;

fn segments(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn string_field(name: &str, nullable: bool) -> Field {
    Field {
        name: name.into(),
        value: Node::String(StringNode {
            path: segments(&[name]),
            nullable,
            ..StringNode::default()
        }),
        ..Field::default()
    }
}

fn typename_field() -> Field {
    Field {
        name: "__typename".into(),
        value: Node::String(StringNode {
            path: segments(&["__typename"]),
            nullable: false,
            is_typename: true,
            ..StringNode::default()
        }),
        ..Field::default()
    }
}

fn object_field(name: &str, nullable: bool, fields: Vec<Field>) -> Field {
    Field {
        name: name.into(),
        value: Node::Object(Box::new(ObjectNode {
            path: segments(&[name]),
            nullable,
            fields,
        })),
        ..Field::default()
    }
}

fn root(fields: Vec<Field>) -> ObjectNode {
    ObjectNode {
        path: Vec::new(),
        nullable: false,
        fields,
    }
}

fn resolve_to_string(
    resolvable: &mut Resolvable,
    ctx: &mut Context,
    plan: &ObjectNode,
) -> String {
    let mut out = Vec::new();
    resolvable
        .resolve(ctx, plan, &ObjectNode::default(), &mut out)
        .expect("resolve");
    String::from_utf8(out).expect("valid UTF-8 output")
}

fn resolve_document(plan: &ObjectNode, data: &str) -> String {
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init(&ctx, Some(data.as_bytes()), OperationKind::Query)
        .expect("init");
    resolve_to_string(&mut resolvable, &mut ctx, plan)
}

#[derive(Default)]
struct TestAuthorizer {
    deny: Vec<(GraphCoordinate, Option<String>)>,
    calls: AtomicUsize,
    seen_objects: Mutex<Vec<String>>,
    extension: Option<&'static str>,
    fail: bool,
}

impl Authorizer for TestAuthorizer {
    fn has_response_extension_data(&self, _ctx: &Context) -> bool {
        self.extension.is_some()
    }

    fn render_response_extension(
        &self,
        _ctx: &Context,
        out: &mut dyn io::Write,
    ) -> Result<(), BoxError> {
        out.write_all(self.extension.unwrap_or("null").as_bytes())?;
        Ok(())
    }

    fn authorize_object_field(
        &self,
        _ctx: &Context,
        _data_source_id: &str,
        object: &[u8],
        coordinate: &GraphCoordinate,
    ) -> Result<Option<AuthorizationDeny>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_objects
            .lock()
            .expect("lock")
            .push(String::from_utf8_lossy(object).into_owned());
        if self.fail {
            return Err("authorizer unavailable".into());
        }
        let deny = self
            .deny
            .iter()
            .find(|(candidate, _)| candidate == coordinate)
            .map(|(_, reason)| AuthorizationDeny {
                reason: reason.clone(),
            });
        Ok(deny)
    }
}

struct TestRateLimiter;

impl RateLimiter for TestRateLimiter {
    fn render_response_extension(
        &self,
        _ctx: &Context,
        out: &mut dyn io::Write,
    ) -> Result<(), BoxError> {
        out.write_all(br#"{"remaining":9}"#)?;
        Ok(())
    }
}

struct TestTraceProvider;

impl TraceProvider for TestTraceProvider {
    fn get_trace(&self, _ctx: &Context, _fetch_tree: &ObjectNode, debug: bool) -> Value {
        json!({"fetch":"tree","debug":debug})
    }
}

#[test]
fn happy_path() {
    let plan = root(vec![object_field("me", false, vec![string_field("name", true)])]);
    assert_eq!(
        resolve_document(&plan, r#"{"me":{"name":"Ada"}}"#),
        r#"{"data":{"me":{"name":"Ada"}}}"#,
    );
}

#[test]
fn non_nullable_leaf_missing_nulls_data() {
    let plan = root(vec![object_field("me", false, vec![string_field("name", false)])]);
    assert_eq!(
        resolve_document(&plan, r#"{"me":{}}"#),
        r#"{"errors":[{"message":"Cannot return null for non-nullable field Query.me.name.","path":["me","name"]}],"data":null}"#,
    );
}

#[test]
fn explicit_null_follows_the_same_rules_as_missing() {
    let plan = root(vec![object_field("me", false, vec![string_field("name", false)])]);
    assert_eq!(
        resolve_document(&plan, r#"{"me":{"name":null}}"#),
        r#"{"errors":[{"message":"Cannot return null for non-nullable field Query.me.name.","path":["me","name"]}],"data":null}"#,
    );
}

#[test]
fn type_mismatch_on_integer() {
    let plan = root(vec![Field {
        name: "n".into(),
        value: Node::Integer(LeafNode {
            path: segments(&["n"]),
            nullable: true,
        }),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"n":"oops"}"#),
        r#"{"errors":[{"message":"Int cannot represent non-integer value: \"oops\"","path":["n"]}],"data":null}"#,
    );
}

#[test]
fn type_mismatch_inside_nullable_parent_bubbles_only_to_the_parent() {
    let plan = root(vec![object_field(
        "me",
        true,
        vec![Field {
            name: "age".into(),
            value: Node::Integer(LeafNode {
                path: segments(&["age"]),
                nullable: false,
            }),
            ..Field::default()
        }],
    )]);
    assert_eq!(
        resolve_document(&plan, r#"{"me":{"age":true}}"#),
        r#"{"errors":[{"message":"Int cannot represent non-integer value: \"true\"","path":["me","age"]}],"data":{"me":null}}"#,
    );
}

#[test]
fn object_kind_mismatch() {
    let plan = root(vec![object_field("me", true, vec![string_field("name", true)])]);
    assert_eq!(
        resolve_document(&plan, r#"{"me":42}"#),
        r#"{"errors":[{"message":"Object cannot represent non-object value.","path":["me"]}],"data":null}"#,
    );
}

#[test]
fn boolean_and_float_kind_mismatches() {
    let plan = root(vec![Field {
        name: "flag".into(),
        value: Node::Boolean(LeafNode {
            path: segments(&["flag"]),
            nullable: true,
        }),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"flag":"yes"}"#),
        r#"{"errors":[{"message":"Bool cannot represent non-boolean value: \"yes\"","path":["flag"]}],"data":null}"#,
    );

    let plan = root(vec![Field {
        name: "ratio".into(),
        value: Node::Float(LeafNode {
            path: segments(&["ratio"]),
            nullable: true,
        }),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"ratio":"0.5"}"#),
        r#"{"errors":[{"message":"Float cannot represent non-float value: \"0.5\"","path":["ratio"]}],"data":null}"#,
    );
}

#[test]
fn skip_directive_omits_the_field() {
    let plan = root(vec![
        string_field("kept", true),
        Field {
            skip_variable_name: Some("s".to_string()),
            ..string_field("skipped", true)
        },
    ]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder()
        .variables(Bytes::from(r#"{"s":true}"#))
        .build();
    resolvable
        .init(
            &ctx,
            Some(br#"{"kept":"a","skipped":"b"}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"data":{"kept":"a"}}"#,
    );
}

#[test]
fn include_directive_requires_a_literal_true() {
    let plan = root(vec![
        Field {
            include_variable_name: Some("yes".to_string()),
            ..string_field("a", true)
        },
        Field {
            include_variable_name: Some("no".to_string()),
            ..string_field("b", true)
        },
        Field {
            include_variable_name: Some("other".to_string()),
            ..string_field("c", true)
        },
        Field {
            include_variable_name: Some("missing".to_string()),
            ..string_field("d", true)
        },
    ]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder()
        .variables(Bytes::from(r#"{"yes":true,"no":false,"other":"x"}"#))
        .build();
    resolvable
        .init(
            &ctx,
            Some(br#"{"a":"1","b":"2","c":"3","d":"4"}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"data":{"a":"1"}}"#,
    );
}

#[test]
fn type_condition_skips_non_matching_typename() {
    let plan = root(vec![object_field(
        "media",
        false,
        vec![
            typename_field(),
            Field {
                on_type_names: Some(vec!["Video".into()]),
                ..string_field("duration", true)
            },
            Field {
                on_type_names: Some(vec!["Question".into(), "Article".into()]),
                ..string_field("title", true)
            },
        ],
    )]);
    assert_eq!(
        resolve_document(
            &plan,
            r#"{"media":{"__typename":"Question","duration":"90s","title":"How?"}}"#,
        ),
        r#"{"data":{"media":{"__typename":"Question","title":"How?"}}}"#,
    );
}

#[test]
fn type_condition_with_missing_typename_skips_without_error() {
    let plan = root(vec![object_field(
        "media",
        false,
        vec![Field {
            on_type_names: Some(vec!["Video".into()]),
            ..string_field("duration", false)
        }],
    )]);
    assert_eq!(
        resolve_document(&plan, r#"{"media":{"duration":"90s"}}"#),
        r#"{"data":{"media":{}}}"#,
    );
}

#[test]
fn typename_rewriting_applies_rename_rules() {
    let plan = root(vec![object_field("media", false, vec![typename_field()])]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder()
        .rename_type_names(vec![RenameTypeName {
            from: "Question_internal".into(),
            to: "Question".into(),
        }])
        .build();
    resolvable
        .init(
            &ctx,
            Some(br#"{"media":{"__typename":"Question_internal"}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"data":{"media":{"__typename":"Question"}}}"#,
    );
}

#[test]
fn array_order_is_preserved_and_indices_appear_in_error_paths() {
    let item = ObjectNode {
        path: Vec::new(),
        nullable: false,
        fields: vec![string_field("name", false)],
    };
    let plan = root(vec![Field {
        name: "items".into(),
        value: Node::Array(Box::new(ArrayNode {
            path: segments(&["items"]),
            nullable: true,
            item: Node::Object(Box::new(item)),
        })),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"items":[{"name":"a"},{}]}"#),
        r#"{"errors":[{"message":"Cannot return null for non-nullable field Query.items.name.","path":["items",1,"name"]}],"data":{"items":null}}"#,
    );
}

#[test]
fn array_kind_mismatch() {
    let plan = root(vec![Field {
        name: "items".into(),
        value: Node::Array(Box::new(ArrayNode {
            path: segments(&["items"]),
            nullable: true,
            item: Node::String(StringNode::default()),
        })),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"items":{"not":"an array"}}"#),
        r#"{"errors":[{"message":"Array cannot represent non-array value.","path":["items"]}],"data":null}"#,
    );
}

#[test]
fn big_int_passes_through_untouched() {
    let plan = root(vec![Field {
        name: "n".into(),
        value: Node::BigInt(LeafNode {
            path: segments(&["n"]),
            nullable: false,
        }),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"n":170141183460469231731687303715884105727}"#),
        r#"{"data":{"n":170141183460469231731687303715884105727}}"#,
    );
}

#[test]
fn scalar_embeds_non_primitive_values() {
    let plan = root(vec![Field {
        name: "meta".into(),
        value: Node::Scalar(LeafNode {
            path: segments(&["meta"]),
            nullable: false,
        }),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"meta":{"tags":["a","b"],"weight":1.5}}"#),
        r#"{"data":{"meta":{"tags":["a","b"],"weight":1.5}}}"#,
    );
}

#[test]
fn unescape_response_json_embeds_valid_json_only() {
    let embedded = Field {
        name: "payload".into(),
        value: Node::String(StringNode {
            path: segments(&["payload"]),
            nullable: false,
            unescape_response_json: true,
            ..StringNode::default()
        }),
        ..Field::default()
    };
    let plan = root(vec![embedded]);
    assert_eq!(
        resolve_document(&plan, r#"{"payload":"{\"a\":1}"}"#),
        r#"{"data":{"payload":{"a":1}}}"#,
    );
    assert_eq!(
        resolve_document(&plan, r#"{"payload":"not json"}"#),
        r#"{"data":{"payload":"not json"}}"#,
    );
}

#[test]
fn empty_object_and_empty_array_nodes() {
    let plan = root(vec![
        Field {
            name: "o".into(),
            value: Node::EmptyObject,
            ..Field::default()
        },
        Field {
            name: "a".into(),
            value: Node::EmptyArray,
            ..Field::default()
        },
    ]);
    assert_eq!(resolve_document(&plan, r#"{}"#), r#"{"data":{"o":{},"a":[]}}"#);
}

struct WrappingResolver;

impl CustomResolve for WrappingResolver {
    fn resolve(&self, _ctx: &Context, value: &[u8]) -> Result<Vec<u8>, BoxError> {
        let mut out = Vec::from(&b"{\"wrapped\":"[..]);
        out.extend_from_slice(value);
        out.push(b'}');
        Ok(out)
    }
}

struct FailingResolver;

impl CustomResolve for FailingResolver {
    fn resolve(&self, _ctx: &Context, _value: &[u8]) -> Result<Vec<u8>, BoxError> {
        Err("boom".into())
    }
}

#[test]
fn custom_node_embeds_resolver_output() {
    let plan = root(vec![Field {
        name: "n".into(),
        value: Node::Custom(CustomNode {
            path: segments(&["n"]),
            nullable: false,
            resolver: Arc::new(WrappingResolver),
        }),
        ..Field::default()
    }]);
    assert_eq!(
        resolve_document(&plan, r#"{"n":42}"#),
        r#"{"data":{"n":{"wrapped":42}}}"#,
    );
}

#[test]
fn custom_node_failure_is_recorded_and_propagates_null() {
    let plan = root(vec![object_field(
        "me",
        true,
        vec![Field {
            name: "n".into(),
            value: Node::Custom(CustomNode {
                path: segments(&["n"]),
                nullable: false,
                resolver: Arc::new(FailingResolver),
            }),
            ..Field::default()
        }],
    )]);
    assert_eq!(
        resolve_document(&plan, r#"{"me":{"n":42}}"#),
        r#"{"errors":[{"message":"boom","path":["me","n"]}],"data":{"me":null}}"#,
    );
}

fn authorized_field(name: &str, nullable: bool, data_source: &str, parent_type: &str) -> Field {
    Field {
        info: Some(FieldInfo {
            exact_parent_type_name: parent_type.to_string(),
            source: FieldSource {
                ids: vec![data_source.to_string()],
            },
            has_authorization_rule: true,
        }),
        ..string_field(name, nullable)
    }
}

#[test]
fn authorization_deny_on_nullable_field() {
    let plan = root(vec![object_field(
        "me",
        false,
        vec![
            typename_field(),
            string_field("id", false),
            authorized_field("realName", true, "ds-1", "User"),
        ],
    )]);
    let authorizer = Arc::new(TestAuthorizer {
        deny: vec![(
            GraphCoordinate {
                type_name: "User".to_string(),
                field_name: "realName".to_string(),
            },
            Some("forbidden".to_string()),
        )],
        ..TestAuthorizer::default()
    });
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder().authorizer(authorizer.clone()).build();
    resolvable
        .init(
            &ctx,
            Some(br#"{"me":{"__typename":"User","id":"u1","realName":"Ada"}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"errors":[{"message":"Unauthorized to load field 'Query.me.realName', Reason: forbidden.","path":["me","realName"]}],"data":{"me":{"__typename":"User","id":"u1","realName":null}}}"#,
    );
    assert_eq!(authorizer.calls.load(Ordering::SeqCst), 1);
    // The authorizer sees the parent object flat: primitives only.
    assert_eq!(
        authorizer.seen_objects.lock().expect("lock").as_slice(),
        [r#"{"__typename":"User","id":"u1","realName":"Ada"}"#.to_string()],
    );

    let subgraph_errors = ctx.subgraph_errors();
    assert_eq!(subgraph_errors.len(), 1);
    assert_eq!(subgraph_errors[0].data_source_id, "ds-1");
    assert_eq!(subgraph_errors[0].field_path, "Query.me.realName");
    assert_eq!(subgraph_errors[0].reason.as_deref(), Some("forbidden"));
}

#[test]
fn authorization_deny_without_reason_on_non_nullable_root_field() {
    let plan = root(vec![object_field(
        "me",
        false,
        vec![authorized_field("secret", false, "ds-1", "User")],
    )]);
    let authorizer = Arc::new(TestAuthorizer {
        deny: vec![(
            GraphCoordinate {
                type_name: "User".to_string(),
                field_name: "secret".to_string(),
            },
            None,
        )],
        ..TestAuthorizer::default()
    });
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder().authorizer(authorizer).build();
    resolvable
        .init(
            &ctx,
            Some(br#"{"me":{"__typename":"User","secret":"s"}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"errors":[{"message":"Unauthorized to load field 'Query.me.secret'.","path":["me","secret"]}],"data":null}"#,
    );
}

#[test]
fn authorization_deny_in_nullable_parent_nulls_the_parent() {
    let plan = root(vec![object_field(
        "me",
        true,
        vec![authorized_field("secret", false, "ds-1", "User")],
    )]);
    let authorizer = Arc::new(TestAuthorizer {
        deny: vec![(
            GraphCoordinate {
                type_name: "User".to_string(),
                field_name: "secret".to_string(),
            },
            None,
        )],
        ..TestAuthorizer::default()
    });
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder().authorizer(authorizer).build();
    resolvable
        .init(
            &ctx,
            Some(br#"{"me":{"__typename":"User","secret":"s"}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"errors":[{"message":"Unauthorized to load field 'Query.me.secret'.","path":["me","secret"]}],"data":{"me":null}}"#,
    );
}

#[test]
fn authorization_decisions_are_cached_per_coordinate() {
    let item = ObjectNode {
        path: Vec::new(),
        nullable: false,
        fields: vec![
            typename_field(),
            authorized_field("secret", true, "ds-1", "User"),
        ],
    };
    let plan = root(vec![Field {
        name: "users".into(),
        value: Node::Array(Box::new(ArrayNode {
            path: segments(&["users"]),
            nullable: false,
            item: Node::Object(Box::new(item)),
        })),
        ..Field::default()
    }]);
    let authorizer = Arc::new(TestAuthorizer {
        deny: vec![(
            GraphCoordinate {
                type_name: "User".to_string(),
                field_name: "secret".to_string(),
            },
            None,
        )],
        ..TestAuthorizer::default()
    });
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder().authorizer(authorizer.clone()).build();
    resolvable
        .init(
            &ctx,
            Some(
                br#"{"users":[{"__typename":"User","secret":"a"},{"__typename":"User","secret":"b"}]}"#
                    .as_slice(),
            ),
            OperationKind::Query,
        )
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"errors":[{"message":"Unauthorized to load field 'Query.users.secret'.","path":["users",0,"secret"]},{"message":"Unauthorized to load field 'Query.users.secret'.","path":["users",1,"secret"]}],"data":{"users":[{"__typename":"User","secret":null},{"__typename":"User","secret":null}]}}"#,
    );
    // One upstream decision for two denied fields.
    assert_eq!(authorizer.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn authorizer_failure_aborts_the_request() {
    let plan = root(vec![object_field(
        "me",
        false,
        vec![authorized_field("secret", true, "ds-1", "User")],
    )]);
    let authorizer = Arc::new(TestAuthorizer {
        fail: true,
        ..TestAuthorizer::default()
    });
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder().authorizer(authorizer).build();
    resolvable
        .init(
            &ctx,
            Some(br#"{"me":{"secret":"s"}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    let mut out: Vec<u8> = Vec::new();
    let result = resolvable.resolve(&mut ctx, &plan, &ObjectNode::default(), &mut out);
    assert!(matches!(result, Err(ResolveError::Authorization(_))));
    // Nothing was written.
    assert!(out.is_empty());
}

#[test]
fn extensions_are_written_in_fixed_order() {
    let plan = root(vec![string_field("ok", false)]);
    let authorizer = Arc::new(TestAuthorizer {
        extension: Some(r#"{"missingScopes":["read:users"]}"#),
        ..TestAuthorizer::default()
    });
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::builder()
        .authorizer(authorizer)
        .rate_limiter(Arc::new(TestRateLimiter))
        .trace_provider(Arc::new(TestTraceProvider))
        .rate_limit_options(RateLimitOptions {
            enabled: true,
            include_stats_in_response_extension: true,
        })
        .tracing_options(TracingOptions {
            enabled: true,
            include_trace_output_in_response_extensions: true,
            debug: false,
        })
        .build();
    resolvable
        .init(&ctx, Some(br#"{"ok":"yes"}"#.as_slice()), OperationKind::Query)
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"data":{"ok":"yes"},"extensions":{"authorization":{"missingScopes":["read:users"]},"rateLimit":{"remaining":9},"trace":{"fetch":"tree","debug":false}}}"#,
    );
}

#[test]
fn extensions_are_omitted_when_inactive() {
    let plan = root(vec![string_field("ok", false)]);
    let mut resolvable = Resolvable::new();
    // Rate limiting enabled but stats not requested; tracing requested but
    // no provider.
    let mut ctx = Context::builder()
        .rate_limiter(Arc::new(TestRateLimiter))
        .rate_limit_options(RateLimitOptions {
            enabled: true,
            include_stats_in_response_extension: false,
        })
        .build();
    resolvable
        .init(&ctx, Some(br#"{"ok":"yes"}"#.as_slice()), OperationKind::Query)
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"data":{"ok":"yes"}}"#,
    );
}

#[test]
fn subscription_init_merges_extracted_data_and_errors() {
    let plan = root(vec![Field {
        name: "counter".into(),
        value: Node::Integer(LeafNode {
            path: segments(&["counter"]),
            nullable: false,
        }),
        ..Field::default()
    }]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init_subscription(
            &ctx,
            br#"{"payload":{"data":{"counter":7},"errors":[{"message":"upstream hiccup"}]}}"#,
            &PostProcessingConfiguration {
                select_response_data_path: segments(&["payload", "data"]),
                select_response_errors_path: segments(&["payload", "errors"]),
                merge_path: Vec::new(),
            },
        )
        .expect("init subscription");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"errors":[{"message":"upstream hiccup"}],"data":{"counter":7}}"#,
    );
}

#[test]
fn subscription_error_paths_use_the_subscription_type_name() {
    let plan = root(vec![object_field("event", false, vec![string_field("id", false)])]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init_subscription(
            &ctx,
            br#"{"payload":{"data":{"event":{}}}}"#,
            &PostProcessingConfiguration {
                select_response_data_path: segments(&["payload", "data"]),
                select_response_errors_path: segments(&["payload", "errors"]),
                merge_path: Vec::new(),
            },
        )
        .expect("init subscription");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"errors":[{"message":"Cannot return null for non-nullable field Subscription.event.id.","path":["event","id"]}],"data":null}"#,
    );
}

#[test]
fn suppressed_null_produces_no_error() {
    let plan = root(vec![object_field("me", true, vec![string_field("name", false)])]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init(
            &ctx,
            Some(br#"{"me":{"name":null}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    // A fetch layer already reported this subtree's failure.
    assert!(resolvable.mark_null_suppressing_error(&segments(&["me", "name"])));
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"data":{"me":null}}"#,
    );
}

#[test]
fn wrote_errors_without_data_flags_top_level_failures() {
    let plan = root(vec![object_field("me", false, vec![string_field("name", false)])]);

    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init(&ctx, Some(br#"{"me":{}}"#.as_slice()), OperationKind::Query)
        .expect("init");
    resolve_to_string(&mut resolvable, &mut ctx, &plan);
    assert!(resolvable.wrote_errors_without_data());

    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init(
            &ctx,
            Some(br#"{"me":{"name":"Ada"}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    resolve_to_string(&mut resolvable, &mut ctx, &plan);
    assert!(!resolvable.wrote_errors_without_data());
}

#[test]
fn stats_count_emitted_nodes() {
    let plan = root(vec![
        object_field("me", false, vec![string_field("name", false)]),
        Field {
            name: "n".into(),
            value: Node::Integer(LeafNode {
                path: segments(&["n"]),
                nullable: false,
            }),
            ..Field::default()
        },
    ]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init(
            &ctx,
            Some(br#"{"me":{"name":"Ada"},"n":1}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    resolve_to_string(&mut resolvable, &mut ctx, &plan);
    assert_eq!(
        ctx.stats,
        ResolveStats {
            resolved_nodes: 3,
            resolved_objects: 1,
            resolved_leafs: 2,
        },
    );
}

#[test]
fn reset_makes_an_instance_behave_like_a_fresh_one() {
    let failing_plan = root(vec![object_field("me", false, vec![string_field("name", false)])]);
    let happy_plan = root(vec![object_field("me", false, vec![string_field("name", true)])]);

    let mut reused = Resolvable::new();
    let mut ctx = Context::default();
    reused
        .init(&ctx, Some(br#"{"me":{}}"#.as_slice()), OperationKind::Query)
        .expect("init");
    resolve_to_string(&mut reused, &mut ctx, &failing_plan);

    reused.reset();
    let mut ctx = Context::default();
    reused
        .init(
            &ctx,
            Some(br#"{"me":{"name":"Ada"}}"#.as_slice()),
            OperationKind::Query,
        )
        .expect("init");
    let reused_output = resolve_to_string(&mut reused, &mut ctx, &happy_plan);

    let fresh_output = resolve_document(&happy_plan, r#"{"me":{"name":"Ada"}}"#);
    assert_eq!(reused_output, fresh_output);
}

#[test]
fn mutation_error_paths_use_the_mutation_type_name() {
    let plan = root(vec![string_field("createUser", false)]);
    let mut resolvable = Resolvable::new();
    let mut ctx = Context::default();
    resolvable
        .init(&ctx, Some(br#"{}"#.as_slice()), OperationKind::Mutation)
        .expect("init");
    assert_eq!(
        resolve_to_string(&mut resolvable, &mut ctx, &plan),
        r#"{"errors":[{"message":"Cannot return null for non-nullable field Mutation.createUser.","path":["createUser"]}],"data":null}"#,
    );
}
