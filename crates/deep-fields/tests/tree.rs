use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use deep_fields::{FieldKind, FieldOptions, FieldSchema, FieldTree, FieldsError, StepTransition};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn offline() -> FieldOptions {
    FieldOptions::default().server_side(true)
}

fn profile_schema() -> FieldSchema {
    FieldSchema::object([
        ("name", FieldSchema::scalar()),
        (
            "address",
            FieldSchema::object([("city", FieldSchema::scalar()), ("zip", FieldSchema::scalar())]),
        ),
        ("phones", FieldSchema::array(FieldSchema::scalar())),
    ])
}

#[test]
fn paths_follow_ancestor_names() {
    let tree = FieldTree::build(
        &profile_schema(),
        json!({ "name": "Ann", "address": { "city": "Oslo" }, "phones": ["1", "2"] }),
        offline(),
    );

    let root = tree.root();
    assert!(tree[root].path().is_empty());
    assert_eq!(tree[root].path_str(), "");

    let city = tree.find("address.city").expect("city field");
    assert_eq!(tree[city].path(), ["address", "city"]);
    assert_eq!(tree[city].path_str(), "address.city");

    let phones = tree.find("phones").expect("phones field");
    let members = tree[phones].members().to_vec();
    assert_eq!(members.len(), 2);
    assert_eq!(tree[members[0]].path(), ["phones", "1"]);
    assert_eq!(tree[members[1]].path_str(), "phones.2");

    let chain: Vec<_> = tree.ancestors(city).collect();
    assert_eq!(chain, vec![tree.find("address").expect("address"), root]);
}

#[test]
fn kinds_are_classified_from_the_schema() {
    let schema = FieldSchema::object([
        ("plain", FieldSchema::scalar()),
        ("list", FieldSchema::array(FieldSchema::scalar())),
        ("both", {
            let mut schema = FieldSchema::array(FieldSchema::scalar());
            schema.props = Some(vec![("ignored".into(), FieldSchema::scalar())]);
            schema
        }),
    ]);
    let tree = FieldTree::build(&schema, json!(null), offline());
    assert_eq!(tree[tree.root()].kind(), FieldKind::Object);
    assert_eq!(tree[tree.find("plain").expect("plain")].kind(), FieldKind::Scalar);
    assert_eq!(tree[tree.find("list").expect("list")].kind(), FieldKind::Array);
    assert_eq!(tree[tree.find("both").expect("both")].kind(), FieldKind::Array);
}

#[test]
fn residual_keys_survive_and_root_step_is_read_from_value() {
    let tree = FieldTree::build(
        &FieldSchema::object([("name", FieldSchema::scalar())]),
        json!({ "name": "x", "legacy": [1, 2], "step": 3 }),
        offline(),
    );
    let root = &tree[tree.root()];
    assert_eq!(root.step(), 3);
    assert_eq!(tree.step(), 3);
    let residual = root.residual().expect("object node");
    assert_eq!(residual.get("legacy"), Some(&json!([1, 2])));
    assert!(!residual.contains_key("step"));
    assert!(!residual.contains_key("name"));
    assert_eq!(tree[tree.find("name").expect("name")].step(), 3);
}

#[test]
fn defaults_fill_missing_values_and_dates_are_coerced() {
    let schema = FieldSchema::object([
        ("status", FieldSchema::scalar().default_value(json!("draft"))),
        ("due", FieldSchema::date()),
        ("items", FieldSchema::array(FieldSchema::scalar()).default_value(json!([7]))),
    ]);
    let tree = FieldTree::build(&schema, json!({ "due": "2024-03-05" }), offline());
    assert_eq!(
        tree.value(),
        json!({
            "status": "draft",
            "due": "2024-03-05T00:00:00Z",
            "items": [7],
            "step": 1
        })
    );
    let due = tree.find("due").expect("due field");
    let parsed = tree.date_of(due).expect("live node").expect("parsed date");
    assert_eq!(parsed.year(), 2024);
    assert_eq!(u8::from(parsed.month()), 3);
}

#[test]
fn defaults_only_replace_missing_or_null_values() {
    let schema = FieldSchema::object([
        ("text", FieldSchema::scalar().default_value(json!("fallback"))),
        ("count", FieldSchema::scalar().default_value(json!(9))),
        ("flag", FieldSchema::scalar().default_value(json!(true))),
    ]);
    let tree = FieldTree::build(&schema, json!({ "text": "", "count": 0, "flag": false }), offline());
    assert_eq!(
        tree.value(),
        json!({ "text": "", "count": 0, "flag": false, "step": 1 })
    );
}

#[test]
fn huge_epoch_numbers_in_date_fields_become_null() {
    let schema = FieldSchema::object([("due", FieldSchema::date())]);
    let tree = FieldTree::build(&schema, json!({ "due": 1e300 }), offline());
    let due = tree.find("due").expect("due field");
    assert_eq!(tree[due].state().value, Value::Null);
    assert!(tree.date_of(due).expect("live node").is_none());
}

#[test]
fn array_members_can_be_pushed_and_removed() {
    let mut tree = FieldTree::build(&FieldSchema::array(FieldSchema::scalar()), json!([]), offline());
    let root = tree.root();
    tree.push_member(root, json!(5)).expect("push 5");
    tree.push_member(root, json!(6)).expect("push 6");
    assert_eq!(tree.value(), json!([5, 6]));

    tree.rm_member(root, 0, 1).expect("remove first");
    assert_eq!(tree.value(), json!([6]));
}

#[test]
fn removed_members_are_detached() {
    init_tracing();
    let mut tree = FieldTree::build(
        &FieldSchema::array(FieldSchema::object([("n", FieldSchema::scalar())]).named("row")),
        json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]),
        offline(),
    );
    let root = tree.root();
    let members = tree[root].members().to_vec();
    assert_eq!(tree[members[1]].name(), "row2");

    let inner = tree[members[1]].child("n").expect("inner field");
    tree.drop_member(members[1]).expect("drop middle row");
    assert!(!tree.contains(members[1]));
    assert!(!tree.contains(inner));
    assert!(matches!(tree.node(inner), Err(FieldsError::UnknownNode { .. })));
    assert_eq!(tree.value(), json!([{ "n": 1 }, { "n": 3 }]));

    // Counters keep growing, so names stay unique after removals.
    let added = tree.push_member(root, json!({ "n": 4 })).expect("push row");
    assert_eq!(tree[added].name(), "row4");

    tree.rm_member(root, 1, usize::MAX).expect("remove everything after the first");
    assert_eq!(tree.value(), json!([{ "n": 1 }]));

    tree.rm_member(root, 0, 10).expect("remove the rest");
    assert_eq!(tree.value(), json!([]));
}

#[test]
fn structural_misuse_is_reported() {
    let mut tree = FieldTree::build(&profile_schema(), json!(null), offline());
    let name = tree.find("name").expect("name");
    let phones = tree.find("phones").expect("phones");

    assert!(matches!(
        tree.push_member(name, json!(1)),
        Err(FieldsError::NotArray { name }) if name == "name"
    ));
    assert!(matches!(
        tree.rm_member(phones, 0, 1),
        Err(FieldsError::NoSuchMember { index: 0, .. })
    ));
    assert!(matches!(
        tree.rm_child(phones, name),
        Err(FieldsError::ChildNotFound { .. })
    ));
    assert!(matches!(
        tree.drop_member(name),
        Err(FieldsError::NotArray { .. })
    ));
    // The root has no parent array; dropping it is a no-op.
    tree.drop_member(tree.root()).expect("root drop is a no-op");
}

#[test]
fn create_hooks_run_parent_first_then_own() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let root_log = seen.clone();
    let leaf_log = seen.clone();
    let schema = FieldSchema::object([(
        "title",
        FieldSchema::scalar().on_create(move |ctx| {
            leaf_log.lock().unwrap().push(format!("own:{}", ctx.name));
            if let Some(value) = ctx.value.as_deref_mut() {
                *value = json!("seeded");
            }
        }),
    )])
    .on_create(move |ctx| {
        root_log.lock().unwrap().push(format!("inherited:{}", ctx.path.join(".")));
        if ctx.kind == FieldKind::Scalar {
            ctx.config.req = true;
        }
    });

    let tree = FieldTree::build(&schema, json!(null), offline());
    let title = tree.find("title").expect("title");
    assert!(tree[title].config().req);
    assert_eq!(tree[title].state().value, json!("seeded"));
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["inherited:title", "own:title", "inherited:"]
    );
}

#[test]
fn building_a_tree_never_mutates_the_schema() {
    let schema = FieldSchema::object([("title", FieldSchema::scalar())]).on_create(|ctx| {
        ctx.config.read_only = true;
    });
    let first = FieldTree::build(&schema, json!(null), offline());
    let second = FieldTree::build(&schema, json!(null), offline());
    assert!(first[first.find("title").expect("title")].config().read_only);
    assert!(second[second.find("title").expect("title")].config().read_only);
    assert!(!schema.config.read_only);
    assert!(!schema.props.as_ref().expect("props")[0].1.config.read_only);
}

#[tokio::test]
async fn listeners_see_value_changes() {
    let mut tree = FieldTree::create(&profile_schema(), json!(null), FieldOptions::default()).await;
    let name = tree.find("name").expect("name");
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = seen.clone();
    let sub = tree
        .subscribe(name, move |update| sink.lock().unwrap().push(update.state.value.clone()))
        .expect("subscribe");

    tree.set_value(name, json!("Ann")).await.expect("set name");
    tree.set_value(name, json!("Ann")).await.expect("unchanged name");
    assert_eq!(*seen.lock().unwrap(), vec![json!("Ann")]);

    assert!(tree.unsubscribe(sub));
    tree.set_value(name, json!("Bob")).await.expect("set name");
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn after_change_runs_once_the_value_is_validated() {
    let changes: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
    let sink = changes.clone();
    let schema = FieldSchema::object([(
        "title",
        FieldSchema::scalar()
            .required()
            .after_change(move |change| {
                sink.lock()
                    .unwrap()
                    .push((change.path.join("."), change.value.clone()));
            }),
    )]);
    let mut tree = FieldTree::create(&schema, json!(null), FieldOptions::default()).await;
    let title = tree.find("title").expect("title");
    assert!(tree[title].error_props().has_error);

    tree.set_value(title, json!("hello")).await.expect("set title");
    assert!(!tree[title].error_props().has_error);
    assert_eq!(
        *changes.lock().unwrap(),
        vec![("title".to_string(), json!("hello"))]
    );
}

#[tokio::test]
async fn set_values_resizes_arrays_and_revalidates_leaves() {
    init_tracing();
    let schema = FieldSchema::object([
        ("name", FieldSchema::scalar().required()),
        ("phones", FieldSchema::array(FieldSchema::scalar().required())),
    ]);
    let mut tree = FieldTree::create(&schema, json!({ "name": "a", "phones": ["1", "2", "3"] }), FieldOptions::default()).await;
    let root = tree.root();

    tree.set_values(root, json!({ "name": "", "phones": ["9", ""] }))
        .await
        .expect("bulk load");
    assert_eq!(tree.full_value(), json!({ "name": "", "phones": ["9", ""], "step": 1 }));

    let name = tree.find("name").expect("name");
    assert!(tree[name].error().is_some());
    let phones = tree.find("phones").expect("phones");
    let second = tree[phones].members()[1];
    assert!(tree[second].error().is_some());

    tree.set_values(root, json!({ "phones": ["9", "8", "7", "6"] }))
        .await
        .expect("grow array");
    assert_eq!(tree[phones].members().len(), 4);
    let last = tree[phones].members()[3];
    assert_eq!(tree[last].name(), "5");
    assert!(tree[name].error().is_some(), "untouched keys keep their state");
    assert!(!tree.has_errors(phones).expect("phones node"));
}

#[tokio::test]
async fn step_and_value_requires_a_scalar() {
    let mut tree = FieldTree::create(&profile_schema(), json!(null), offline()).await;
    let address = tree.find("address").expect("address");
    let err = tree
        .step_and_value(address, 2, json!({}))
        .await
        .expect_err("objects cannot be step-assigned");
    assert!(matches!(err, FieldsError::NotScalar { .. }));

    let name = tree.find("name").expect("name");
    let outcome = tree.step_and_value(name, 2, json!("x")).await.expect("scalar");
    assert_eq!(outcome, StepTransition::Committed);
}

#[tokio::test]
async fn trees_build_from_json_schemas() {
    let schema = FieldSchema::from_json_str(
        r#"{
            "props": {
                "title": { "req": true, "label": "Title" },
                "due": { "type": "date" },
                "owners": {
                    "newItem": { "props": { "email": { "req": true } } },
                    "roleAndSteps": { "editor": [1] }
                }
            }
        }"#,
    )
    .expect("schema should parse");
    let mut tree = FieldTree::create(
        &schema,
        json!({ "title": "Plan", "due": 0, "owners": [{ "email": "" }] }),
        FieldOptions::default().with_roles(["editor"]),
    )
    .await;

    let issues = tree.validate_all(true).await;
    let paths: Vec<_> = issues.iter().map(|issue| issue.path.as_str()).collect();
    assert_eq!(paths, ["owners.1.email"]);
    assert_eq!(
        tree[tree.find("title").expect("title")].config().extra.get("label"),
        Some(&json!("Title"))
    );
    assert_eq!(tree[tree.find("due").expect("due")].state().value, json!(0));
}

#[tokio::test]
async fn set_values_validates_next_tick_members() {
    let schema = FieldSchema::object([(
        "phones",
        FieldSchema::array(FieldSchema::scalar().required().next_tick()),
    )]);
    let mut tree = FieldTree::create(&schema, json!({ "phones": [] }), FieldOptions::default()).await;
    let root = tree.root();

    tree.set_values(root, json!({ "phones": [""] }))
        .await
        .expect("bulk load");
    let phones = tree.find("phones").expect("phones");
    let member = tree[phones].members()[0];
    assert_eq!(
        tree[member].error().map(|err| err.message.as_str()),
        Some(deep_fields::DEFAULT_REQ_ERROR_TEXT)
    );

    // Members pushed directly wait for an explicit settle.
    let pushed = tree.push_member(phones, json!("")).expect("push phone");
    assert!(tree[pushed].error().is_none());
    tree.settle().await;
    assert!(tree[pushed].error().is_some());
}
