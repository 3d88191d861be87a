
use super::*;
use crate::{
    node::{AnonName, Attr, AttributeRef, BindParam, Extension, ExtensionError, Node, NodeRef},
    obs::sink::{MetricsEvent, MetricsSink, with_metrics_sink},
    traversal::{AttributeDecl, KindDecl, Opcode, Shape, Slot},
    value::Value,
};
use crate::traversal::{register_schema, registered_schema};
use std::{
    cell::RefCell,
    sync::{Arc, OnceLock, mpsc},
    time::Duration,
};

///
/// TestAttr
///

enum TestAttr {
    Plain(Value),
    Node(Option<NodeRef>),
    Nodes(Vec<NodeRef>),
    Mapping(Vec<(String, Value)>),
    Bound(BindParam),
    Symbol(AnonName),
    Deferred(AttributeRef),
    Extension(Extension),
    Late(OnceLock<NodeRef>),
    Opaque,
}

///
/// TestNode
/// generic node: a kind plus named attributes, with optional name resolution
///

struct TestNode {
    kind: &'static str,
    attrs: Vec<(&'static str, TestAttr)>,
    resolvable: Vec<(&'static str, NodeRef)>,
}

impl TestNode {
    fn new(kind: &'static str, attrs: Vec<(&'static str, TestAttr)>) -> Self {
        Self {
            kind,
            attrs,
            resolvable: Vec::new(),
        }
    }

    fn resolving(mut self, name: &'static str, target: NodeRef) -> Self {
        self.resolvable.push((name, target));
        self
    }

    fn node(self) -> NodeRef {
        Arc::new(self)
    }
}

impl Node for TestNode {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn attribute(&self, name: &str) -> Option<Attr<'_>> {
        let (_, attr) = self.attrs.iter().find(|(attr, _)| *attr == name)?;

        Some(match attr {
            TestAttr::Plain(value) => Attr::value(value),
            TestAttr::Node(node) => Attr::child(node.as_ref()),
            TestAttr::Nodes(nodes) => Attr::Nodes(nodes),
            TestAttr::Mapping(entries) => Attr::Mapping(entries),
            TestAttr::Bound(param) => Attr::Bound(param),
            TestAttr::Symbol(anon) => Attr::Symbol(anon),
            TestAttr::Deferred(reference) => Attr::Deferred(reference),
            TestAttr::Extension(extension) => Attr::Extension(extension),
            TestAttr::Late(cell) => Attr::child(cell.get()),
            TestAttr::Opaque => Attr::Opaque,
        })
    }

    fn resolve_reference(&self, _attribute: &str, name: &str) -> Option<NodeRef> {
        self.resolvable
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, target)| Arc::clone(target))
    }
}

///
/// KINDS
///

const LEAF: KindDecl = KindDecl::new("leaf", &[AttributeDecl::new("value", Shape::Plain)]);
const PAIR: KindDecl = KindDecl::new(
    "pair",
    &[
        AttributeDecl::new("left", Shape::Node),
        AttributeDecl::new("right", Shape::Node),
    ],
);
const LIST: KindDecl = KindDecl::new("list", &[AttributeDecl::new("items", Shape::NodeList)]);
const OPTS: KindDecl = KindDecl::new("opts", &[AttributeDecl::new("entries", Shape::Mapping)]);
const PARAM: KindDecl = KindDecl::new("param", &[AttributeDecl::new("value", Shape::Bound)]);
const ALIAS: KindDecl = KindDecl::new(
    "alias",
    &[
        AttributeDecl::new("name", Shape::Symbol),
        AttributeDecl::new("target", Shape::Node),
    ],
);
const REF: KindDecl = KindDecl::new("ref", &[AttributeDecl::new("target", Shape::Deferred)]);
const EXT: KindDecl = KindDecl::new("ext", &[AttributeDecl::new("producer", Shape::Extension)]);
const LINK: KindDecl = KindDecl::new("link", &[AttributeDecl::new("next", Shape::Node)]);

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();

    for (decl, slots) in [
        (&LEAF, &[Slot::new("value", Opcode::Plain)][..]),
        (
            &PAIR,
            &[
                Slot::new("left", Opcode::SubNode),
                Slot::new("right", Opcode::SubNode),
            ][..],
        ),
        (&LIST, &[Slot::new("items", Opcode::SubNodeList)][..]),
        (&OPTS, &[Slot::new("entries", Opcode::Mapping)][..]),
        (&PARAM, &[Slot::new("value", Opcode::BoundParameter)][..]),
        (
            &ALIAS,
            &[
                Slot::new("name", Opcode::AnonymousSymbol),
                Slot::new("target", Opcode::SubNode),
            ][..],
        ),
        (&REF, &[Slot::new("target", Opcode::DeferredAttributeRef)][..]),
        (&EXT, &[Slot::new("producer", Opcode::Extension)][..]),
        (&LINK, &[Slot::new("next", Opcode::SubNode)][..]),
    ] {
        registry
            .register(decl, slots)
            .expect("test kind should register");
    }

    registry
}

///
/// BUILDERS
///

fn leaf(value: impl Into<Value>) -> NodeRef {
    TestNode::new("leaf", vec![("value", TestAttr::Plain(value.into()))]).node()
}

fn pair(left: NodeRef, right: NodeRef) -> NodeRef {
    TestNode::new(
        "pair",
        vec![
            ("left", TestAttr::Node(Some(left))),
            ("right", TestAttr::Node(Some(right))),
        ],
    )
    .node()
}

fn list(items: Vec<NodeRef>) -> NodeRef {
    TestNode::new("list", vec![("items", TestAttr::Nodes(items))]).node()
}

fn opts(entries: &[(&str, i64)]) -> NodeRef {
    let entries = entries
        .iter()
        .map(|(name, value)| ((*name).to_string(), Value::Int(*value)))
        .collect();

    TestNode::new("opts", vec![("entries", TestAttr::Mapping(entries))]).node()
}

fn param(bind: BindParam) -> NodeRef {
    TestNode::new("param", vec![("value", TestAttr::Bound(bind))]).node()
}

fn alias(name: &AnonName, target: NodeRef) -> NodeRef {
    TestNode::new(
        "alias",
        vec![
            ("name", TestAttr::Symbol(name.clone())),
            ("target", TestAttr::Node(Some(target))),
        ],
    )
    .node()
}

fn reference(target: AttributeRef) -> TestNode {
    TestNode::new("ref", vec![("target", TestAttr::Deferred(target))])
}

fn ext(extension: Extension) -> NodeRef {
    TestNode::new("ext", vec![("producer", TestAttr::Extension(extension))]).node()
}

// same closure literal for every call; only the captured value differs
fn ext_with_value(value: i64) -> NodeRef {
    ext(Extension::new(move || {
        Some(param(BindParam::anonymous("criteria", value)))
    })
    .expect("closure has its own type"))
}

fn ext_other_with_value(value: i64) -> NodeRef {
    ext(Extension::new(move || {
        Some(param(BindParam::anonymous("criteria", value)))
    })
    .expect("closure has its own type"))
}

fn criteria_by_id() -> Option<NodeRef> {
    Some(param(BindParam::named("id", 7)))
}

fn criteria_by_name() -> Option<NodeRef> {
    Some(param(BindParam::named("name", "ed")))
}

type BoxedProducer = Box<dyn Fn() -> Option<NodeRef> + Send + Sync>;

fn chain(depth: usize) -> NodeRef {
    let mut node = leaf(0);
    for _ in 0..depth {
        node = TestNode::new("link", vec![("next", TestAttr::Node(Some(node)))]).node();
    }

    node
}

fn key(registry: &SchemaRegistry, node: &NodeRef) -> CacheKey {
    KeyBuilder::with_registry(registry)
        .generate(node.as_ref())
        .expect("test tree should be cacheable")
}

fn try_key(registry: &SchemaRegistry, node: &NodeRef) -> Result<CacheKey, Uncacheable> {
    KeyBuilder::with_registry(registry).try_generate(node.as_ref())
}

fn count_tokens(tokens: &[Token], pred: &impl Fn(&Token) -> bool) -> usize {
    tokens
        .iter()
        .map(|token| match token {
            Token::SubKey(inner) => usize::from(pred(token)) + count_tokens(inner, pred),
            _ => usize::from(pred(token)),
        })
        .sum()
}

///
/// TESTS
///

#[test]
fn key_generation_is_deterministic() {
    let registry = registry();
    let tree = pair(leaf(1), list(vec![leaf("a"), leaf("b")]));

    let first = key(&registry, &tree);
    let second = key(&registry, &tree);

    assert_eq!(first, second);
    assert_eq!(first.digest(), second.digest());
    assert_eq!(first.root_kind(), Some("pair"));
}

#[test]
fn independently_built_trees_compare_equal() {
    let registry = registry();

    let a = key(&registry, &pair(leaf(1), leaf(2)));
    let b = key(&registry, &pair(leaf(1), leaf(2)));

    assert_eq!(a, b);
}

#[test]
fn plain_values_are_structure() {
    let registry = registry();

    assert_ne!(key(&registry, &leaf(1)), key(&registry, &leaf(2)));
    assert_ne!(key(&registry, &leaf(1)), key(&registry, &leaf("1")));
}

#[test]
fn child_list_order_is_significant() {
    let registry = registry();

    let ab = key(&registry, &list(vec![leaf("a"), leaf("b")]));
    let ba = key(&registry, &list(vec![leaf("b"), leaf("a")]));

    assert_ne!(ab, ba);
}

#[test]
fn mapping_order_is_not_significant() {
    let registry = registry();

    let forward = key(&registry, &opts(&[("a", 1), ("b", 2)]));
    let reversed = key(&registry, &opts(&[("b", 2), ("a", 1)]));

    assert_eq!(forward, reversed);
}

#[test]
fn mapping_duplicate_names_keep_last_entry() {
    let registry = registry();

    let duplicated = key(&registry, &opts(&[("a", 1), ("a", 3)]));
    let single = key(&registry, &opts(&[("a", 3)]));

    assert_eq!(duplicated, single);
}

#[test]
fn absent_child_differs_from_present_child() {
    let registry = registry();
    let empty = TestNode::new(
        "pair",
        vec![
            ("left", TestAttr::Node(None)),
            ("right", TestAttr::Node(Some(leaf(1)))),
        ],
    )
    .node();

    let empty_key = key(&registry, &empty);
    assert!(empty_key.tokens().contains(&Token::Absent));
    assert_ne!(empty_key, key(&registry, &pair(leaf(1), leaf(1))));
}

#[test]
fn bound_values_are_extracted_not_keyed() {
    let registry = registry();

    let five = key(&registry, &param(BindParam::anonymous("x", 5)));
    let six = key(&registry, &param(BindParam::anonymous("x", 6)));

    assert_eq!(five, six);
    assert_eq!(five.bound_values()[0].value, Value::Int(5));
    assert_eq!(six.bound_values()[0].value, Value::Int(6));
    assert_eq!(five.placeholders().collect::<Vec<_>>(), [&ParamRole::Anonymous(0)]);
}

#[test]
fn bound_values_follow_discovery_order() {
    let registry = registry();
    let tree = pair(
        param(BindParam::named("first", 1)),
        list(vec![param(BindParam::anonymous("x", 2)), param(BindParam::named("third", 3))]),
    );

    let key = key(&registry, &tree);
    let values: Vec<_> = key.bound_values().iter().map(|b| b.value.clone()).collect();

    assert_eq!(values, [Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(
        key.placeholders().cloned().collect::<Vec<_>>(),
        [
            ParamRole::Named("first".into()),
            ParamRole::Anonymous(0),
            ParamRole::Named("third".into()),
        ]
    );
}

#[test]
fn named_and_anonymous_roles_differ() {
    let registry = registry();

    let named = key(&registry, &param(BindParam::named("x", 1)));
    let anonymous = key(&registry, &param(BindParam::anonymous("x", 1)));

    assert_ne!(named, anonymous);
}

#[test]
fn anonymous_symbols_normalize_across_trees() {
    let registry = registry();

    let first = key(&registry, &alias(&AnonName::generate("a"), leaf(1)));
    let second = key(&registry, &alias(&AnonName::generate("a"), leaf(1)));

    assert_eq!(first, second);
    assert!(first.tokens().iter().all(|token| !matches!(token, Token::Plain(Value::Text(_)))));
}

#[test]
fn distinct_anonymous_symbols_stay_distinct_within_a_tree() {
    let registry = registry();
    let a = AnonName::generate("a");
    let b = AnonName::generate("b");

    let same = key(&registry, &pair(alias(&a, leaf(1)), alias(&a, leaf(1))));
    let different = key(&registry, &pair(alias(&a, leaf(1)), alias(&b, leaf(1))));

    assert_ne!(same, different);
}

#[test]
fn shared_subtree_is_keyed_once() {
    let registry = registry();
    let shared = list(vec![leaf(1), leaf(2), leaf(3)]);

    let shared_key = key(&registry, &pair(Arc::clone(&shared), Arc::clone(&shared)));
    let copied_key = key(
        &registry,
        &pair(list(vec![leaf(1), leaf(2), leaf(3)]), list(vec![leaf(1), leaf(2), leaf(3)])),
    );

    let is_back_ref = |token: &Token| matches!(token, Token::BackRef(_));
    assert_eq!(count_tokens(shared_key.tokens(), &is_back_ref), 1);
    assert_eq!(count_tokens(copied_key.tokens(), &is_back_ref), 0);

    let all = |_: &Token| true;
    assert!(count_tokens(shared_key.tokens(), &all) < count_tokens(copied_key.tokens(), &all));
}

#[test]
fn shared_subtree_keys_match_across_trees() {
    let registry = registry();

    let build = || {
        let shared = leaf("shared");
        pair(Arc::clone(&shared), shared)
    };

    assert_eq!(key(&registry, &build()), key(&registry, &build()));
}

#[test]
fn cycles_terminate_with_back_reference() {
    let registry = registry();
    let late = Arc::new(TestNode::new("link", vec![("next", TestAttr::Late(OnceLock::new()))]));
    let node: NodeRef = Arc::clone(&late) as NodeRef;
    if let TestAttr::Late(cell) = &late.attrs[0].1 {
        cell.set(Arc::clone(&node)).ok();
    }

    let key = key(&registry, &node);

    assert_eq!(
        key.tokens(),
        [
            Token::Kind("link"),
            Token::Slot {
                name: "next",
                opcode: Opcode::SubNode
            },
            Token::BackRef(0),
        ]
    );
}

#[test]
fn deferred_name_resolves_to_same_key_as_reference() {
    let registry = registry();
    let target = leaf("target");

    let by_name = reference(AttributeRef::name("target"))
        .resolving("target", Arc::clone(&target))
        .node();
    let resolved = reference(AttributeRef::Resolved(target)).node();

    assert_eq!(key(&registry, &by_name), key(&registry, &resolved));
}

#[test]
fn unresolvable_deferred_name_is_keyed_as_text() {
    let registry = registry();

    let wildcard = key(&registry, &reference(AttributeRef::name("*")).node());
    let other = key(&registry, &reference(AttributeRef::name("id")).node());

    assert!(wildcard.tokens().contains(&Token::Plain(Value::from("*"))));
    assert_ne!(wildcard, other);
}

#[test]
fn extension_keys_by_identity_and_extracts_values() {
    let registry = registry();

    let ten = key(&registry, &ext_with_value(10));
    let twenty = key(&registry, &ext_with_value(20));
    let other = key(&registry, &ext_other_with_value(10));

    assert_eq!(ten, twenty);
    assert_ne!(ten, other);
    assert_eq!(ten.bound_values()[0].value, Value::Int(10));
    assert_eq!(twenty.bound_values()[0].value, Value::Int(20));
    assert_eq!(ten.bound_values()[0].role, twenty.bound_values()[0].role);
}

#[test]
fn fn_pointers_key_by_address() {
    let registry = registry();
    let by_id: fn() -> Option<NodeRef> = criteria_by_id;
    let by_name: fn() -> Option<NodeRef> = criteria_by_name;

    let id_key = key(&registry, &ext(Extension::from_fn(by_id)));
    let name_key = key(&registry, &ext(Extension::from_fn(by_name)));
    let id_again = key(&registry, &ext(Extension::from_fn(criteria_by_id)));

    assert_ne!(id_key, name_key);
    assert_ne!(id_key.digest(), name_key.digest());
    assert_eq!(id_key, id_again);
}

#[test]
fn fn_items_key_by_their_own_type() {
    let registry = registry();

    let by_id = key(&registry, &ext(Extension::new(criteria_by_id).expect("fn item")));
    let by_name = key(&registry, &ext(Extension::new(criteria_by_name).expect("fn item")));

    assert_ne!(by_id, by_name);
}

#[test]
fn erased_callables_need_an_explicit_key() {
    let pointer: fn() -> Option<NodeRef> = criteria_by_id;
    let boxed: BoxedProducer = Box::new(criteria_by_id);

    assert!(matches!(
        Extension::new(pointer),
        Err(ExtensionError::ErasedCallable { .. })
    ));
    assert!(matches!(
        Extension::new(boxed),
        Err(ExtensionError::ErasedCallable { .. })
    ));
    assert!(Extension::adapting::<BoxedProducer, _>(criteria_by_id).is_err());
}

#[test]
fn keyed_boxed_callables_stay_distinct() {
    struct ById;
    struct ByName;

    let registry = registry();
    let by_id: BoxedProducer = Box::new(criteria_by_id);
    let by_name: BoxedProducer = Box::new(criteria_by_name);

    let id_key = key(&registry, &ext(Extension::keyed::<ById, _>(by_id)));
    let name_key = key(&registry, &ext(Extension::keyed::<ByName, _>(by_name)));

    assert_ne!(id_key, name_key);
}

const LAZY_EXT: KindDecl = KindDecl::new(
    "builder_tests_lazy_ext",
    &[AttributeDecl::new("producer", Shape::Extension)],
);
const LAZY_LEAF: KindDecl = KindDecl::new(
    "builder_tests_lazy_leaf",
    &[AttributeDecl::new("value", Shape::Bound)],
);

// extension node of a kind held in the process registry
fn lazy_ext(producer: fn() -> Option<NodeRef>) -> NodeRef {
    register_schema(&LAZY_EXT, &[Slot::new("producer", Opcode::Extension)])
        .expect("lazy ext kind should register");

    TestNode::new(
        "builder_tests_lazy_ext",
        vec![("producer", TestAttr::Extension(Extension::from_fn(producer)))],
    )
    .node()
}

// run off-thread so a blocked registry fails the test instead of hanging it
fn generate_off_thread(tree: fn() -> NodeRef) -> Result<usize, Uncacheable> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let root = tree();
        let _ = tx.send(try_generate_key(root.as_ref()).map(|key| key.bound_values().len()));
    });

    rx.recv_timeout(Duration::from_secs(10))
        .expect("key generation should not block on the registry")
}

#[test]
fn callbacks_may_register_kinds_during_a_pass() {
    fn lazy_leaf() -> Option<NodeRef> {
        register_schema(&LAZY_LEAF, &[Slot::new("value", Opcode::BoundParameter)])
            .expect("lazy kind should register");

        Some(
            TestNode::new(
                "builder_tests_lazy_leaf",
                vec![("value", TestAttr::Bound(BindParam::named("id", 3)))],
            )
            .node(),
        )
    }

    assert_eq!(generate_off_thread(|| lazy_ext(lazy_leaf)), Ok(1));
    assert!(registered_schema("builder_tests_lazy_leaf").is_some());
}

#[test]
fn callbacks_may_generate_nested_keys() {
    fn nested() -> Option<NodeRef> {
        let inner = crate::test_fixtures::key_of(crate::test_fixtures::user().as_ref());
        assert_eq!(inner.root_kind(), Some("mapper"));

        None
    }

    assert_eq!(generate_off_thread(|| lazy_ext(nested)), Ok(0));
}

#[test]
fn extension_output_does_not_capture_shared_nodes() {
    let registry = registry();
    let shared = leaf("shared");
    let produced = Arc::clone(&shared);

    let extension = ext(
        Extension::new(move || Some(Arc::clone(&produced))).expect("closure has its own type"),
    );
    let with_ext = key(&registry, &pair(extension, Arc::clone(&shared)));

    let is_back_ref = |token: &Token| matches!(token, Token::BackRef(_));
    assert_eq!(count_tokens(with_ext.tokens(), &is_back_ref), 0);
}

#[test]
fn unregistered_kind_is_uncacheable() {
    let registry = registry();
    let tree = pair(leaf(1), TestNode::new("mystery", Vec::new()).node());

    assert_eq!(
        try_key(&registry, &tree),
        Err(Uncacheable::UnregisteredKind { kind: "mystery" })
    );
    assert!(KeyBuilder::with_registry(&registry).generate(tree.as_ref()).is_none());
}

#[test]
fn missing_attribute_is_uncacheable() {
    let registry = registry();
    let tree = TestNode::new("leaf", Vec::new()).node();

    assert_eq!(
        try_key(&registry, &tree),
        Err(Uncacheable::MissingAttribute {
            kind: "leaf",
            attribute: "value"
        })
    );
}

#[test]
fn shape_mismatch_is_uncacheable() {
    let registry = registry();
    let opaque = TestNode::new("leaf", vec![("value", TestAttr::Opaque)]).node();
    let wrong = TestNode::new("leaf", vec![("value", TestAttr::Nodes(Vec::new()))]).node();

    assert_eq!(
        try_key(&registry, &opaque),
        Err(Uncacheable::ShapeMismatch {
            kind: "leaf",
            attribute: "value",
            expected: Shape::Plain,
            found: Shape::Opaque,
        })
    );
    assert!(matches!(
        try_key(&registry, &wrong),
        Err(Uncacheable::ShapeMismatch { found: Shape::NodeList, .. })
    ));
}

#[test]
fn depth_guard_rejects_deep_trees() {
    let registry = registry();
    let deep = chain(10);

    let shallow = KeyBuilder::with_registry(&registry).with_config(BuilderConfig { max_depth: 5 });
    assert!(matches!(
        shallow.try_generate(deep.as_ref()),
        Err(Uncacheable::DepthExceeded { max_depth: 5, .. })
    ));

    assert!(KeyBuilder::with_registry(&registry).try_generate(deep.as_ref()).is_ok());
    assert_eq!(BuilderConfig::default().max_depth, DEFAULT_MAX_DEPTH);
}

#[test]
fn passes_record_metrics_events() {
    struct Capture(RefCell<Vec<MetricsEvent>>);

    impl MetricsSink for Capture {
        fn record(&self, event: MetricsEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    let registry = registry();
    let capture = Capture(RefCell::new(Vec::new()));
    let shared = leaf(1);

    with_metrics_sink(&capture, || {
        let _ = KeyBuilder::with_registry(&registry)
            .generate(pair(Arc::clone(&shared), Arc::clone(&shared)).as_ref());
        let _ = KeyBuilder::with_registry(&registry)
            .generate(TestNode::new("mystery", Vec::new()).node().as_ref());
    });

    let events = capture.0.borrow();
    assert!(matches!(
        events[0],
        MetricsEvent::KeyGenerated {
            kind: "pair",
            back_refs: 1,
            bound_values: 0,
            ..
        }
    ));
    assert_eq!(events[1], MetricsEvent::Uncacheable { kind: "mystery" });
}
