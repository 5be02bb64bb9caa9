//! Integration tests for the invocation pipeline and middleware registry

mod common;

use arbor_actions::{
    middleware_fn, ActionContext, ActionError, ActionMiddleware, ActionTagging, CollectingMiddleware, Dispatcher,
    DispatcherConfig, MethodKind, MiddlewareDisposer, MiddlewareEntry, ModelClass, Next, Value,
};
use common::{child_p2, new_p, read_i64};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn collect(dispatcher: &Dispatcher) -> (Arc<CollectingMiddleware>, MiddlewareDisposer) {
    let collector = Arc::new(CollectingMiddleware::new());
    let disposer = dispatcher
        .add_middleware(MiddlewareEntry::from_arc(collector.clone()))
        .unwrap();
    (collector, disposer)
}

#[test]
fn test_nested_contexts_and_paths() {
    common::init_tracing();
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let (collector, _d) = collect(&dispatcher);

    p.call("addXY", vec![Value::from(1), Value::from(2)]).unwrap();

    let calls = collector.calls();
    assert_eq!(collector.names(), vec!["addX", "addY", "addXY"]);
    let outer = &calls[2].context;
    assert!(outer.parent_context().is_none());

    let add_x = &calls[0].context;
    let add_y = &calls[1].context;
    assert!(add_x.parent_context().unwrap().ptr_eq(outer));
    assert!(add_y.parent_context().unwrap().ptr_eq(outer));
    assert!(add_y.root_context().ptr_eq(outer));

    // B's path is A's path plus the edges from A to B
    let outer_path = outer.target().path_from(&p).unwrap();
    let mut expected = outer_path.clone();
    expected.extend(add_y.target().path_from(outer.target()).unwrap());
    assert_eq!(add_y.target().path_from(&p).unwrap(), expected);
    assert_eq!(expected, vec!["data", "p2"]);
}

#[test]
fn test_plain_methods_bypass_the_pipeline() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let (collector, _d) = collect(&dispatcher);

    p.call("addX", vec![Value::from(2)]).unwrap();
    assert_eq!(p.call("sum", vec![]).unwrap(), Value::from(2));
    assert_eq!(collector.names(), vec!["addX"]);
}

#[test]
fn test_method_tagging() {
    let class = common::p_class();
    assert!(class.is_model_action("addX"));
    assert!(class.is_model_action("addXY"));
    assert!(!class.is_model_action("sum"));
    assert_eq!(class.method_kind("sum"), Some(MethodKind::Plain));
    assert_eq!(class.method_kind("nope"), None);

    let extended = ModelClass::extend(&class, "ExtendedP")
        .action("reset", |m, _| {
            m.set_in(&["data", "x"], Value::from(0))?;
            Ok(Value::Null)
        })
        .build()
        .unwrap();
    assert!(extended.is_model_action("addX"));
    assert!(extended.is_model_action("reset"));
    assert!(!class.is_model_action("reset"));

    let dispatcher = Dispatcher::new();
    let model = dispatcher.create_model(&extended, Value::object([("data", Value::object([("x", Value::from(9))]))])).unwrap();
    model.call("reset", vec![]).unwrap();
    assert_eq!(read_i64(&model, &["data", "x"]), 0);

    let err = model.call_flow("reset", vec![]).unwrap_err();
    assert!(matches!(
        err,
        ActionError::WrongMethodKind {
            expected: MethodKind::Flow,
            actual: MethodKind::Action,
            ..
        }
    ));
}

#[test]
fn test_errors_propagate_and_pop() {
    let dispatcher = Dispatcher::new();
    let class = ModelClass::builder("Failing")
        .action("fail", |_, _| Err(anyhow::anyhow!("disk on fire").into()))
        .build()
        .unwrap();
    let model = dispatcher.create_model(&class, Value::Null).unwrap();
    let (collector, _d) = collect(&dispatcher);

    let err = model.call("fail", vec![]).unwrap_err();
    assert_eq!(err.to_string(), "disk on fire");
    assert_eq!(dispatcher.stack_depth(), 0);
    assert!(!collector.calls()[0].succeeded);
}

#[test]
fn test_panicking_body_still_pops() {
    let dispatcher = Dispatcher::new();
    let class = ModelClass::builder("Panicky")
        .action("boom", |_, _| panic!("boom"))
        .build()
        .unwrap();
    let model = dispatcher.create_model(&class, Value::Null).unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| model.call("boom", vec![])));
    assert!(result.is_err());
    assert_eq!(dispatcher.stack_depth(), 0);
    assert!(dispatcher.current_action_context().is_none());
}

#[test]
fn test_middleware_error_aborts_chain() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let _guard = dispatcher
        .add_middleware(MiddlewareEntry::new(
            middleware_fn("guard", |_, _| Err(ActionError::msg("denied"))).with_filter(|ctx| ctx.action_name() == "addX"),
        ))
        .unwrap();
    let (collector, _d) = collect(&dispatcher);

    let err = p.call("addX", vec![Value::from(1)]).unwrap_err();
    assert_eq!(err.to_string(), "denied");
    assert!(collector.calls().is_empty());
    assert_eq!(read_i64(&p, &["data", "x"]), 0);

    child_p2(&p).unwrap().call("addY", vec![Value::from(1)]).unwrap();
    assert_eq!(collector.names(), vec!["addY"]);
}

#[test]
fn test_outer_middleware_recovers_inner_errors() {
    let dispatcher = Dispatcher::new();
    let class = ModelClass::builder("Failing")
        .action("fail", |_, _| Err(ActionError::msg("disk on fire")))
        .build()
        .unwrap();
    let model = dispatcher.create_model(&class, Value::Null).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = seen.clone();
    let _recover = dispatcher
        .add_middleware(MiddlewareEntry::new(middleware_fn("recover", move |_, next| {
            match next.run() {
                Err(err) => {
                    errors.lock().push(err.to_string());
                    Ok(Value::from("recovered"))
                }
                ok => ok,
            }
        })))
        .unwrap();
    let (collector, _d) = collect(&dispatcher);

    assert_eq!(model.call("fail", vec![]).unwrap(), Value::from("recovered"));
    assert_eq!(*seen.lock(), vec!["disk on fire".to_string()]);
    // inner middleware still saw the failure
    assert!(!collector.calls()[0].succeeded);
    assert_eq!(dispatcher.stack_depth(), 0);
    assert!(dispatcher.current_action_context().is_none());
}

#[test]
fn test_short_circuit_skips_body() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let _d = dispatcher
        .add_middleware(MiddlewareEntry::new(middleware_fn("cache", |ctx, next| {
            if ctx.action_name() == "addX" {
                Ok(Value::from("cached"))
            } else {
                next.run()
            }
        })))
        .unwrap();

    assert_eq!(p.call("addX", vec![Value::from(1)]).unwrap(), Value::from("cached"));
    assert_eq!(read_i64(&p, &["data", "x"]), 0);
}

#[test]
fn test_registration_order_is_outermost_first() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut disposers = Vec::new();
    for name in ["first", "second", "third"] {
        let log = log.clone();
        disposers.push(
            dispatcher
                .add_middleware(MiddlewareEntry::new(middleware_fn(name, move |_, next| {
                    log.lock().push(name);
                    next.run()
                })))
                .unwrap(),
        );
    }

    p.call("addX", vec![Value::from(1)]).unwrap();
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    assert_eq!(dispatcher.middleware_names(), vec!["first", "second", "third"]);
}

#[test]
fn test_scoped_middleware_ignores_other_trees() {
    let dispatcher = Dispatcher::new();
    let p1 = new_p(&dispatcher);
    let p2 = new_p(&dispatcher);
    let collector = Arc::new(CollectingMiddleware::new());
    let _d = dispatcher
        .add_middleware(MiddlewareEntry::from_arc(collector.clone()).scoped_to(&p1))
        .unwrap();

    p2.call("addXY", vec![Value::from(1), Value::from(1)]).unwrap();
    assert!(collector.calls().is_empty());

    child_p2(&p1).unwrap().call("addY", vec![Value::from(1)]).unwrap();
    assert_eq!(collector.names(), vec!["addY"]);
}

#[test]
fn test_disposal_mid_chain_keeps_the_snapshot() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let slot: Arc<Mutex<Option<MiddlewareDisposer>>> = Arc::new(Mutex::new(None));

    let disposer_slot = slot.clone();
    let _outer = dispatcher
        .add_middleware(MiddlewareEntry::new(middleware_fn("disposer", move |_, next| {
            if let Some(disposer) = disposer_slot.lock().take() {
                assert!(disposer.dispose());
            }
            next.run()
        })))
        .unwrap();
    let (collector, inner) = collect(&dispatcher);
    *slot.lock() = Some(inner);

    // the collector was disposed while this chain ran, but still sees it
    p.call("addX", vec![Value::from(1)]).unwrap();
    assert_eq!(collector.names(), vec!["addX"]);

    p.call("addX", vec![Value::from(1)]).unwrap();
    assert_eq!(collector.names(), vec!["addX"]);
    assert_eq!(dispatcher.middleware_count(), 1);
}

#[test]
fn test_same_middleware_twice_is_rejected() {
    let dispatcher = Dispatcher::new();
    let collector: Arc<dyn ActionMiddleware> = Arc::new(CollectingMiddleware::new());
    let _d = dispatcher.add_middleware(MiddlewareEntry::from_arc(collector.clone())).unwrap();

    let err = dispatcher.add_middleware(MiddlewareEntry::from_arc(collector)).unwrap_err();
    assert!(matches!(err, ActionError::MiddlewareAlreadyRegistered(_)));
    assert_eq!(dispatcher.middleware_count(), 1);
}

struct Tagger;

impl ActionMiddleware for Tagger {
    fn handle(&self, ctx: &ActionContext, next: Next<'_>) -> arbor_actions::Result<Value> {
        ctx.set_data("tagged", Value::from(true));
        next.run()
    }
}

#[test]
fn test_context_data_is_visible_to_inner_middleware() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let _tagger = dispatcher.add_middleware(MiddlewareEntry::new(Tagger)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _reader = dispatcher
        .add_middleware(MiddlewareEntry::new(middleware_fn("reader", move |ctx, next| {
            sink.lock().push(ctx.data("tagged"));
            next.run()
        })))
        .unwrap();

    p.call("addX", vec![Value::from(1)]).unwrap();
    assert_eq!(*seen.lock(), vec![Some(Value::from(true))]);
}

#[test]
fn test_writes_outside_actions_fail() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);

    let err = p.set_in(&["data", "x"], Value::from(5)).unwrap_err();
    assert!(matches!(err, ActionError::MutationOutsideAction { .. }));

    dispatcher.run_unprotected(|| p.set_in(&["data", "x"], Value::from(5))).unwrap();
    assert_eq!(read_i64(&p, &["data", "x"]), 5);
}

#[test]
fn test_unprotected_runs_are_invisible_to_middleware() {
    let dispatcher = Dispatcher::new();
    let p = new_p(&dispatcher);
    let (collector, _d) = collect(&dispatcher);

    dispatcher.run_unprotected(|| {
        p.set_in(&["data", "x"], Value::from(1)).unwrap();
        assert!(dispatcher.current_action_context().is_none());
    });
    assert!(collector.calls().is_empty());

    // actions inside an unprotected scope are still intercepted
    dispatcher.run_unprotected(|| p.call("addX", vec![Value::from(1)])).unwrap();
    assert_eq!(collector.names(), vec!["addX"]);
}

#[test]
fn test_stack_overflow_is_reported() {
    let dispatcher = Dispatcher::with_config(DispatcherConfig {
        max_depth: 4,
        ..DispatcherConfig::default()
    });
    let class = ModelClass::builder("Recursive")
        .action("down", |m, args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            if n == 0 {
                Ok(Value::from(0))
            } else {
                m.call("down", vec![Value::from(n - 1)])
            }
        })
        .build()
        .unwrap();
    let model = dispatcher.create_model(&class, Value::Null).unwrap();

    assert_eq!(model.call("down", vec![Value::from(3)]).unwrap(), Value::from(0));
    let err = model.call("down", vec![Value::from(10)]).unwrap_err();
    assert!(matches!(err, ActionError::StackOverflow { depth: 4 }));
    assert_eq!(dispatcher.stack_depth(), 0);
}

#[derive(Debug, Clone)]
enum Op {
    AddX(i64),
    AddXY(i64, i64),
    OpaqueArg,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-5i64..5).prop_map(Op::AddX),
        (-5i64..5, -5i64..5).prop_map(|(a, b)| Op::AddXY(a, b)),
        Just(Op::OpaqueArg),
    ]
}

proptest! {
    #[test]
    fn prop_stack_returns_to_empty(ops in prop::collection::vec(op_strategy(), 0..20)) {
        let dispatcher = Dispatcher::new();
        let p = new_p(&dispatcher);
        let (collector, _d) = collect(&dispatcher);
        let mut expected_x = 0;
        let mut expected_calls = 0;

        for op in ops {
            match op {
                Op::AddX(n) => {
                    p.call("addX", vec![Value::from(n)]).unwrap();
                    expected_x += n;
                    expected_calls += 1;
                }
                Op::AddXY(a, b) => {
                    p.call("addXY", vec![Value::from(a), Value::from(b)]).unwrap();
                    expected_x += a;
                    expected_calls += 3;
                }
                Op::OpaqueArg => {
                    // opaque args read as 0
                    let result = p.call("addX", vec![Value::opaque(())]);
                    prop_assert!(result.is_ok());
                    expected_calls += 1;
                }
            }
            prop_assert_eq!(dispatcher.stack_depth(), 0);
        }

        prop_assert_eq!(read_i64(&p, &["data", "x"]), expected_x);
        prop_assert_eq!(collector.calls().len(), expected_calls);
    }
}
