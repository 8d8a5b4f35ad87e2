//! End-to-end behavior of the engine: change propagation, computed values,
//! batching and eviction.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand_core::{AbsoluteStateAddress, Error, List, SearchKind, Value};
use strand_runtime::{ConsumerError, ConsumerHandle, Engine, EngineConfig};

fn item(price: f64, qty: f64) -> Value {
    Value::record([("price", price), ("qty", qty)])
}

fn shop() -> Engine {
    let engine = Engine::default();
    engine
        .register_container(
            "app",
            Value::record([
                ("items", Value::list([item(2.0, 3.0), item(5.0, 1.0)])),
                ("count", Value::from(0)),
            ]),
        )
        .unwrap();
    engine
}

fn numbers(values: &[Value]) -> Vec<f64> {
    values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect()
}

type Log = Rc<RefCell<Vec<usize>>>;

fn counting(label: &str, log: &Log) -> ConsumerHandle<Engine> {
    let log = Rc::clone(log);
    ConsumerHandle::from_fn(label, move |_: &Engine, changed: &[AbsoluteStateAddress]| {
        log.borrow_mut().push(changed.len());
        Ok(())
    })
}

fn define_totals(engine: &Engine, evaluations: &Rc<Cell<usize>>) {
    let evals = Rc::clone(evaluations);
    engine
        .define_computed("app", "items.*.total", move |scope| {
            evals.set(evals.get() + 1);
            let price = scope.get("items.*.price")?.as_f64().unwrap_or(0.0);
            let qty = scope.get("items.*.qty")?.as_f64().unwrap_or(0.0);
            Ok(Value::from(price * qty))
        })
        .unwrap();
}

#[test]
fn list_change_reaches_every_element_path() {
    let engine = shop();
    let log: Log = Rc::default();
    for i in 0..2 {
        let address = engine.address("app", "items.*.price", &[i]).unwrap();
        assert!(engine.register_consumer(&address, counting("price", &log)));
    }
    // items, items.*[0], items.*.price[0], items.*[1], items.*.price[1]
    assert_eq!(engine.mark_changed("app", "items", &[]).unwrap(), 5);
    let report = engine.flush();
    assert_eq!(report.addresses, 5);
    assert_eq!(report.applied, 2);
    assert_eq!(*log.borrow(), [1, 1]);
}

#[test]
fn same_address_twice_is_delivered_once() {
    let engine = shop();
    let log: Log = Rc::default();
    let count = engine.address("app", "count", &[]).unwrap();
    engine.register_consumer(&count, counting("count", &log));

    engine.set("app", "count", 1).unwrap();
    engine.set("app", "count", 2).unwrap();
    assert_eq!(engine.pending(), 2);
    let report = engine.flush();
    assert_eq!(report.addresses, 1);
    assert_eq!(*log.borrow(), [1]);
    assert_eq!(engine.get("app", "count").unwrap(), Value::from(2));
}

#[test]
fn flush_hook_fires_once_per_idle_transition() {
    let engine = shop();
    let requests = Rc::new(Cell::new(0));
    let seen = Rc::clone(&requests);
    engine.on_flush_requested(move || seen.set(seen.get() + 1));

    engine.set("app", "count", 1).unwrap();
    engine.set("app", "count", 2).unwrap();
    assert_eq!(requests.get(), 1);
    assert!(engine.is_flush_scheduled());
    engine.flush();
    assert!(!engine.is_flush_scheduled());
    engine.set("app", "count", 3).unwrap();
    assert_eq!(requests.get(), 2);
}

#[test]
fn computed_values_are_cached_until_a_walk_reaches_them() {
    let engine = shop();
    let evaluations = Rc::new(Cell::new(0));
    define_totals(&engine, &evaluations);

    let totals = engine.get_all("app", "items.*.total", &[]).unwrap();
    assert_eq!(numbers(&totals), [6.0, 5.0]);
    assert_eq!(evaluations.get(), 2);
    engine.get_all("app", "items.*.total", &[]).unwrap();
    assert_eq!(evaluations.get(), 2);

    engine
        .resolve("app", "items.1.qty", &[], Some(Value::from(4)))
        .unwrap();
    assert_eq!(engine.get("app", "items.1.total").unwrap(), Value::from(20.0));
    assert_eq!(evaluations.get(), 3);
    assert_eq!(engine.get("app", "items.0.total").unwrap(), Value::from(6.0));
    assert_eq!(evaluations.get(), 3);

    let stats = engine.stats();
    assert!(stats.cache.invalidations >= 1);
    assert_eq!(stats.evaluations, 3);
}

#[test]
fn aggregates_follow_element_changes_and_membership() {
    let engine = shop();
    let evaluations = Rc::new(Cell::new(0));
    define_totals(&engine, &evaluations);
    engine
        .define_computed("app", "grand", |scope| {
            let sum: f64 = scope
                .get_all("items.*.total")?
                .iter()
                .filter_map(Value::as_f64)
                .sum();
            Ok(Value::from(sum))
        })
        .unwrap();
    assert_eq!(engine.get("app", "grand").unwrap(), Value::from(11.0));

    engine
        .resolve("app", "items.0.price", &[], Some(Value::from(10)))
        .unwrap();
    assert_eq!(engine.get("app", "grand").unwrap(), Value::from(35.0));

    let current = engine.get("app", "items").unwrap();
    let mut rows = current.as_list().unwrap().as_slice().to_vec();
    rows.push(item(1.0, 1.0));
    engine.set("app", "items", Value::List(List::new(rows))).unwrap();
    assert_eq!(engine.get("app", "grand").unwrap(), Value::from(36.0));
}

#[test]
fn writes_below_a_record_invalidate_readers_of_the_record() {
    let engine = Engine::default();
    engine
        .register_container("app", Value::record([("user", Value::record([("name", "ada")]))]))
        .unwrap();
    engine
        .define_computed("app", "greeting", |scope| {
            let user = scope.get("user")?;
            let name = user
                .as_record()
                .and_then(|r| r.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Value::from(format!("hi {name}")))
        })
        .unwrap();
    assert_eq!(engine.get("app", "greeting").unwrap(), Value::from("hi ada"));
    engine.set("app", "user.name", "bob").unwrap();
    assert_eq!(engine.get("app", "greeting").unwrap(), Value::from("hi bob"));
}

#[test]
fn deleted_elements_are_evicted_after_flush() {
    let engine = shop();
    let evaluations = Rc::new(Cell::new(0));
    define_totals(&engine, &evaluations);
    let log: Log = Rc::default();
    let doomed = engine.address("app", "items.*.total", &[1]).unwrap();
    let handle = counting("doomed", &log);
    engine.register_consumer(&doomed, handle.clone());
    engine.read(&doomed).unwrap();
    assert!(engine.cached(&doomed).is_some());

    let current = engine.get("app", "items").unwrap();
    let first = current.as_list().unwrap().as_slice()[0].clone();
    engine.set("app", "items", Value::list([first])).unwrap();
    engine.flush();

    assert!(log.borrow().is_empty());
    assert!(engine.cached(&doomed).is_none());
    assert!(!engine.unregister_consumer(&doomed, handle.id()));
    assert!(engine.stats().evicted_elements >= 1);
    assert_eq!(engine.get_all("app", "items.*.total", &[]).unwrap().len(), 1);
}

#[test]
fn static_cycles_fail_with_the_triggering_path() {
    let engine = shop();
    engine.add_static_dependency("app", "x", "y").unwrap();
    engine.add_static_dependency("app", "y", "x").unwrap();
    let err = engine.set("app", "x", 1).unwrap_err();
    assert!(matches!(err, Error::DependencyCycle { .. }));
    assert_eq!(err.path(), Some("app:x"));
    assert_eq!(engine.pending(), 0);
}

#[test]
fn recursive_computed_values_fail() {
    let engine = shop();
    engine
        .define_computed("app", "a", |scope| scope.get("b"))
        .unwrap();
    engine
        .define_computed("app", "b", |scope| scope.get("a"))
        .unwrap();
    assert!(matches!(
        engine.get("app", "a"),
        Err(Error::DependencyCycle { .. })
    ));
    // Evaluation state is unwound after the failure.
    assert!(matches!(
        engine.get("app", "b"),
        Err(Error::DependencyCycle { .. })
    ));
}

#[test]
fn address_errors() {
    let engine = shop();
    assert!(matches!(
        engine.get("nope", "count"),
        Err(Error::ContainerNotFound { .. })
    ));
    assert!(matches!(
        engine.get("app", "items..price"),
        Err(Error::Address { .. })
    ));
    assert!(matches!(
        engine.get("app", "items.9.price"),
        Err(Error::ListIndexNotFound { index: 9, len: 2, .. })
    ));
    assert!(matches!(
        engine.get("app", "items.*.price"),
        Err(Error::WildcardResolution { .. })
    ));
    assert!(matches!(
        engine.register_container("app", Value::Null),
        Err(Error::InvalidWrite { .. })
    ));
}

#[test]
fn computed_paths_are_read_only() {
    let engine = shop();
    define_totals(&engine, &Rc::new(Cell::new(0)));
    assert!(matches!(
        engine.set("app", "items.0.total", 1),
        Err(Error::InvalidWrite { .. })
    ));
}

#[test]
fn partial_wildcards_work_with_get_all_only() {
    let engine = Engine::default();
    let grid = Value::list([
        Value::record([("cells", Value::list([1, 2, 3]))]),
        Value::record([("cells", Value::list([4, 5, 6]))]),
    ]);
    engine
        .register_container("app", Value::record([("grid", grid)]))
        .unwrap();
    assert!(matches!(
        engine.resolve("app", "grid.*.cells.1", &[], None),
        Err(Error::WildcardResolution { .. })
    ));
    let column = engine.get_all("app", "grid.*.cells.1", &[]).unwrap();
    assert_eq!(numbers(&column), [2.0, 5.0]);
    let row = engine.get_all("app", "grid.*.cells.*", &[1]).unwrap();
    assert_eq!(numbers(&row), [4.0, 5.0, 6.0]);
    assert_eq!(
        engine.resolve("app", "grid.*.cells.*", &[0, 2], None).unwrap(),
        Value::from(3)
    );
}

#[test]
fn consumers_may_write_during_a_flush() {
    let engine = shop();
    let a = engine.address("app", "count", &[]).unwrap();
    engine.register_consumer(
        &a,
        ConsumerHandle::from_fn("mirror", |engine: &Engine, _: &[AbsoluteStateAddress]| {
            let count = engine.get("app", "count")?;
            engine.set("app", "mirror", count)?;
            Ok(())
        }),
    );
    let log: Log = Rc::default();
    let mirror = engine.address("app", "mirror", &[]).unwrap();
    engine.register_consumer(&mirror, counting("mirror", &log));

    engine.set("app", "count", 7).unwrap();
    let first = engine.flush();
    assert!(first.is_clean());
    assert!(log.borrow().is_empty());
    assert_eq!(engine.pending(), 1);

    engine.flush();
    assert_eq!(*log.borrow(), [1]);
    assert_eq!(engine.get("app", "mirror").unwrap(), Value::from(7));
}

#[test]
fn consumer_failures_are_reported_not_retried() {
    let engine = shop();
    let count = engine.address("app", "count", &[]).unwrap();
    engine.register_consumer(
        &count,
        ConsumerHandle::from_fn("broken", |_: &Engine, _: &[AbsoluteStateAddress]| {
            Err(ConsumerError::failed("nope"))
        }),
    );
    engine.set("app", "count", 1).unwrap();
    let report = engine.flush();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(&*report.failures[0].label, "broken");
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.flush().failures.len(), 0);
    assert_eq!(engine.stats().consumer_failures, 1);
}

#[test]
fn unregistering_a_container_drops_everything() {
    let engine = shop();
    define_totals(&engine, &Rc::new(Cell::new(0)));
    engine.get_all("app", "items.*.total", &[]).unwrap();
    assert!(engine.stats().interned_addresses > 0);

    engine.unregister_container("app").unwrap();
    assert!(!engine.has_container("app"));
    let stats = engine.stats();
    assert_eq!(stats.interned_addresses, 0);
    assert_eq!((stats.static_edges, stats.dynamic_edges), (0, 0));
    assert!(matches!(
        engine.unregister_container("app"),
        Err(Error::ContainerNotFound { .. })
    ));

    engine
        .register_container("app", Value::record([("count", 9)]))
        .unwrap();
    assert_eq!(engine.get("app", "count").unwrap(), Value::from(9));
}

#[test]
fn cross_container_reads_are_tracked() {
    let engine = Engine::new(EngineConfig::default().with_max_walk_depth(32));
    engine
        .register_container("prefs", Value::record([("rate", 2)]))
        .unwrap();
    engine
        .register_container("app", Value::record([("base", 10)]))
        .unwrap();
    engine
        .define_computed("app", "scaled", |scope| {
            let base = scope.get("base")?.as_f64().unwrap_or(0.0);
            let rate = scope.get_in("prefs", "rate")?.as_f64().unwrap_or(0.0);
            Ok(Value::from(base * rate))
        })
        .unwrap();
    assert_eq!(engine.get("app", "scaled").unwrap(), Value::from(20.0));
    engine.set("prefs", "rate", 3).unwrap();
    assert_eq!(engine.get("app", "scaled").unwrap(), Value::from(30.0));
}

#[test]
fn aggregates_see_a_list_emptied_by_a_write() {
    let engine = shop();
    let evaluations = Rc::new(Cell::new(0));
    define_totals(&engine, &evaluations);
    engine
        .define_computed("app", "size", |scope| Ok(Value::from(scope.get_all("items.*")?.len())))
        .unwrap();
    engine
        .define_computed("app", "grand", |scope| {
            let sum: f64 = scope
                .get_all("items.*.total")?
                .iter()
                .filter_map(Value::as_f64)
                .sum();
            Ok(Value::from(sum))
        })
        .unwrap();
    assert_eq!(engine.get("app", "size").unwrap(), Value::from(2));
    assert_eq!(engine.get("app", "grand").unwrap(), Value::from(11.0));

    engine
        .set("app", "items", Value::List(List::new(Vec::new())))
        .unwrap();
    assert_eq!(engine.get("app", "size").unwrap(), Value::from(0));
    assert_eq!(engine.get("app", "grand").unwrap(), Value::from(0.0));
}

#[test]
fn values_stamped_before_an_unpropagated_write_are_recomputed() {
    let engine = Engine::default();
    engine
        .register_container("app", Value::record([("n", 1)]))
        .unwrap();
    engine
        .define_computed("app", "double", |scope| {
            Ok(Value::from(scope.get("n")?.as_f64().unwrap_or(0.0) * 2.0))
        })
        .unwrap();
    let double = engine.address("app", "double", &[]).unwrap();
    assert_eq!(engine.read(&double).unwrap(), Value::from(2.0));
    assert_eq!(engine.cached(&double).unwrap().stamps[0].revision, 0);

    // The walk from `n` fails on the loop before it reaches `double`.
    engine.add_static_dependency("app", "n", "spin").unwrap();
    engine.add_static_dependency("app", "spin", "n").unwrap();
    assert!(matches!(
        engine.set("app", "n", 5),
        Err(Error::DependencyCycle { .. })
    ));

    assert_eq!(engine.read(&double).unwrap(), Value::from(10.0));
    let entry = engine.cached(&double).unwrap();
    assert_eq!(entry.stamps[0].revision, engine.revision("app").unwrap());
    assert_eq!(engine.stats().cache.stale, 1);
}

#[test]
fn delete_search_reaches_elements_a_sibling_expanded_first() {
    let engine = Engine::default();
    let values = |vs: &[i32]| Value::list(vs.iter().map(|&v| Value::record([("v", v)])));
    engine
        .register_container(
            "app",
            Value::record([(
                "data",
                Value::record([("flag", Value::from(true)), ("items", values(&[1, 2, 3]))]),
            )]),
        )
        .unwrap();
    engine
        .add_dynamic_dependency(("app", "data.flag"), ("app", "data.items.*.v"))
        .unwrap();
    let log: Log = Rc::default();
    for i in 0..3 {
        let address = engine.address("app", "data.items.*", &[i]).unwrap();
        engine.register_consumer(&address, counting("element", &log));
    }

    let data = engine.address("app", "data", &[]).unwrap();
    engine
        .write_with_search(
            &data,
            Value::record([("flag", Value::from(true)), ("items", values(&[9]))]),
            SearchKind::Delete,
        )
        .unwrap();
    let report = engine.flush();
    assert_eq!(report.applied, 3);
    assert_eq!(*log.borrow(), [1, 1, 1]);
    assert_eq!(engine.stats().evicted_elements, 3);
}

#[test]
fn change_search_reaches_moved_elements_only() {
    let engine = Engine::default();
    let rows = Value::list(["a", "b", "c"].map(|n| Value::record([("name", n)])));
    engine
        .register_container("app", Value::record([("items", rows)]))
        .unwrap();
    let log: Log = Rc::default();
    let mut addresses = Vec::new();
    for i in 0..3 {
        let address = engine.address("app", "items.*", &[i]).unwrap();
        engine.register_consumer(&address, counting("row", &log));
        addresses.push(address);
    }

    let current = engine.get("app", "items").unwrap();
    let mut reversed = current.as_list().unwrap().as_slice().to_vec();
    reversed.reverse();
    let items = engine.address("app", "items", &[]).unwrap();
    engine
        .write_with_search(&items, Value::List(List::new(reversed)), SearchKind::Change)
        .unwrap();
    let report = engine.flush();
    assert_eq!(report.applied, 2);
    assert_eq!(
        engine.get("app", "items.0.name").unwrap(),
        Value::from("c")
    );

    // The middle row kept its position; its consumer still runs on the next
    // plain change.
    engine.mark_address_changed(&addresses[1], SearchKind::New).unwrap();
    assert_eq!(engine.flush().applied, 1);
}
