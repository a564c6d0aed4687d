//! Integration Tests for the Property Kernel
//!
//! These tests verify that computed properties, chains, observers, bindings
//! and proxies work together through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use lattice_metal::reactive::computed::ComputedProperty;
use lattice_metal::reactive::events::listeners_for;
use lattice_metal::{
    add_observer, alias, bind, computed, define_property, flush_bindings, inject, tag_for_property,
    Method, Mixin, Obj, Owner, Value,
};

fn counter() -> (Rc<Cell<u32>>, Method) {
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    (calls, Method::observer(move |_, _| seen.set(seen.get() + 1)))
}

fn text(value: Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// Test a computed property over a dotted path that crosses objects.
#[test]
fn computed_over_paths_tracks_the_whole_chain() {
    let address = Obj::with_props([("city", "Paris")]);
    let person = Obj::with_props([("address", &address)]);
    let evaluations = Rc::new(Cell::new(0));
    let count = evaluations.clone();
    define_property(
        &person,
        "label",
        computed(&["address.city"], move |obj, _| {
            count.set(count.get() + 1);
            Value::from(format!("lives in {}", text(obj.get("address.city"))))
        })
        .unwrap(),
    )
    .unwrap();

    assert_eq!(text(person.get("label")), "lives in Paris");
    assert_eq!(text(person.get("label")), "lives in Paris");
    assert_eq!(evaluations.get(), 1);

    address.set("city", "Rome").unwrap();
    assert_eq!(text(person.get("label")), "lives in Rome");

    person.set("address", Obj::with_props([("city", "Oslo")])).unwrap();
    assert_eq!(text(person.get("label")), "lives in Oslo");

    // the old address is no longer part of the chain
    address.set("city", "Lima").unwrap();
    assert_eq!(text(person.get("label")), "lives in Oslo");
    assert_eq!(evaluations.get(), 3);
}

/// Test that a prototype's computed properties and observers reach every
/// instance while caches stay per instance.
#[test]
fn prototypes_share_declarations_not_state() {
    let proto = Obj::prototype(None);
    define_property(
        &proto,
        "double",
        computed(&["value"], |obj, _| {
            Value::from(obj.get("value").as_number().unwrap_or_default() * 2.0)
        })
        .unwrap(),
    )
    .unwrap();
    let (calls, method) = counter();
    add_observer(&proto, "double", None, method).unwrap();

    let a = Obj::create(&proto);
    let b = Obj::create(&proto);
    a.set("value", 1).unwrap();
    b.set("value", 10).unwrap();
    assert_eq!(a.get("double"), Value::from(2));
    assert_eq!(b.get("double"), Value::from(20));

    a.set("value", 2).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(a.get("double"), Value::from(4));
    assert_eq!(b.get("double"), Value::from(20));
}

/// Test a setter that normalizes what it stores.
#[test]
fn computed_setters_store_their_return_value() {
    let obj = Obj::with_props([("celsius", 0)]);
    let fahrenheit = ComputedProperty::new(|obj, _| {
        Value::from(obj.get("celsius").as_number().unwrap_or_default() * 9.0 / 5.0 + 32.0)
    })
    .with_setter(|obj, _, value, _| {
        let f = value.as_number().unwrap_or_default();
        obj.set("celsius", (f - 32.0) * 5.0 / 9.0).unwrap();
        Value::from(f)
    })
    .property(&["celsius"])
    .unwrap();
    define_property(&obj, "fahrenheit", fahrenheit).unwrap();

    assert_eq!(obj.get("fahrenheit"), Value::from(32));
    obj.set("fahrenheit", 212).unwrap();
    assert_eq!(obj.get("celsius"), Value::from(100));
    assert_eq!(obj.get("fahrenheit"), Value::from(212));
}

/// Test aliases, bindings and mixins used together.
#[test]
fn mixin_with_alias_and_binding() {
    let settings = Obj::with_props([("theme", "dark")]);
    let proto = Obj::prototype(None);
    let (changes, method) = counter();
    Mixin::new("Themed")
        .property("currentTheme", alias("theme"))
        .observer("currentTheme", method)
        .with_binding(lattice_metal::Binding::new("theme", "theme").from_root(&settings))
        .apply(&proto)
        .unwrap();

    let widget = Obj::create(&proto);
    assert!(Mixin::new("Themed").detect(&widget));
    assert_eq!(widget.get("currentTheme"), Value::from("dark"));

    settings.set("theme", "light").unwrap();
    flush_bindings();
    assert_eq!(widget.get("currentTheme"), Value::from("light"));
    assert_eq!(changes.get(), 1);

    // two-way: the widget writes back through its alias
    widget.set("currentTheme", "solarized").unwrap();
    flush_bindings();
    assert_eq!(settings.get("theme"), Value::from("solarized"));
}

/// Test that a binding through a proxy follows content swaps.
#[test]
fn binding_through_a_proxy() {
    let first = Obj::with_props([("title", "One")]);
    let proxy = Obj::proxy(&first);
    let view = Obj::with_props([("model", &proxy)]);
    bind(&view, "heading", "model.title").unwrap();
    assert_eq!(view.get("heading"), Value::from("One"));

    proxy.set("content", Obj::with_props([("title", "Two")])).unwrap();
    flush_bindings();
    assert_eq!(view.get("heading"), Value::from("Two"));
}

/// Test injected properties resolving through an owner.
#[test]
fn injected_services_resolve_lazily() {
    struct Container {
        store: Obj,
    }
    impl Owner for Container {
        fn lookup(&self, full_name: &str) -> Option<Value> {
            (full_name == "service:store").then(|| Value::from(&self.store))
        }
    }

    let store = Obj::with_props([("records", 3)]);
    let proto = Obj::prototype(None);
    proto.set_owner(Rc::new(Container { store: store.clone() }));
    define_property(&proto, "store", inject("service", None)).unwrap();

    let route = Obj::create(&proto);
    assert_eq!(route.get("store.records"), Value::from(3));
}

/// Test that tags follow writes without any observers present.
#[test]
fn tags_invalidate_on_write() {
    let obj = Obj::with_props([("a", 1), ("b", 1)]);
    let a = tag_for_property(&obj, "a");
    let b = tag_for_property(&obj, "b");
    let (snap_a, snap_b) = (a.value(), b.value());

    obj.set("a", 2).unwrap();
    assert!(!a.validate(snap_a));
    assert!(b.validate(snap_b));
}

/// Test that listeners added during dispatch do not run in the same send.
#[test]
fn listeners_added_during_dispatch_wait_for_the_next_send() {
    let obj = Obj::with_props([("a", 0)]);
    let log = Rc::new(RefCell::new(Vec::new()));
    let inner_log = log.clone();
    let outer_log = log.clone();
    let target = obj.clone();
    let late = Method::observer(move |_, _| inner_log.borrow_mut().push("late"));
    add_observer(
        &obj,
        "a",
        None,
        Method::observer(move |_, _| {
            outer_log.borrow_mut().push("early");
            if listeners_for(&target, "a:change").len() == 1 {
                add_observer(&target, "a", None, late.clone()).unwrap();
            }
        }),
    )
    .unwrap();

    obj.set("a", 1).unwrap();
    assert_eq!(*log.borrow(), vec!["early"]);
    obj.set("a", 2).unwrap();
    assert_eq!(*log.borrow(), vec!["early", "late", "early"]);
}
