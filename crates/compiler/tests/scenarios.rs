//! End-to-end scenarios against the reference evaluator
//!
//! Each test drives a complete network: inject the initial signals, run to
//! quiescence, then check the drained output lines (or final agent state)
//! against the documented expectations.

use mycelc::eval::Value;
use mycelc::{CompilerConfig, Evaluator, evaluate_network};

fn evaluator(source: &str) -> Evaluator {
    evaluate_network(source, &CompilerConfig::default()).expect("build failed")
}

#[test]
fn test_hello_greeter() {
    let source = "network Greeter {\n  frequencies {\n    frequency greeting { name: string }\n    frequency hello { msg: string }\n  }\n  hyphae {\n    hyphal G {\n      on signal(greeting, g) {\n        emit hello { msg: format(\"Hello, {}!\", g.name) }\n      }\n    }\n  }\n  topology {\n    fruiting_body source\n    fruiting_body out\n    spawn G g1\n    socket source -[greeting]-> g1\n    socket g1 -[hello]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("source", "greeting", vec![("name", Value::str("World"))])
        .unwrap();
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: Hello, World!"]);
}

#[test]
fn test_counter_accumulates_state() {
    let source = "network Counting {\n  frequencies { frequency tick { v: u32 } }\n  hyphae {\n    hyphal Counter {\n      state { count: u32 = 0 }\n      on signal(tick, t) { state.count = state.count + t.v }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn Counter c1\n    socket src -[tick]-> c1\n  }\n}";
    let mut ev = evaluator(source);
    for v in [5i64, 3, 7] {
        ev.inject("src", "tick", vec![("v", Value::Int(v))]).unwrap();
    }
    ev.run().unwrap();
    assert_eq!(
        ev.state_value("c1", "count").unwrap().as_int().unwrap(),
        15
    );
    assert!(ev.drained().is_empty());
}

#[test]
fn test_two_stage_pipeline() {
    let source = "network Pipe {\n  frequencies {\n    frequency inflow { x: i64 }\n    frequency mid { y: i64 }\n    frequency result { z: i64 }\n  }\n  hyphae {\n    hyphal Doubler { on signal(inflow, s) { emit mid { y: s.x * 2 } } }\n    hyphal Inc { on signal(mid, d) { emit result { z: d.y + 1 } } }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn Doubler d1\n    spawn Inc i1\n    socket src -[inflow]-> d1\n    socket d1 -[mid]-> i1\n    socket i1 -[result]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "inflow", vec![("x", Value::Int(10))]).unwrap();
    ev.inject("src", "inflow", vec![("x", Value::Int(20))]).unwrap();
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: 21", "OUTPUT: 41"]);
}

#[test]
fn test_enum_match_dispatch() {
    let source = "network Shapes {\n  frequencies {\n    frequency compute { s: Shape }\n    frequency area { a: u32 }\n  }\n  types { enum Shape { Circle(u32), Square(u32) } }\n  hyphae {\n    hyphal Worker {\n      on signal(compute, c) {\n        match c.s {\n          Shape::Circle(r) -> { emit area { a: r * r * 3 } }\n          Shape::Square(w) -> { emit area { a: w * w } }\n        }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn Worker w1\n    socket src -[compute]-> w1\n    socket w1 -[area]-> out\n  }\n}";
    let mut ev = evaluator(source);
    let circle = ev
        .enum_payload("Shape", "Circle", Some(Value::Int(4)))
        .unwrap();
    let square = ev
        .enum_payload("Shape", "Square", Some(Value::Int(5)))
        .unwrap();
    ev.inject("src", "compute", vec![("s", circle)]).unwrap();
    ev.inject("src", "compute", vec![("s", square)]).unwrap();
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: 48", "OUTPUT: 25"]);
}

#[test]
fn test_tuple_payload_unpacked_by_bindings() {
    let source = "network Pairs {\n  frequencies {\n    frequency go { n: i64 }\n    frequency reply { z: i64 }\n  }\n  types { enum Msg { Pair(vec<i64>), Halt } }\n  hyphae {\n    hyphal P {\n      on signal(go, g) {\n        let m = Msg::Pair((g.n, 7))\n        match m {\n          Msg::Pair(a, b) -> { emit reply { z: a * 10 + b } }\n          Msg::Halt -> { }\n        }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn P p1\n    socket src -[go]-> p1\n    socket p1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "go", vec![("n", Value::Int(4))]).unwrap();
    ev.run().unwrap();
    // The constructor takes one tuple argument; the two-name pattern
    // binds its elements
    assert_eq!(ev.drained(), ["OUTPUT: 47"]);
}

#[test]
fn test_vector_slice_sum() {
    let source = "network Slicing {\n  frequencies {\n    frequency nums { v: vec<i64> }\n    frequency reply { total: i64 }\n  }\n  hyphae {\n    hyphal Summer {\n      on signal(nums, n) { emit reply { total: sum(n.v[2..5]) } }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn Summer s1\n    socket src -[nums]-> s1\n    socket s1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    let v = Value::list((1..=9).map(Value::Int).collect());
    ev.inject("src", "nums", vec![("v", v)]).unwrap();
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: 12"]);
}

#[test]
fn test_self_loop_reaches_quiescence() {
    let source = "network Looper {\n  frequencies { frequency step { n: i64 } }\n  hyphae {\n    hyphal L {\n      state { hits: i64 = 0 }\n      on signal(step, s) {\n        state.hits = state.hits + 1\n        if s.n > 0 { emit step { n: s.n - 1 } }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn L l1\n    socket src -[step]-> l1\n    socket l1 -[step]-> l1\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "step", vec![("n", Value::Int(10))]).unwrap();
    ev.run().unwrap();
    // Exactly 11 activations, then a quiescent exit well under the cap
    assert_eq!(ev.state_value("l1", "hits").unwrap().as_int().unwrap(), 11);
    assert!(ev.cycles_used() <= 12, "used {} cycles", ev.cycles_used());
    assert!(!ev.hit_max_cycles());
}

#[test]
fn test_max_cycles_warning() {
    let source = "network Forever {\n  config { max_cycles: 5 }\n  frequencies { frequency step { n: i64 } }\n  hyphae {\n    hyphal L { on signal(step, s) { emit step { n: 1 } } }\n  }\n  topology {\n    fruiting_body src\n    spawn L l1\n    socket src -[step]-> l1\n    socket l1 -[step]-> l1\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "step", vec![("n", Value::Int(1))]).unwrap();
    ev.run().unwrap();
    assert!(ev.hit_max_cycles());
    assert!(
        ev.output()
            .contains("warning: tidal scheduler stopped after 5 cycles")
    );
}

#[test]
fn test_broadcast_reaches_all_spawns() {
    let source = "network Fanout {\n  frequencies { frequency ping { n: i64 } }\n  hyphae {\n    hyphal W {\n      state { seen: i64 = 0 }\n      on signal(ping, p) { state.seen = state.seen + p.n }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn W w1\n    spawn W w2\n    spawn W w3\n    socket src -[ping]-> *\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "ping", vec![("n", Value::Int(7))]).unwrap();
    ev.run().unwrap();
    for agent in ["w1", "w2", "w3"] {
        assert_eq!(ev.state_value(agent, "seen").unwrap().as_int().unwrap(), 7);
    }
}

#[test]
fn test_guard_filters_signals() {
    let source = "network Guarded {\n  frequencies { frequency tick { v: i64 } }\n  hyphae {\n    hyphal C {\n      state { count: i64 = 0 }\n      on signal(tick, t) when t.v > 0 { state.count = state.count + 1 }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn C c1\n    socket src -[tick]-> c1\n  }\n}";
    let mut ev = evaluator(source);
    for v in [5i64, -1, 0, 3] {
        ev.inject("src", "tick", vec![("v", Value::Int(v))]).unwrap();
    }
    ev.run().unwrap();
    assert_eq!(ev.state_value("c1", "count").unwrap().as_int().unwrap(), 2);
}

#[test]
fn test_rest_and_cycle_handlers() {
    let source = "network Timers {\n  frequencies { frequency kick { n: i64 } }\n  hyphae {\n    hyphal T {\n      state { phase: i64 = 0 }\n      on rest { state.phase = 1 }\n      on cycle 2 { state.phase = state.phase + 10 }\n      on signal(kick, k) {\n        if k.n > 0 { emit kick { n: k.n - 1 } }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn T t1\n    socket src -[kick]-> t1\n    socket t1 -[kick]-> t1\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "kick", vec![("n", Value::Int(3))]).unwrap();
    ev.run().unwrap();
    // rest set 1; the self-loop keeps cycle 2 alive so the timer adds 10
    assert_eq!(ev.state_value("t1", "phase").unwrap().as_int().unwrap(), 11);
}

#[test]
fn test_rules_and_report() {
    let source = "network Ruled {\n  frequencies { frequency tick { v: i64 } }\n  hyphae {\n    hyphal R {\n      state { total: i64 = 0 }\n      on signal(tick, t) {\n        state.total = state.total + double(t.v)\n        report running_total: state.total\n      }\n      rule double(x: i64) -> i64 { return x * 2 }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn R r1\n    socket src -[tick]-> r1\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "tick", vec![("v", Value::Int(4))]).unwrap();
    ev.inject("src", "tick", vec![("v", Value::Int(5))]).unwrap();
    ev.run().unwrap();
    assert_eq!(ev.state_value("r1", "total").unwrap().as_int().unwrap(), 18);
    let reports = ev.reports_for("r1");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].0, "running_total");
    assert_eq!(reports[0].1.as_int().unwrap(), 8);
    assert_eq!(reports[1].1.as_int().unwrap(), 18);
}

// ---------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------

#[test]
fn test_empty_handler_is_a_noop() {
    let source = "network Empty {\n  frequencies { frequency tick { v: i64 } }\n  hyphae { hyphal N { on signal(tick, t) { } } }\n  topology {\n    fruiting_body src\n    spawn N n1\n    socket src -[tick]-> n1\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "tick", vec![("v", Value::Int(1))]).unwrap();
    ev.run().unwrap();
    assert!(ev.drained().is_empty());
}

#[test]
fn test_vec_out_of_bounds_reads_zero() {
    let source = "network Oob {\n  frequencies {\n    frequency nums { v: vec<i64> }\n    frequency reply { total: i64 }\n  }\n  hyphae {\n    hyphal S { on signal(nums, n) { emit reply { total: n.v[99] } } }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn S s1\n    socket src -[nums]-> s1\n    socket s1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject(
        "src",
        "nums",
        vec![("v", Value::list(vec![Value::Int(1), Value::Int(2)]))],
    )
    .unwrap();
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: 0"]);
}

#[test]
fn test_map_miss_reads_zero_and_insertion_order() {
    let source = "network Mapping {\n  frequencies {\n    frequency go { n: i64 }\n    frequency reply { found: i64, missing: i64, ordered: i64 }\n  }\n  hyphae {\n    hyphal M {\n      state { table: map<i64, i64> }\n      on signal(go, g) {\n        state.table[7] = 70\n        state.table[3] = 30\n        state.table[9] = 90\n        let keys_in_order = 0\n        for k, v in state.table {\n          keys_in_order = keys_in_order * 10 + k\n        }\n        emit reply { found: state.table[3], missing: state.table[42], ordered: keys_in_order }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn M m1\n    socket src -[go]-> m1\n    socket m1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "go", vec![("n", Value::Int(1))]).unwrap();
    ev.run().unwrap();
    // found=30, missing=0, insertion order 7,3,9 -> 739
    assert_eq!(ev.drained(), ["OUTPUT: 30 0 739"]);
}

#[test]
fn test_unmatched_match_is_noop_and_zero() {
    let source = "network Unmatched {\n  frequencies {\n    frequency go { n: i64 }\n    frequency reply { z: i64 }\n  }\n  hyphae {\n    hyphal U {\n      on signal(go, g) {\n        match g.n {\n          1 -> { emit reply { z: 100 } }\n        }\n        let v = match g.n { 2 -> { 22 } }\n        emit reply { z: v + 5 }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn U u1\n    socket src -[go]-> u1\n    socket u1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "go", vec![("n", Value::Int(9))]).unwrap();
    ev.run().unwrap();
    // Statement match skipped entirely; expression match yields zero
    assert_eq!(ev.drained(), ["OUTPUT: 5"]);
}

#[test]
fn test_unrouted_emission_is_dropped() {
    let source = "network Dropped {\n  frequencies {\n    frequency go { n: i64 }\n    frequency lost { n: i64 }\n  }\n  hyphae {\n    hyphal D {\n      state { ran: i64 = 0 }\n      on signal(go, g) {\n        emit lost { n: 1 }\n        state.ran = 1\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn D d1\n    socket src -[go]-> d1\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "go", vec![("n", Value::Int(1))]).unwrap();
    ev.run().unwrap();
    assert_eq!(ev.state_value("d1", "ran").unwrap().as_int().unwrap(), 1);
    assert!(ev.drained().is_empty());
}

#[test]
fn test_tuple_match_and_alternation() {
    let source = "network Tuples {\n  frequencies {\n    frequency go { n: i64 }\n    frequency reply { z: i64 }\n  }\n  hyphae {\n    hyphal T {\n      on signal(go, g) {\n        let pair = (g.n, 5)\n        match pair {\n          (1, five) -> { emit reply { z: five } }\n          (2, five) | other -> { emit reply { z: 99 } }\n        }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn T t1\n    socket src -[go]-> t1\n    socket t1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "go", vec![("n", Value::Int(1))]).unwrap();
    ev.inject("src", "go", vec![("n", Value::Int(3))]).unwrap();
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: 5", "OUTPUT: 99"]);
}

#[test]
fn test_string_comparison_and_struct_access() {
    let source = "network Strings {\n  frequencies {\n    frequency go { tag: string }\n    frequency reply { z: i64 }\n  }\n  types { struct Point { x: i64, y: i64 } }\n  hyphae {\n    hyphal S {\n      on signal(go, g) {\n        let p = Point { x: 3, y: 4 }\n        if g.tag == \"hit\" {\n          emit reply { z: p.x + p.y }\n        } else {\n          emit reply { z: 0 - 1 }\n        }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn S s1\n    socket src -[go]-> s1\n    socket s1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "go", vec![("tag", Value::str("hit"))]).unwrap();
    ev.inject("src", "go", vec![("tag", Value::str("miss"))]).unwrap();
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: 7", "OUTPUT: -1"]);
}

#[test]
fn test_closures_and_if_expression() {
    let source = "network Fns {\n  frequencies {\n    frequency go { n: i64 }\n    frequency reply { z: i64 }\n  }\n  hyphae {\n    hyphal F {\n      on signal(go, g) {\n        let bias = 100\n        let add = fn(a, b) { return a + b + bias }\n        let z = if g.n > 0 { add(g.n, 1) } else { 0 }\n        emit reply { z: z }\n      }\n    }\n  }\n  topology {\n    fruiting_body src\n    fruiting_body out\n    spawn F f1\n    socket src -[go]-> f1\n    socket f1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.inject("src", "go", vec![("n", Value::Int(4))]).unwrap();
    ev.run().unwrap();
    // The closure captures `bias` from the handler's locals
    assert_eq!(ev.drained(), ["OUTPUT: 105"]);
}

#[test]
fn test_startup_injection_from_cli() {
    let source = "network Boot {\n  frequencies {\n    frequency startup { source_file: string, output_file: string }\n    frequency reply { msg: string }\n  }\n  hyphae {\n    hyphal B { on signal(startup, s) { emit reply { msg: s.source_file } } }\n  }\n  topology {\n    fruiting_body boot\n    fruiting_body out\n    spawn B b1\n    socket boot -[startup]-> b1\n    socket b1 -[reply]-> out\n  }\n}";
    let mut ev = evaluator(source);
    ev.set_cli("demo.mycelial", "demo.s");
    ev.run().unwrap();
    assert_eq!(ev.drained(), ["OUTPUT: demo.mycelial"]);
}
