//! End-to-end scenarios: project JSON → compile → schedule → observe.
//!
//! Each test builds a small project the way the loader would hand it
//! over, runs it headless on a hand-driven clock, and asserts on
//! variable state at tick boundaries.

use sb3_core::Value;
use sb3_runtime::{MockClock, Runtime, RuntimeConfig, ThreadStatus};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn runtime_for(project: serde_json::Value) -> (Runtime, Rc<MockClock>) {
    let compiled = sb3_compiler::compile(&project).expect("project compiles");
    let clock = MockClock::new();
    let config = RuntimeConfig {
        seed: Some(42),
        ..RuntimeConfig::default()
    };
    let rt = Runtime::new(compiled, config).with_clock(clock.clone());
    (rt, clock)
}

fn number(rt: &Runtime, name: &str) -> f64 {
    match rt.global_variable(name) {
        Some(Value::Number(n)) => n,
        other => panic!("variable {} is {:?}", name, other),
    }
}

#[test]
fn s1_arithmetic_with_type_inference() {
    // result = (3 + 5) * 2
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["result", 0]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "set"},
                "set": {"opcode": "data_setvariableto",
                        "fields": {"VARIABLE": ["result", "v1"]},
                        "inputs": {"VALUE": [3, "mul", [4, "0"]]}},
                "mul": {"opcode": "operator_multiply",
                        "inputs": {"NUM1": [3, "add", [4, "0"]], "NUM2": [1, [4, "2"]]}},
                "add": {"opcode": "operator_add",
                        "inputs": {"NUM1": [1, [4, "3"]], "NUM2": [1, [4, "5"]]}}
            }
        }]
    }));
    rt.green_flag();
    rt.run(10);
    assert_eq!(number(&rt, "result"), 16.0);
}

#[test]
fn s2_loop_accumulator() {
    // sum = 0; repeat 5 { sum += 2 }
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["sum", 0]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "init"},
                "init": {"opcode": "data_setvariableto", "next": "loop",
                         "fields": {"VARIABLE": ["sum", "v1"]},
                         "inputs": {"VALUE": [1, [4, "0"]]}},
                "loop": {"opcode": "control_repeat",
                         "inputs": {"TIMES": [1, [4, "5"]], "SUBSTACK": [2, "chg"]}},
                "chg": {"opcode": "data_changevariableby",
                        "fields": {"VARIABLE": ["sum", "v1"]},
                        "inputs": {"VALUE": [1, [4, "2"]]}}
            }
        }]
    }));
    rt.green_flag();
    let ticks = rt.run(100);
    assert_eq!(number(&rt, "sum"), 10.0);
    // one loop iteration per frame in non-warp mode
    assert!(ticks >= 5, "expected at least 5 frames, got {}", ticks);
}

#[test]
fn s3_comparison_and_branch() {
    // x = 0; if 5 > 3 then x = 10
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["x", 0]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "if"},
                "if": {"opcode": "control_if",
                       "inputs": {"CONDITION": [2, "gt"], "SUBSTACK": [2, "set"]}},
                "gt": {"opcode": "operator_gt",
                       "inputs": {"OPERAND1": [1, [4, "5"]], "OPERAND2": [1, [4, "3"]]}},
                "set": {"opcode": "data_setvariableto",
                        "fields": {"VARIABLE": ["x", "v1"]},
                        "inputs": {"VALUE": [1, [4, "10"]]}}
            }
        }]
    }));
    rt.green_flag();
    rt.run(10);
    assert_eq!(number(&rt, "x"), 10.0);
}

#[test]
fn s4_division_edge_cases() {
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {
                "a": ["half", 0], "b": ["posinf", 0],
                "c": ["neginf", 0], "d": ["nan", 0]
            },
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "s1"},
                "s1": {"opcode": "data_setvariableto", "next": "s2",
                       "fields": {"VARIABLE": ["half", "a"]},
                       "inputs": {"VALUE": [3, "d1", [4, "0"]]}},
                "d1": {"opcode": "operator_divide",
                       "inputs": {"NUM1": [1, [4, "10"]], "NUM2": [1, [4, "2"]]}},
                "s2": {"opcode": "data_setvariableto", "next": "s3",
                       "fields": {"VARIABLE": ["posinf", "b"]},
                       "inputs": {"VALUE": [3, "d2", [4, "0"]]}},
                "d2": {"opcode": "operator_divide",
                       "inputs": {"NUM1": [1, [4, "10"]], "NUM2": [1, [4, "0"]]}},
                "s3": {"opcode": "data_setvariableto", "next": "s4",
                       "fields": {"VARIABLE": ["neginf", "c"]},
                       "inputs": {"VALUE": [3, "d3", [4, "0"]]}},
                "d3": {"opcode": "operator_divide",
                       "inputs": {"NUM1": [1, [4, "-10"]], "NUM2": [1, [4, "0"]]}},
                "s4": {"opcode": "data_setvariableto",
                       "fields": {"VARIABLE": ["nan", "d"]},
                       "inputs": {"VALUE": [3, "d4", [4, "0"]]}},
                "d4": {"opcode": "operator_divide",
                       "inputs": {"NUM1": [1, [4, "0"]], "NUM2": [1, [4, "0"]]}}
            }
        }]
    }));
    rt.green_flag();
    rt.run(10);
    assert_eq!(number(&rt, "half"), 5.0);
    assert_eq!(number(&rt, "posinf"), f64::INFINITY);
    assert_eq!(number(&rt, "neginf"), f64::NEG_INFINITY);
    let nan = number(&rt, "nan");
    // IEEE NaN: not equal to itself
    assert!(nan.is_nan());
    #[allow(clippy::eq_op)]
    {
        assert!(nan != nan);
    }
}

fn broadcast_wait_project() -> serde_json::Value {
    json!({
        "targets": [
            {
                "isStage": true, "name": "Stage",
                "lists": {"l1": ["log", []]},
                "broadcasts": {"b1": "go"},
                "blocks": {
                    "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "bw"},
                    "bw": {"opcode": "event_broadcastandwait", "next": "app3",
                           "inputs": {"BROADCAST_INPUT": [1, [11, "go", "b1"]]}},
                    "app3": {"opcode": "data_addtolist",
                             "fields": {"LIST": ["log", "l1"]},
                             "inputs": {"ITEM": [1, [10, "3"]]}}
                }
            },
            {
                "isStage": false, "name": "A", "layerOrder": 1,
                "blocks": {
                    "recv": {"opcode": "event_whenbroadcastreceived", "topLevel": true,
                             "next": "app1",
                             "fields": {"BROADCAST_OPTION": ["go", "b1"]}},
                    "app1": {"opcode": "data_addtolist",
                             "fields": {"LIST": ["log", "l1"]},
                             "inputs": {"ITEM": [1, [10, "1"]]}}
                }
            },
            {
                "isStage": false, "name": "B", "layerOrder": 2,
                "blocks": {
                    "recv": {"opcode": "event_whenbroadcastreceived", "topLevel": true,
                             "next": "app2",
                             "fields": {"BROADCAST_OPTION": ["go", "b1"]}},
                    "app2": {"opcode": "data_addtolist",
                             "fields": {"LIST": ["log", "l1"]},
                             "inputs": {"ITEM": [1, [10, "2"]]}}
                }
            }
        ]
    })
}

#[test]
fn s5_broadcast_and_wait_ordering() {
    let (mut rt, _) = runtime_for(broadcast_wait_project());
    rt.green_flag();
    rt.run(20);
    let log = rt.global_list("log").unwrap();
    assert_eq!(
        log,
        vec![Value::from("1"), Value::from("2"), Value::from("3")]
    );
}

#[test]
fn s5_broadcaster_sees_receiver_effects() {
    // the broadcaster's next instruction runs only after every
    // receiver retired: "3" is never first or second
    let (mut rt, _) = runtime_for(broadcast_wait_project());
    rt.green_flag();
    for _ in 0..20 {
        rt.tick();
        let log = rt.global_list("log").unwrap();
        if let Some(pos) = log.iter().position(|v| v == &Value::from("3")) {
            assert_eq!(pos, 2, "3 appended before both receivers: {:?}", log);
        }
    }
}

fn recursion_project(warp: &str) -> serde_json::Value {
    json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["sum", 0]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "root"},
                "root": {"opcode": "procedures_call",
                         "inputs": {"argid": [1, [4, "1000"]]},
                         "mutation": {"proccode": "count %n",
                                      "argumentids": "[\"argid\"]"}},
                "def": {"opcode": "procedures_definition", "topLevel": true, "next": "if",
                        "inputs": {"custom_block": [1, "proto"]}},
                "proto": {"opcode": "procedures_prototype", "shadow": true,
                          "mutation": {"proccode": "count %n",
                                       "argumentids": "[\"argid\"]",
                                       "argumentnames": "[\"n\"]",
                                       "argumentdefaults": "[\"0\"]",
                                       "warp": warp}},
                "if": {"opcode": "control_if",
                       "inputs": {"CONDITION": [2, "gt"], "SUBSTACK": [2, "chg"]}},
                "gt": {"opcode": "operator_gt",
                       "inputs": {"OPERAND1": [3, "arg1", [4, "0"]],
                                  "OPERAND2": [1, [4, "0"]]}},
                "arg1": {"opcode": "argument_reporter_string_number",
                         "fields": {"VALUE": ["n", null]}},
                "chg": {"opcode": "data_changevariableby", "next": "call",
                        "fields": {"VARIABLE": ["sum", "v1"]},
                        "inputs": {"VALUE": [1, [4, "1"]]}},
                "call": {"opcode": "procedures_call",
                         "inputs": {"argid": [3, "sub", [4, "0"]]},
                         "mutation": {"proccode": "count %n",
                                      "argumentids": "[\"argid\"]"}},
                "sub": {"opcode": "operator_subtract",
                        "inputs": {"NUM1": [3, "arg2", [4, "0"]],
                                   "NUM2": [1, [4, "1"]]}},
                "arg2": {"opcode": "argument_reporter_string_number",
                         "fields": {"VALUE": ["n", null]}}
            }
        }]
    })
}

#[test]
fn s6_warp_recursion_completes_in_one_frame() {
    let (mut rt, _) = runtime_for(recursion_project("true"));
    rt.green_flag();
    rt.tick();
    assert_eq!(number(&rt, "sum"), 1000.0);
    assert!(!rt.running(), "warp recursion must finish within a frame");
}

#[test]
fn s6_non_warp_recursion_yields_but_finishes() {
    let (mut rt, _) = runtime_for(recursion_project("false"));
    rt.green_flag();
    let ticks = rt.run(3000);
    assert_eq!(number(&rt, "sum"), 1000.0);
    // one recursion level per frame
    assert!(ticks >= 1000, "expected yielding recursion, got {} ticks", ticks);
}

#[test]
fn s7_stop_other_scripts() {
    let (mut rt, _) = runtime_for(json!({
        "targets": [
            {"isStage": true, "name": "Stage", "blocks": {}},
            {
                "isStage": false, "name": "Cat", "layerOrder": 1,
                "variables": {"c": ["count", 0], "d": ["done", 0]},
                "blocks": {
                    "hatA": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "loop"},
                    "loop": {"opcode": "control_forever",
                             "inputs": {"SUBSTACK": [2, "chg"]}},
                    "chg": {"opcode": "data_changevariableby",
                            "fields": {"VARIABLE": ["count", "c"]},
                            "inputs": {"VALUE": [1, [4, "1"]]}},
                    "hatB": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "stop"},
                    "stop": {"opcode": "control_stop", "next": "set",
                             "fields": {"STOP_OPTION": ["other scripts in sprite", null]}},
                    "set": {"opcode": "data_setvariableto",
                            "fields": {"VARIABLE": ["done", "d"]},
                            "inputs": {"VALUE": [1, [4, "1"]]}}
                }
            }
        ]
    }));
    rt.green_flag();
    rt.tick();
    assert_eq!(number(&rt, "done"), 1.0);
    // the forever script was retired during the same frame
    let live: Vec<_> = rt
        .threads
        .iter()
        .filter(|t| t.status.is_live())
        .collect();
    assert!(live.is_empty(), "looper must be retired before the next frame");
    let count = number(&rt, "count");
    rt.tick();
    assert_eq!(number(&rt, "count"), count, "retired thread must not run");
}

#[test]
fn s8_list_sentinels() {
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["last", 0], "v2": ["oob", "x"]},
            "lists": {"l1": ["L", ["a", "b", "c"]]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "s1"},
                "s1": {"opcode": "data_setvariableto", "next": "s2",
                       "fields": {"VARIABLE": ["last", "v1"]},
                       "inputs": {"VALUE": [3, "itemlast", [4, "0"]]}},
                "itemlast": {"opcode": "data_itemoflist",
                             "fields": {"LIST": ["L", "l1"]},
                             "inputs": {"INDEX": [1, [10, "last"]]}},
                "s2": {"opcode": "data_setvariableto", "next": "del",
                       "fields": {"VARIABLE": ["oob", "v2"]},
                       "inputs": {"VALUE": [3, "item0", [4, "0"]]}},
                "item0": {"opcode": "data_itemoflist",
                          "fields": {"LIST": ["L", "l1"]},
                          "inputs": {"INDEX": [1, [4, "0"]]}},
                "del": {"opcode": "data_deleteoflist",
                        "fields": {"LIST": ["L", "l1"]},
                        "inputs": {"INDEX": [1, [10, "all"]]}}
            }
        }]
    }));
    rt.green_flag();
    rt.run(10);
    assert_eq!(rt.global_variable("last"), Some(Value::from("c")));
    assert_eq!(rt.global_variable("oob"), Some(Value::from("")));
    assert_eq!(rt.global_list("L"), Some(vec![]));
}

#[test]
fn s10_cloud_variable_coalescing() {
    #[derive(Default)]
    struct SharedCloud(Rc<RefCell<Vec<(String, Value)>>>);
    impl sb3_runtime::CloudStore for SharedCloud {
        fn save(&mut self, id: &str, value: &Value) {
            self.0.borrow_mut().push((id.to_string(), value.clone()));
        }
    }

    // 100 writes inside one warp region: a single frame, one flush
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"cv": ["☁ score", 0, true]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "warp"},
                "warp": {"opcode": "control_all_at_once",
                         "inputs": {"SUBSTACK": [2, "loop"]}},
                "loop": {"opcode": "control_repeat",
                         "inputs": {"TIMES": [1, [4, "100"]], "SUBSTACK": [2, "chg"]}},
                "chg": {"opcode": "data_changevariableby",
                        "fields": {"VARIABLE": ["☁ score", "cv"]},
                        "inputs": {"VALUE": [1, [4, "1"]]}}
            }
        }]
    }));
    let saved = Rc::new(RefCell::new(Vec::new()));
    rt = rt.with_cloud_store(Box::new(SharedCloud(saved.clone())));
    rt.green_flag();
    rt.tick();
    let writes = saved.borrow();
    assert_eq!(writes.len(), 1, "writes must coalesce per tick");
    assert_eq!(writes[0].1, Value::Number(100.0));
}

#[test]
fn wait_blocks_on_the_clock() {
    let (mut rt, clock) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["after", 0]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "wait"},
                "wait": {"opcode": "control_wait", "next": "set",
                         "inputs": {"DURATION": [1, [4, "1"]]}},
                "set": {"opcode": "data_setvariableto",
                        "fields": {"VARIABLE": ["after", "v1"]},
                        "inputs": {"VALUE": [1, [4, "1"]]}}
            }
        }]
    }));
    rt.green_flag();
    rt.tick();
    rt.tick();
    assert_eq!(number(&rt, "after"), 0.0, "wait must not complete early");
    clock.advance(1.1);
    rt.tick();
    assert_eq!(number(&rt, "after"), 1.0);
    assert!(!rt.running());
}

#[test]
fn wait_until_spins_until_condition() {
    let (mut rt, _) = runtime_for(json!({
        "targets": [
            {"isStage": true, "name": "Stage",
             "variables": {"f": ["flag", 0], "d": ["done", 0]},
             "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "wu"},
                "wu": {"opcode": "control_wait_until", "next": "set",
                       "inputs": {"CONDITION": [2, "eq"]}},
                "eq": {"opcode": "operator_equals",
                       "inputs": {"OPERAND1": [3, "var", [4, "0"]],
                                  "OPERAND2": [1, [4, "1"]]}},
                "var": {"opcode": "data_variable", "fields": {"VARIABLE": ["flag", "f"]}},
                "set": {"opcode": "data_setvariableto",
                        "fields": {"VARIABLE": ["done", "d"]},
                        "inputs": {"VALUE": [1, [4, "1"]]}}
             }}
        ]
    }));
    rt.green_flag();
    rt.tick();
    rt.tick();
    assert_eq!(number(&rt, "done"), 0.0);
    // flip the flag from outside, like another script would
    let stage = rt.project.stage_id().unwrap();
    rt.project.target_mut(stage).variables[0].value = Value::Number(1.0);
    rt.tick();
    assert_eq!(number(&rt, "done"), 1.0);
}

#[test]
fn stuck_detection_breaks_warp_loops() {
    // warp forever loop on the real clock with a tiny budget: the tick
    // returns instead of hanging, and the thread keeps making progress
    let project = json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["spins", 0]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "warp"},
                "warp": {"opcode": "control_all_at_once",
                         "inputs": {"SUBSTACK": [2, "loop"]}},
                "loop": {"opcode": "control_forever",
                         "inputs": {"SUBSTACK": [2, "chg"]}},
                "chg": {"opcode": "data_changevariableby",
                        "fields": {"VARIABLE": ["spins", "v1"]},
                        "inputs": {"VALUE": [1, [4, "1"]]}}
            }
        }]
    });
    let compiled = sb3_compiler::compile(&project).unwrap();
    let config = RuntimeConfig {
        stuck_budget_ms: 10,
        seed: Some(1),
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::new(compiled, config);
    rt.green_flag();
    rt.tick();
    assert!(number(&rt, "spins") > 0.0);
    let stuck = rt
        .threads
        .iter()
        .any(|t| t.status == ThreadStatus::StuckWait);
    assert!(stuck, "thread should be parked by the stuck detector");
    let before = number(&rt, "spins");
    rt.tick();
    assert!(number(&rt, "spins") > before, "forced yield then resumes");
}

#[test]
fn broadcast_with_no_listeners_completes() {
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["done", 0]},
            "broadcasts": {"b1": "nobody"},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "bw"},
                "bw": {"opcode": "event_broadcastandwait", "next": "set",
                       "inputs": {"BROADCAST_INPUT": [1, [11, "nobody", "b1"]]}},
                "set": {"opcode": "data_setvariableto",
                        "fields": {"VARIABLE": ["done", "v1"]},
                        "inputs": {"VALUE": [1, [4, "1"]]}}
            }
        }]
    }));
    rt.green_flag();
    rt.run(5);
    assert_eq!(number(&rt, "done"), 1.0);
}

#[test]
fn clone_lifecycle_and_shared_variables() {
    // sprite creates a clone; the clone increments a sprite variable
    // (shared by reference) and deletes itself
    let (mut rt, _) = runtime_for(json!({
        "targets": [
            {"isStage": true, "name": "Stage", "blocks": {}},
            {
                "isStage": false, "name": "Cat", "layerOrder": 1,
                "variables": {"h": ["hits", 0]},
                "blocks": {
                    "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "mk"},
                    "mk": {"opcode": "control_create_clone_of",
                           "inputs": {"CLONE_OPTION": [1, "menu"]}},
                    "menu": {"opcode": "control_create_clone_of_menu", "shadow": true,
                             "fields": {"CLONE_OPTION": ["_myself_", null]}},
                    "clonehat": {"opcode": "control_start_as_clone", "topLevel": true,
                                 "next": "chg"},
                    "chg": {"opcode": "data_changevariableby", "next": "die",
                            "fields": {"VARIABLE": ["hits", "h"]},
                            "inputs": {"VALUE": [1, [4, "1"]]}},
                    "die": {"opcode": "control_delete_this_clone"}
                }
            }
        ]
    }));
    rt.green_flag();
    rt.run(10);
    assert_eq!(number(&rt, "hits"), 1.0, "clone writes the sprite's variable");
    assert_eq!(rt.project.live_clone_count(), 0, "clone deleted itself");
    assert!(!rt.running());
}

#[test]
fn determinism_with_fixed_seed() {
    let project = json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "lists": {"l1": ["rolls", []]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "loop"},
                "loop": {"opcode": "control_repeat",
                         "inputs": {"TIMES": [1, [4, "5"]], "SUBSTACK": [2, "add"]}},
                "add": {"opcode": "data_addtolist",
                        "fields": {"LIST": ["rolls", "l1"]},
                        "inputs": {"ITEM": [3, "rand", [10, ""]]}},
                "rand": {"opcode": "operator_random",
                         "inputs": {"FROM": [1, [4, "1"]], "TO": [1, [4, "10"]]}}
            }
        }]
    });
    let run = |p: &serde_json::Value| {
        let (mut rt, _) = runtime_for(p.clone());
        rt.green_flag();
        rt.run(50);
        rt.global_list("rolls").unwrap()
    };
    let a = run(&project);
    let b = run(&project);
    assert_eq!(a, b, "same seed, same inputs, same trace");
    assert_eq!(a.len(), 5);
}

#[test]
fn repeat_until_and_while_loop() {
    // count down from 3 with repeat-until
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["n", 3]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "loop"},
                "loop": {"opcode": "control_repeat_until",
                         "inputs": {"CONDITION": [2, "eq"], "SUBSTACK": [2, "chg"]}},
                "eq": {"opcode": "operator_equals",
                       "inputs": {"OPERAND1": [3, "var", [4, "0"]],
                                  "OPERAND2": [1, [4, "0"]]}},
                "var": {"opcode": "data_variable", "fields": {"VARIABLE": ["n", "v1"]}},
                "chg": {"opcode": "data_changevariableby",
                        "fields": {"VARIABLE": ["n", "v1"]},
                        "inputs": {"VALUE": [1, [4, "-1"]]}}
            }
        }]
    }));
    rt.green_flag();
    rt.run(50);
    assert_eq!(number(&rt, "n"), 0.0);
    assert!(!rt.running());
}

#[test]
fn say_for_secs_holds_and_clears_bubble() {
    let (mut rt, clock) = runtime_for(json!({
        "targets": [
            {"isStage": true, "name": "Stage", "blocks": {}},
            {"isStage": false, "name": "Cat", "layerOrder": 1,
             "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "say"},
                "say": {"opcode": "looks_sayforsecs",
                        "inputs": {"MESSAGE": [1, [10, "hello"]],
                                   "SECS": [1, [4, "1"]]}}
             }}
        ]
    }));
    rt.green_flag();
    rt.tick();
    let cat = rt.project.find_target_by_name("Cat").unwrap();
    assert!(rt.project.target(cat).bubble.is_some());
    clock.advance(1.5);
    rt.tick();
    assert!(rt.project.target(cat).bubble.is_none());
    assert!(!rt.running());
}

#[test]
fn stop_all_ends_the_run() {
    let (mut rt, _) = runtime_for(json!({
        "targets": [{
            "isStage": true, "name": "Stage",
            "variables": {"v1": ["n", 0]},
            "blocks": {
                "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "loop"},
                "loop": {"opcode": "control_forever",
                         "inputs": {"SUBSTACK": [2, "chg"]}},
                "chg": {"opcode": "data_changevariableby", "next": "stopper",
                        "fields": {"VARIABLE": ["n", "v1"]},
                        "inputs": {"VALUE": [1, [4, "1"]]}},
                "stopper": {"opcode": "control_stop",
                            "fields": {"STOP_OPTION": ["all", null]}}
            }
        }]
    }));
    rt.green_flag();
    rt.run(10);
    assert_eq!(number(&rt, "n"), 1.0);
    assert!(!rt.running(), "stop all must end the run");
}
