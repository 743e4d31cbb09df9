//! Variable and list blocks
//!
//! List indices go through the sentinel rules: `"last"`, `"random"` /
//! `"any"`, `"all"` where accepted, floored numerics, and out-of-bounds
//! as silent no-ops or empty reads — never errors. The 200 000-item cap
//! applies to appends and inserts; an insert at the cap drops the last
//! element instead of growing.

use crate::scheduler::Runtime;
use sb3_compiler::ir::ListSlot;
use sb3_core::cast::{self, ListIndex, LIST_ITEM_LIMIT};
use sb3_core::{cast::compare, TargetId, Value};
use std::cmp::Ordering;

fn list_len(rt: &Runtime, target: TargetId, slot: ListSlot) -> usize {
    let (home, index) = rt.list_location(slot, target);
    rt.project.target(home).lists[index].items.len()
}

fn with_list<R>(
    rt: &mut Runtime,
    target: TargetId,
    slot: ListSlot,
    f: impl FnOnce(&mut Vec<Value>) -> R,
) -> R {
    let (home, index) = rt.list_location(slot, target);
    f(&mut rt.project.target_mut(home).lists[index].items)
}

pub fn add(rt: &mut Runtime, target: TargetId, slot: ListSlot, item: Value) {
    with_list(rt, target, slot, |items| {
        if items.len() < LIST_ITEM_LIMIT {
            items.push(item);
        }
    });
}

pub fn delete(rt: &mut Runtime, target: TargetId, slot: ListSlot, index: &Value) {
    let len = list_len(rt, target, slot);
    let resolved = cast::to_list_index(&mut rt.rng, index, len, true);
    with_list(rt, target, slot, |items| match resolved {
        ListIndex::All => items.clear(),
        ListIndex::Index(i) => {
            items.remove(i - 1);
        }
        ListIndex::Invalid => {}
    });
}

pub fn delete_all(rt: &mut Runtime, target: TargetId, slot: ListSlot) {
    with_list(rt, target, slot, |items| items.clear());
}

pub fn insert(rt: &mut Runtime, target: TargetId, slot: ListSlot, index: &Value, item: Value) {
    let len = list_len(rt, target, slot);
    // insertion accepts one past the end
    let resolved = cast::to_list_index(&mut rt.rng, index, len + 1, false);
    with_list(rt, target, slot, |items| {
        if let ListIndex::Index(i) = resolved {
            if items.len() >= LIST_ITEM_LIMIT {
                items.pop();
            }
            items.insert(i - 1, item);
        }
    });
}

pub fn replace(rt: &mut Runtime, target: TargetId, slot: ListSlot, index: &Value, item: Value) {
    let len = list_len(rt, target, slot);
    let resolved = cast::to_list_index(&mut rt.rng, index, len, false);
    with_list(rt, target, slot, |items| {
        if let ListIndex::Index(i) = resolved {
            items[i - 1] = item;
        }
    });
}

pub fn item(rt: &mut Runtime, target: TargetId, slot: ListSlot, index: &Value) -> Value {
    let len = list_len(rt, target, slot);
    let resolved = cast::to_list_index(&mut rt.rng, index, len, false);
    match resolved {
        ListIndex::Index(i) => with_list(rt, target, slot, |items| items[i - 1].clone()),
        _ => Value::empty(),
    }
}

/// 1-based index of the first equal item, or 0.
pub fn index_of(rt: &mut Runtime, target: TargetId, slot: ListSlot, value: &Value) -> f64 {
    with_list(rt, target, slot, |items| {
        items
            .iter()
            .position(|v| compare(v, value) == Ordering::Equal)
            .map(|i| i as f64 + 1.0)
            .unwrap_or(0.0)
    })
}

pub fn length(rt: &mut Runtime, target: TargetId, slot: ListSlot) -> f64 {
    list_len(rt, target, slot) as f64
}

pub fn contains(rt: &mut Runtime, target: TargetId, slot: ListSlot, value: &Value) -> bool {
    with_list(rt, target, slot, |items| {
        items.iter().any(|v| compare(v, value) == Ordering::Equal)
    })
}

pub fn contents(rt: &mut Runtime, target: TargetId, slot: ListSlot) -> Value {
    let (home, index) = rt.list_location(slot, target);
    Value::from(cast::list_contents(
        &rt.project.target(home).lists[index].items,
    ))
}
