//! Object table behavior under churn, through the public API only.

use kwasm_core::objects::{handle_generation, handle_slot};
use kwasm_core::prelude::*;
use serde_json::json;
use std::collections::HashSet;

#[test]
fn churn_keeps_live_handles_distinct() {
    let mut table = ObjectTable::default();
    let mut live = Vec::new();

    for round in 0..50u32 {
        for i in 0..8 {
            live.push(table.insert(HostValue::from(round * 8 + i)).unwrap());
        }
        // Release every other handle from this round.
        let start = live.len() - 8;
        let round_handles: Vec<_> = live.drain(start..).collect();
        for (i, handle) in round_handles.into_iter().enumerate() {
            if i % 2 == 0 {
                assert!(table.release(handle).is_some());
            } else {
                live.push(handle);
            }
        }
    }

    let unique: HashSet<_> = live.iter().copied().collect();
    assert_eq!(unique.len(), live.len());
    assert_eq!(table.len(), live.len());
    for handle in &live {
        assert!(table.get(*handle).unwrap().as_u32().is_some());
    }
}

#[test]
fn slot_reuse_bumps_generation_each_time() {
    let mut table = ObjectTable::default();
    let mut handle = table.insert(HostValue::Null).unwrap();
    let slot = handle_slot(handle);

    for expected in 1..=5u8 {
        table.release(handle);
        handle = table.insert(HostValue::Bool(true)).unwrap();
        assert_eq!(handle_slot(handle), slot);
        assert_eq!(handle_generation(handle), expected);
    }
}

#[test]
fn json_globals_are_readable_through_handles() {
    let global = HostValue::from_json(&json!({
        "navigator": { "hardwareConcurrency": 4, "languages": ["en", "fr"] }
    }));
    let table = ObjectTable::new(global);

    let navigator = table.get(GLOBAL_HANDLE).unwrap().property("navigator").unwrap();
    assert_eq!(
        navigator.property("hardwareConcurrency").and_then(|v| v.as_u32()),
        Some(4)
    );
    let languages = navigator.property("languages").unwrap();
    assert_eq!(languages.property("length").and_then(|v| v.as_u32()), Some(2));
    assert_eq!(
        languages.property("1").map(|v| v.to_text()),
        Some("fr".to_string())
    );
}
