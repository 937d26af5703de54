//! Integration tests for batch waiting
//!
//! Batch waits reap with wait-any probes, which observe every child of the
//! test process. These tests live in their own binary and serialize on a
//! lock so no two wait-any probes run concurrently.

#![cfg(unix)]

use procyon_core::{wait_list, Process, SpawnOptions};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

static REAP_LOCK: Mutex<()> = Mutex::new(());

fn spawn_exit(after: &str, code: u8) -> Process {
    Process::spawn(
        "/bin/sh",
        &["sh", "-c", &format!("sleep {}; exit {}", after, code)],
        SpawnOptions::new(),
    )
    .expect("Failed to spawn sh")
}

/// Test that a batch wait reaps every child exactly once, reporting each
/// handle's list position and exit status
#[test]
fn test_batch_reaps_all_children() {
    let _guard = REAP_LOCK.lock().unwrap();

    let mut children: Vec<Process> = (0..4u8)
        .map(|i| spawn_exit(&format!("0.{}", i + 1), 40 + i))
        .collect();

    let mut seen: HashMap<usize, i32> = HashMap::new();
    let mut rounds = 0;
    while seen.len() < children.len() {
        let records = wait_list(&mut children, 4, Some(Duration::from_secs(5)))
            .expect("Failed to batch wait");
        for record in records {
            let previous = seen.insert(record.index, record.status);
            assert!(previous.is_none(), "index {} reported twice", record.index);
        }
        rounds += 1;
        assert!(rounds < 50, "children never finished");
    }

    for i in 0..4usize {
        assert_eq!(seen.get(&i), Some(&(40 + i as i32)));
    }
    // Every handle is retired in place
    for child in &children {
        assert_eq!(child.pid(), None);
    }
}

/// Test that maxn caps how many records one call may return
#[test]
fn test_batch_respects_maxn() {
    let _guard = REAP_LOCK.lock().unwrap();

    let mut children: Vec<Process> = (0..3u8).map(|i| spawn_exit("0", 10 + i)).collect();
    // Let all three terminate before draining
    std::thread::sleep(Duration::from_millis(300));

    let first = wait_list(&mut children, 2, Some(Duration::from_secs(5)))
        .expect("Failed to batch wait");
    assert!(first.len() <= 2);

    let mut total = first.len();
    while total < 3 {
        let more = wait_list(&mut children, 3, Some(Duration::from_secs(5)))
            .expect("Failed to batch wait");
        assert!(!more.is_empty(), "remaining children never reported");
        total += more.len();
    }
    assert_eq!(total, 3);
}

/// Test that a zero timeout is one non-blocking pass
#[test]
fn test_batch_zero_timeout_does_not_block() {
    let _guard = REAP_LOCK.lock().unwrap();

    let mut children = vec![spawn_exit("5", 0)];
    let records =
        wait_list(&mut children, 1, Some(Duration::ZERO)).expect("Failed to batch wait");
    assert!(records.is_empty());

    children[0].kill().expect("Failed to kill");
    children[0].wait().expect("Failed to wait");
}

/// Test that a blocking batch wait returns once something terminates
#[test]
fn test_batch_blocking_mode() {
    let _guard = REAP_LOCK.lock().unwrap();

    let mut children = vec![spawn_exit("0.1", 6)];
    let records = wait_list(&mut children, 1, None).expect("Failed to batch wait");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].index, 0);
    assert_eq!(records[0].status, 6);
}

/// Test that a killed child shows up in a batch with the -1 convention
#[test]
fn test_batch_reports_signalled_child() {
    let _guard = REAP_LOCK.lock().unwrap();

    let mut children = vec![spawn_exit("10", 0)];
    children[0].kill().expect("Failed to kill");

    let mut records = Vec::new();
    let mut rounds = 0;
    while records.is_empty() {
        records = wait_list(&mut children, 1, Some(Duration::from_secs(5)))
            .expect("Failed to batch wait");
        rounds += 1;
        assert!(rounds < 50, "killed child never reported");
    }
    assert_eq!(records[0].status, -1);
}

/// Test the degenerate inputs: no handles, or a zero record budget
#[test]
fn test_batch_degenerate_inputs() {
    let _guard = REAP_LOCK.lock().unwrap();

    let records = wait_list(&mut [], 4, None).expect("Failed to batch wait");
    assert!(records.is_empty());

    let mut children = vec![spawn_exit("0", 0)];
    let records = wait_list(&mut children, 0, None).expect("Failed to batch wait");
    assert!(records.is_empty());
    children[0].wait().expect("Failed to wait");
}
