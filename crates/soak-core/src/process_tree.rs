//! Recursive termination of a child's process tree.
//!
//! Builds the parent→children adjacency from the OS process table and
//! signals descendants depth-first, children before parents, so that
//! no orphan keeps the capture pipeline busy after a forced stop.

use std::collections::HashMap;
use std::fs;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::debug;

/// Signals `root` and every descendant, deepest first.
///
/// Processes that exit while we walk the table are skipped silently.
pub fn kill_tree(root: i32, signal: Signal) {
    let children = process_table();
    let mut order = Vec::new();
    collect_postorder(root, &children, &mut order);
    for pid in order {
        debug!(pid, sig = %signal, "signalling process");
        let _ = kill(Pid::from_raw(pid), signal);
    }
}

fn collect_postorder(pid: i32, children: &HashMap<i32, Vec<i32>>, out: &mut Vec<i32>) {
    if let Some(kids) = children.get(&pid) {
        for &kid in kids {
            collect_postorder(kid, children, out);
        }
    }
    out.push(pid);
}

/// Parent pid → child pids, snapshotted from `/proc`.
fn process_table() -> HashMap<i32, Vec<i32>> {
    let mut table: HashMap<i32, Vec<i32>> = HashMap::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return table;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(ppid) = parse_stat_ppid(&stat) {
            table.entry(ppid).or_default().push(pid);
        }
    }
    table
}

/// Extracts the ppid (field 4) from `/proc/<pid>/stat`. The comm field
/// is parenthesised and may itself contain spaces and parentheses, so
/// parsing starts after the last closing paren.
fn parse_stat_ppid(stat: &str) -> Option<i32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}
