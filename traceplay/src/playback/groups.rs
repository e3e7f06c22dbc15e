//! Stable group ids for the sink's thread-clustering hint.
use std::collections::HashMap;
use std::sync::Mutex;

use super::ProcessInfo;

/// Allocates one dense 32-bit id per recorded (process, host) origin.
/// The id is opaque; it only has to be stable for the run so the sink
/// can cluster timelines by origin.
pub struct ThreadGroupAllocator {
    map: Mutex<Allocations>,
}

struct Allocations {
    groups: HashMap<u64, HashMap<String, u32>>,
    next_id: u32,
}

impl ThreadGroupAllocator {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(Allocations {
                groups: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Returns the id already assigned to `process`, or assigns the
    /// next one.
    pub fn allocate(&self, process: &ProcessInfo) -> u32 {
        let mut map = self.map.lock().unwrap();
        if let Some(&id) = map
            .groups
            .get(&process.process_id)
            .and_then(|hosts| hosts.get(&process.host))
        {
            return id;
        }

        map.next_id += 1;
        let id = map.next_id;
        map.groups
            .entry(process.process_id)
            .or_default()
            .insert(process.host.clone(), id);
        id
    }
}

impl Default for ThreadGroupAllocator {
    fn default() -> Self {
        Self::new()
    }
}
