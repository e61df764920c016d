//! Admission gate: bounded concurrency with WSJF-ordered waiting
//!
//! A fixed number of missions run at once (default 1). Waiters are served
//! by WSJF score, FIFO among equals. Per-project caps are enforced on top
//! of the global capacity when configured.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use crate::config::AdmissionConfig;
use crate::domain::Wsjf;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Waiter {
    score_milli: i64,
    /// Lower sequence wins ties: FIFO among equal scores
    sequence: u64,
    mission_id: String,
    project_id: String,
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score_milli
            .cmp(&other.score_milli)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct AdmissionInner {
    running: HashSet<String>,
    running_per_project: HashMap<String, usize>,
    queue: BinaryHeap<Waiter>,
    sequence: u64,
}

/// The admission gate
pub struct Admission {
    capacity: usize,
    per_project: usize,
    inner: Mutex<AdmissionInner>,
    notify: Notify,
}

impl Admission {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            capacity: config.concurrency.max(1),
            per_project: config.per_project,
            inner: Mutex::new(AdmissionInner {
                running: HashSet::new(),
                running_per_project: HashMap::new(),
                queue: BinaryHeap::new(),
                sequence: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Wait for an admission slot
    ///
    /// Returns immediately when capacity allows; otherwise the caller parks
    /// in WSJF order.
    pub async fn acquire(&self, mission_id: &str, project_id: &str, wsjf: Wsjf) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.running.contains(mission_id) {
                return;
            }
            inner.sequence += 1;
            let waiter = Waiter {
                score_milli: wsjf.score_milli(),
                sequence: inner.sequence,
                mission_id: mission_id.to_string(),
                project_id: project_id.to_string(),
            };
            inner.queue.push(waiter);
        }

        loop {
            if self.try_admit(mission_id) {
                debug!(mission_id, "Admitted");
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Admit the head of the queue if it is this mission and capacity allows
    fn try_admit(&self, mission_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.running.len() >= self.capacity {
            return false;
        }
        let Some(head) = inner.queue.peek() else {
            return false;
        };
        if head.mission_id != mission_id {
            return false;
        }
        if self.per_project > 0 {
            let count = inner.running_per_project.get(&head.project_id).copied().unwrap_or(0);
            if count >= self.per_project {
                return false;
            }
        }
        let head = inner.queue.pop().expect("peeked head exists");
        inner.running.insert(head.mission_id.clone());
        *inner.running_per_project.entry(head.project_id).or_insert(0) += 1;
        true
    }

    /// Release a slot; a pause releases exactly like completion
    pub fn release(&self, mission_id: &str, project_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.running.remove(mission_id) {
            if let Some(count) = inner.running_per_project.get_mut(project_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.running_per_project.remove(project_id);
                }
            }
            debug!(mission_id, "Released admission slot");
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().unwrap().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn wsjf(value: i64, duration: i64) -> Wsjf {
        Wsjf {
            business_value: value,
            time_criticality: 0,
            risk_reduction: 0,
            job_duration: duration,
        }
    }

    #[tokio::test]
    async fn test_capacity_one_serializes() {
        let admission = Arc::new(Admission::new(&AdmissionConfig {
            concurrency: 1,
            per_project: 0,
        }));

        admission.acquire("m-1", "p-1", wsjf(5, 1)).await;
        assert_eq!(admission.running_count(), 1);

        // The second acquire parks until release
        let second = {
            let admission = admission.clone();
            tokio::spawn(async move {
                admission.acquire("m-2", "p-1", wsjf(5, 1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());
        assert_eq!(admission.queued_count(), 1);

        admission.release("m-1", "p-1");
        tokio::time::timeout(Duration::from_secs(1), second).await.unwrap().unwrap();
        assert_eq!(admission.running_count(), 1);
    }

    #[tokio::test]
    async fn test_wsjf_orders_waiters() {
        let admission = Arc::new(Admission::new(&AdmissionConfig {
            concurrency: 1,
            per_project: 0,
        }));
        admission.acquire("m-running", "p-1", wsjf(1, 1)).await;

        let order = Arc::new(Mutex::new(Vec::new()));

        // Low priority waits first, high priority arrives later but jumps it
        let low = {
            let admission = admission.clone();
            let order = order.clone();
            tokio::spawn(async move {
                admission.acquire("m-low", "p-1", wsjf(1, 10)).await;
                order.lock().unwrap().push("m-low");
                admission.release("m-low", "p-1");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let high = {
            let admission = admission.clone();
            let order = order.clone();
            tokio::spawn(async move {
                admission.acquire("m-high", "p-1", wsjf(9, 1)).await;
                order.lock().unwrap().push("m-high");
                admission.release("m-high", "p-1");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        admission.release("m-running", "p-1");
        tokio::time::timeout(Duration::from_secs(1), high).await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(1), low).await.unwrap().unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["m-high", "m-low"]);
    }

    #[tokio::test]
    async fn test_per_project_cap() {
        let admission = Arc::new(Admission::new(&AdmissionConfig {
            concurrency: 4,
            per_project: 1,
        }));

        admission.acquire("m-1", "p-1", wsjf(5, 1)).await;

        // Same project blocks despite free global capacity
        let same_project = {
            let admission = admission.clone();
            tokio::spawn(async move {
                admission.acquire("m-2", "p-1", wsjf(5, 1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!same_project.is_finished());

        admission.release("m-1", "p-1");
        tokio::time::timeout(Duration::from_secs(1), same_project).await.unwrap().unwrap();
    }
}
