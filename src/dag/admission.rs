// src/dag/admission.rs

//! Per-agent concurrency admission.
//!
//! Every agent is an independent pool with its own ceiling; there is no
//! global limit beyond the sum of the per-agent ones. Counters are guarded
//! by a single mutex so `try_admit` is a check-and-increment.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy)]
struct AgentSlots {
    enabled: bool,
    limit: usize,
    in_flight: usize,
}

#[derive(Debug)]
pub struct AdmissionController {
    slots: Mutex<HashMap<String, AgentSlots>>,
}

impl AdmissionController {
    pub fn new(agents: &BTreeMap<String, AgentConfig>) -> Self {
        let slots = agents
            .iter()
            .map(|(name, cfg)| {
                (
                    name.clone(),
                    AgentSlots {
                        enabled: cfg.enabled,
                        limit: cfg.max_concurrent,
                        in_flight: 0,
                    },
                )
            })
            .collect();

        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Take a slot for `agent` if it is enabled and below its ceiling.
    ///
    /// Returns `false` without side effects otherwise (including for agents
    /// that are not configured at all).
    pub fn try_admit(&self, agent: &str) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(agent) {
            Some(s) if s.enabled && s.in_flight < s.limit => {
                s.in_flight += 1;
                debug!(agent, in_flight = s.in_flight, limit = s.limit, "admitted");
                true
            }
            Some(_) => false,
            None => {
                warn!(agent, "admission requested for unknown agent");
                false
            }
        }
    }

    /// Give back a slot taken by a successful [`try_admit`](Self::try_admit).
    pub fn release(&self, agent: &str) {
        let mut slots = self.slots.lock();
        match slots.get_mut(agent) {
            Some(s) if s.in_flight > 0 => {
                s.in_flight -= 1;
                debug!(agent, in_flight = s.in_flight, "released");
            }
            Some(_) => warn!(agent, "release without matching admission; ignoring"),
            None => warn!(agent, "release for unknown agent; ignoring"),
        }
    }

    /// Scoped variant of [`try_admit`](Self::try_admit): the slot is released
    /// when the returned permit is dropped, including during a panic unwind.
    pub fn try_acquire(self: &Arc<Self>, agent: &str) -> Option<AdmissionPermit> {
        if self.try_admit(agent) {
            Some(AdmissionPermit {
                controller: Arc::clone(self),
                agent: agent.to_string(),
            })
        } else {
            None
        }
    }

    pub fn in_flight(&self, agent: &str) -> usize {
        self.slots.lock().get(agent).map(|s| s.in_flight).unwrap_or(0)
    }

    pub fn total_in_flight(&self) -> usize {
        self.slots.lock().values().map(|s| s.in_flight).sum()
    }
}

/// A held admission slot. Dropping it releases the slot exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    agent: String,
}

impl AdmissionPermit {
    pub fn agent(&self) -> &str {
        &self.agent
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release(&self.agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn controller(agents: &[(&str, bool, usize)]) -> Arc<AdmissionController> {
        let cfg = agents
            .iter()
            .map(|(name, enabled, max)| {
                (
                    name.to_string(),
                    AgentConfig {
                        enabled: *enabled,
                        max_concurrent: *max,
                        ..AgentConfig::default()
                    },
                )
            })
            .collect();
        Arc::new(AdmissionController::new(&cfg))
    }

    #[test]
    fn admits_up_to_the_ceiling_then_refuses() {
        let c = controller(&[("claude", true, 2)]);

        assert!(c.try_admit("claude"));
        assert!(c.try_admit("claude"));
        assert!(!c.try_admit("claude"));
        assert_eq!(c.in_flight("claude"), 2);

        c.release("claude");
        assert!(c.try_admit("claude"));
    }

    #[test]
    fn agents_are_independent_pools() {
        let c = controller(&[("claude", true, 1), ("codex", true, 1)]);

        assert!(c.try_admit("claude"));
        assert!(c.try_admit("codex"));
        assert!(!c.try_admit("claude"));
        assert_eq!(c.total_in_flight(), 2);
    }

    #[test]
    fn disabled_and_unknown_agents_are_never_admitted() {
        let c = controller(&[("codex", false, 4)]);
        assert!(!c.try_admit("codex"));
        assert!(!c.try_admit("gemini"));
        assert_eq!(c.total_in_flight(), 0);
    }

    #[test]
    fn unmatched_release_does_not_underflow() {
        let c = controller(&[("claude", true, 1)]);
        c.release("claude");
        c.release("gemini");
        assert_eq!(c.in_flight("claude"), 0);
        assert!(c.try_admit("claude"));
    }

    #[test]
    fn permit_releases_on_drop_and_on_panic() {
        let c = controller(&[("claude", true, 1)]);

        let permit = c.try_acquire("claude").unwrap();
        assert_eq!(permit.agent(), "claude");
        assert!(c.try_acquire("claude").is_none());
        drop(permit);
        assert_eq!(c.in_flight("claude"), 0);

        let c2 = Arc::clone(&c);
        let joined = thread::spawn(move || {
            let _permit = c2.try_acquire("claude").unwrap();
            panic!("unit task blew up");
        })
        .join();
        assert!(joined.is_err());
        assert_eq!(c.in_flight("claude"), 0);
    }

    #[test]
    fn concurrent_admission_never_exceeds_the_ceiling() {
        let c = controller(&[("claude", true, 3)]);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(permit) = c.try_acquire("claude") {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            assert!(c.in_flight("claude") <= 3);
                            current.fetch_sub(1, Ordering::SeqCst);
                            drop(permit);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(c.in_flight("claude"), 0);
    }
}
