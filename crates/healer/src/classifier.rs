//! Pod health classification.
//!
//! Pure and stateless: every observation is judged on its own, with no memory
//! of earlier states of the same pod.

use crate::pod::PodObservation;

/// Waiting reason that marks a container as crash looping
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

/// Restarts a crash-looping container needs before the pod is considered
/// persistently unhealthy
pub const DEFAULT_RESTART_THRESHOLD: u32 = 3;

/// Result of classifying a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy { reason: String },
}

impl Health {
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Health::Unhealthy { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthClassifier {
    restart_threshold: u32,
}

impl Default for HealthClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RESTART_THRESHOLD)
    }
}

impl HealthClassifier {
    #[must_use]
    pub fn new(restart_threshold: u32) -> Self {
        Self { restart_threshold }
    }

    pub fn restart_threshold(&self) -> u32 {
        self.restart_threshold
    }

    /// A pod is unhealthy iff some container is waiting in `CrashLoopBackOff`
    /// with at least `restart_threshold` restarts. The first such container
    /// determines the reason.
    pub fn classify(&self, observation: &PodObservation) -> Health {
        observation
            .containers
            .iter()
            .find(|c| {
                c.waiting_reason.as_deref() == Some(CRASH_LOOP_BACK_OFF)
                    && c.restart_count >= self.restart_threshold
            })
            .map_or(Health::Healthy, |c| Health::Unhealthy {
                reason: format!(
                    "Persistent {CRASH_LOOP_BACK_OFF} (Restarts: {})",
                    c.restart_count
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::ContainerObservation;

    fn observation(containers: Vec<ContainerObservation>) -> PodObservation {
        PodObservation {
            namespace: "ns".to_string(),
            name: "api-1".to_string(),
            owner_present: true,
            excluded: false,
            containers,
        }
    }

    #[test]
    fn test_no_crash_loop_is_healthy() {
        let classifier = HealthClassifier::default();
        let cases = vec![
            vec![],
            vec![ContainerObservation::running(50)],
            vec![ContainerObservation::waiting("ImagePullBackOff", 12)],
            vec![ContainerObservation::waiting("ContainerCreating", 0)],
            vec![ContainerObservation::waiting("", 9)],
        ];
        for containers in cases {
            assert_eq!(
                classifier.classify(&observation(containers.clone())),
                Health::Healthy,
                "expected healthy for {containers:?}"
            );
        }
    }

    #[test]
    fn test_crash_loop_at_threshold_is_unhealthy() {
        let classifier = HealthClassifier::new(3);
        let health = classifier.classify(&observation(vec![ContainerObservation::waiting(
            CRASH_LOOP_BACK_OFF,
            3,
        )]));
        assert_eq!(
            health,
            Health::Unhealthy {
                reason: "Persistent CrashLoopBackOff (Restarts: 3)".to_string()
            }
        );
    }

    #[test]
    fn test_crash_loop_below_threshold_is_healthy() {
        let classifier = HealthClassifier::new(3);
        let health = classifier.classify(&observation(vec![ContainerObservation::waiting(
            CRASH_LOOP_BACK_OFF,
            2,
        )]));
        assert_eq!(health, Health::Healthy);
    }

    #[test]
    fn test_reason_carries_exact_restart_count() {
        let classifier = HealthClassifier::new(1);
        for restarts in [1, 4, 17, 250] {
            let health = classifier.classify(&observation(vec![
                ContainerObservation::waiting(CRASH_LOOP_BACK_OFF, restarts),
            ]));
            match health {
                Health::Unhealthy { reason } => {
                    assert!(reason.contains(&format!("(Restarts: {restarts})")));
                }
                Health::Healthy => panic!("expected unhealthy for {restarts} restarts"),
            }
        }
    }

    #[test]
    fn test_first_qualifying_container_wins() {
        let classifier = HealthClassifier::new(3);
        let health = classifier.classify(&observation(vec![
            ContainerObservation::running(0),
            ContainerObservation::waiting(CRASH_LOOP_BACK_OFF, 2),
            ContainerObservation::waiting(CRASH_LOOP_BACK_OFF, 8),
            ContainerObservation::waiting(CRASH_LOOP_BACK_OFF, 5),
        ]));
        assert_eq!(
            health,
            Health::Unhealthy {
                reason: "Persistent CrashLoopBackOff (Restarts: 8)".to_string()
            }
        );
    }

    #[test]
    fn test_owner_does_not_affect_classification() {
        let classifier = HealthClassifier::default();
        let mut obs = observation(vec![ContainerObservation::waiting(CRASH_LOOP_BACK_OFF, 10)]);
        obs.owner_present = false;
        assert!(classifier.classify(&obs).is_unhealthy());
    }
}
