use crate::types::Identity;

/// Consecutive-frame agreement counter.
///
/// Tracks one candidate identity and how many consecutive frames produced
/// it. A different label restarts the streak at 1; a frame without a face
/// clears it entirely.
#[derive(Debug, Clone)]
pub struct Debounce {
    threshold: u32,
    candidate: Option<Identity>,
    streak: u32,
}

impl Debounce {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            candidate: None,
            streak: 0,
        }
    }

    /// Feed one frame's label. Returns the identity once the streak reaches
    /// the threshold.
    pub fn observe(&mut self, label: &Identity) -> Option<&Identity> {
        let same = self
            .candidate
            .as_ref()
            .is_some_and(|current| current.roll_id == label.roll_id);
        if same {
            self.streak += 1;
        } else {
            self.candidate = Some(label.clone());
            self.streak = 1;
        }
        if self.streak >= self.threshold {
            self.candidate.as_ref()
        } else {
            None
        }
    }

    /// Forget the candidate (face lost).
    pub fn reset(&mut self) {
        self.candidate = None;
        self.streak = 0;
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirms_on_threshold() {
        let ada = Identity::new("ada", 1);
        let mut d = Debounce::new(3);
        assert!(d.observe(&ada).is_none());
        assert!(d.observe(&ada).is_none());
        assert_eq!(d.observe(&ada), Some(&ada));
    }

    #[test]
    fn test_label_change_restarts_at_one() {
        let ada = Identity::new("ada", 1);
        let bob = Identity::new("bob", 2);
        let mut d = Debounce::new(3);
        d.observe(&ada);
        d.observe(&ada);
        d.observe(&bob);
        assert_eq!(d.streak(), 1);
        assert!(d.observe(&bob).is_none());
        assert_eq!(d.observe(&bob), Some(&bob));
    }

    #[test]
    fn test_reset_clears_streak() {
        let ada = Identity::new("ada", 1);
        let mut d = Debounce::new(2);
        d.observe(&ada);
        d.reset();
        assert_eq!(d.streak(), 0);
        assert!(d.observe(&ada).is_none());
    }
}
