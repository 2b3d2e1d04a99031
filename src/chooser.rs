use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub const STYLES: [&str; 6] = ["Abstract", "Documentary", "Still-life", "Conceptual", "Fashion", "Black-and-white"];

pub const WORKING_MESSAGES: [&str; 3] = ["Repainting your image...", "Processing your image...", "Creating a new masterpiece..."];

/// Random picks for styles and acknowledgment wording. Seed it in tests.
pub struct Chooser {
    rng: Mutex<StdRng>,
}

impl Chooser {
    pub fn from_entropy() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    pub fn pick<'a>(&self, items: &[&'a str]) -> &'a str {
        items.choose(&mut *self.rng.lock()).copied().unwrap_or_default()
    }

    pub fn style(&self) -> &'static str {
        self.pick(&STYLES)
    }

    pub fn working_message(&self) -> &'static str {
        self.pick(&WORKING_MESSAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let a = Chooser::seeded(42);
        let b = Chooser::seeded(42);
        let left: Vec<&str> = (0..10).map(|_| a.style()).collect();
        let right: Vec<&str> = (0..10).map(|_| b.style()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn picks_stay_in_their_lists() {
        let chooser = Chooser::seeded(1);
        for _ in 0..50 {
            assert!(STYLES.contains(&chooser.style()));
            assert!(WORKING_MESSAGES.contains(&chooser.working_message()));
        }
        assert_eq!(chooser.pick(&[]), "");
    }
}
