//! Pool-backed substitute generator
//!
//! Picks synthetic values of the same semantic type and roughly the same
//! shape as the original. Seed it for reproducible output.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::compliance::mapping::EntityType;
use crate::core::collaborators::Faker;

const FULL_NAMES: &[&str] = &[
    "Jordan Avery",
    "Morgan Ellis",
    "Casey Brooks",
    "Riley Hart",
    "Taylor Quinn",
    "Jamie Lowell",
    "Alex Mercer",
    "Robin Sato",
];

const STREET_ADDRESSES: &[&str] = &[
    "45 Oak Ave, Rivertown",
    "12 Birch Lane, Lakeside",
    "908 Cedar Road, Hillcrest",
    "77 Maple Drive, Stonebridge",
    "310 Willow Court, Fairhaven",
];

const PLACES: &[&str] = &["Rivertown", "Lakeside", "Hillcrest", "Stonebridge", "Fairhaven", "Brookmere"];

const ORGANIZATIONS: &[&str] = &[
    "Northwind Traders",
    "Globex Labs",
    "Initech Partners",
    "Bluebird Analytics",
    "Harbor & Pine",
];

const MAIL_DOMAINS: &[&str] = &["example.com", "example.org", "mail.test"];

/// Attempts before falling back to a suffixed value
const MAX_DRAWS: usize = 8;

pub struct PoolFaker {
    rng: Mutex<StdRng>,
}

impl PoolFaker {
    pub fn new() -> Self {
        PoolFaker {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        PoolFaker {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn draw(&self, entity_type: EntityType, original: &str) -> String {
        let mut rng = self.rng.lock();
        match entity_type {
            EntityType::Person => {
                let name = pick(&mut rng, FULL_NAMES);
                if original.split_whitespace().count() <= 1 {
                    name.split_whitespace().next().unwrap_or(name).to_string()
                } else {
                    name.to_string()
                }
            }
            EntityType::Location => {
                if original.chars().any(|c| c.is_ascii_digit()) {
                    pick(&mut rng, STREET_ADDRESSES).to_string()
                } else {
                    pick(&mut rng, PLACES).to_string()
                }
            }
            EntityType::Email => {
                let name = pick(&mut rng, FULL_NAMES).to_lowercase().replace(' ', ".");
                format!("{}@{}", name, pick(&mut rng, MAIL_DOMAINS))
            }
            EntityType::Organization => pick(&mut rng, ORGANIZATIONS).to_string(),
            EntityType::Phone | EntityType::Other => reshape(&mut rng, original),
        }
    }
}

impl Default for PoolFaker {
    fn default() -> Self {
        Self::new()
    }
}

impl Faker for PoolFaker {
    fn generate(&self, entity_type: EntityType, original: &str) -> String {
        let mut candidate = String::new();
        for _ in 0..MAX_DRAWS {
            candidate = self.draw(entity_type, original);
            if !candidate.is_empty() && candidate != original {
                return candidate;
            }
        }
        if candidate.is_empty() {
            candidate = "redacted".to_string();
        }
        format!("{} 2", candidate)
    }
}

fn pick<'a>(rng: &mut StdRng, pool: &[&'a str]) -> &'a str {
    pool.choose(rng).copied().unwrap_or("unknown")
}

/// Keep separators, replace digits and letters with random ones of the same
/// class and case.
fn reshape(rng: &mut StdRng, original: &str) -> String {
    original
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                char::from(b'0' + rng.gen_range(0..10u8))
            } else if c.is_ascii_uppercase() {
                char::from(b'A' + rng.gen_range(0..26u8))
            } else if c.is_ascii_lowercase() {
                char::from(b'a' + rng.gen_range(0..26u8))
            } else {
                c
            }
        })
        .collect()
}
