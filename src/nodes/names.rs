//! Random display names for newly seen nodes

use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "Cool", "Splendid", "Awesome", "Different", "Soft", "Good", "Happy", "Old", "Great", "New",
    "Big", "Small", "Tall", "Short", "Long", "Wide", "High",
];

const NOUNS: &[&str] = &[
    "Node", "Thing", "Box", "Service", "Child", "Line", "Statement", "Flower", "Cat", "Sheep",
];

/// Generate a display name such as "Happy Box"
#[must_use]
pub fn generate_display_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("New");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Node");
    format!("{adjective} {noun}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_adjective_then_noun() {
        for _ in 0..50 {
            let name = generate_display_name();
            let (adjective, noun) = name.split_once(' ').unwrap();
            assert!(ADJECTIVES.contains(&adjective), "unexpected adjective in {name}");
            assert!(NOUNS.contains(&noun), "unexpected noun in {name}");
        }
    }
}
