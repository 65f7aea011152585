use rand::rngs::OsRng;
use rand::RngCore;

const ADJECTIVES: [&str; 16] = [
    "amber", "brisk", "calm", "dusty", "eager", "frosty", "gentle", "hazy", "ivory", "jolly",
    "keen", "lively", "mellow", "nimble", "quiet", "rustic",
];

const NOUNS: [&str; 8] = [
    "falcon", "otter", "maple", "comet", "harbor", "lantern", "meadow", "pebble",
];

/// Generates a random `adjective-noun-number` label for one container.
pub fn random_hostname() -> String {
    hostname_from_rng(&mut OsRng)
}

pub(crate) fn hostname_from_rng(rng: &mut impl RngCore) -> String {
    let adj = ADJECTIVES[(random_u32(rng) & 0xf) as usize];
    let noun = NOUNS[(random_u32(rng) & 0x7) as usize];
    format!("{adj}-{noun}-{}", random_u32(rng))
}

fn random_u32(rng: &mut impl RngCore) -> u32 {
    let mut buf = [0u8; 4];
    rng.fill_bytes(&mut buf);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn assert_valid(name: &str) {
        let parts: Vec<_> = name.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3, "{name}");
        assert!(ADJECTIVES.contains(&parts[0]), "{name}");
        assert!(NOUNS.contains(&parts[1]), "{name}");
        parts[2].parse::<u32>().unwrap();
    }

    #[test]
    fn labels_are_adjective_noun_number() {
        for seed in 0..64 {
            assert_valid(&hostname_from_rng(&mut StdRng::seed_from_u64(seed)));
        }
    }

    #[test]
    fn seeded_draws_are_stable() {
        let first = hostname_from_rng(&mut StdRng::seed_from_u64(42));
        let second = hostname_from_rng(&mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn system_entropy_produces_valid_labels() {
        assert_valid(&random_hostname());
    }
}
