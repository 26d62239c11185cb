// Random ids, password hashing, autogenerate-pattern synthesis.

use crate::error::{RecordError, Result};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Alphabet for generated external record ids.
const ID_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

const HASH_ITERATIONS: u32 = 10_000;
const SALT_BYTES: usize = 16;

/// Random lowercase-alphanumeric string of exactly `len` characters.
pub fn random_string(len: usize) -> String {
    let alphabet: Vec<char> = ID_ALPHABET.chars().collect();
    nanoid::nanoid!(len, &alphabet)
}

/// Random string whose length is drawn uniformly from [min, max].
pub fn random_string_in(min: usize, max: usize) -> String {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let len = if lo == hi {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi)
    };
    random_string(len.max(1))
}

/// Hash a plaintext password with a fresh random salt.
/// Format: `<iterations>$<salt-hex>$<digest-hex>`.
pub fn hash_password(plaintext: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill(&mut salt);
    let digest = derive(plaintext, &salt, HASH_ITERATIONS);
    format!(
        "{}${}${}",
        HASH_ITERATIONS,
        to_hex(&salt),
        to_hex(&digest)
    )
}

/// Check a plaintext password against a stored hash string.
/// Malformed hashes verify as false rather than raising.
pub fn verify_password(plaintext: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(iters), Some(salt_hex), Some(digest_hex)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(iterations) = iters.parse::<u32>() else {
        return false;
    };
    let Some(salt) = from_hex(salt_hex) else {
        return false;
    };
    let recomputed = to_hex(&derive(plaintext, &salt, iterations));
    // Compare digests byte-wise without early exit.
    if recomputed.len() != digest_hex.len() {
        return false;
    }
    recomputed
        .bytes()
        .zip(digest_hex.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn derive(plaintext: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(plaintext.as_bytes());
    let mut digest = hasher.finalize().to_vec();
    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(&digest);
        digest = hasher.finalize().to_vec();
    }
    digest
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

// ── Autogenerate patterns ────────────────────────────────────────

/// Synthesize a string matching a practical regex subset: literals,
/// `\d`/`\w`, bracketed classes with ranges, and the quantifiers
/// `{n}`, `{n,m}`, `?`, `*`, `+` (unbounded repeats capped at 6).
/// The output is verified against the compiled pattern before returning.
pub fn generate_from_pattern(pattern: &str) -> Result<String> {
    let mut stripped = pattern;
    stripped = stripped.strip_prefix('^').unwrap_or(stripped);
    stripped = stripped.strip_suffix('$').unwrap_or(stripped);

    let atoms = parse_atoms(stripped)
        .ok_or_else(|| RecordError::Validation(format!("Unsupported pattern: {pattern}")))?;

    let mut rng = rand::thread_rng();
    let mut out = String::new();
    for (atom, quantifier) in atoms {
        let count = quantifier.draw(&mut rng);
        for _ in 0..count {
            out.push(atom.pick(&mut rng));
        }
    }

    // A synthesized value that fails its own pattern means the pattern uses
    // constructs outside the supported subset.
    let re = regex::Regex::new(pattern)
        .map_err(|e| RecordError::Validation(format!("Invalid pattern {pattern:?}: {e}")))?;
    if !re.is_match(&out) {
        return Err(RecordError::Validation(format!(
            "Unsupported pattern: {pattern}"
        )));
    }
    Ok(out)
}

enum Atom {
    Literal(char),
    Class(Vec<char>),
}

impl Atom {
    fn pick(&self, rng: &mut impl Rng) -> char {
        match self {
            Atom::Literal(c) => *c,
            Atom::Class(chars) => chars[rng.gen_range(0..chars.len())],
        }
    }
}

struct Quantifier {
    min: usize,
    max: usize,
}

impl Quantifier {
    fn once() -> Self {
        Quantifier { min: 1, max: 1 }
    }

    fn draw(&self, rng: &mut impl Rng) -> usize {
        if self.min == self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

fn digit_class() -> Vec<char> {
    ('0'..='9').collect()
}

fn word_class() -> Vec<char> {
    ('a'..='z')
        .chain('A'..='Z')
        .chain('0'..='9')
        .chain(std::iter::once('_'))
        .collect()
}

fn parse_atoms(pattern: &str) -> Option<Vec<(Atom, Quantifier)>> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut atoms = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let atom = match chars[i] {
            '\\' => {
                i += 1;
                match chars.get(i)? {
                    'd' => Atom::Class(digit_class()),
                    'w' => Atom::Class(word_class()),
                    c => Atom::Literal(*c),
                }
            }
            '[' => {
                let close = chars[i..].iter().position(|&c| c == ']')? + i;
                let members = parse_class(&chars[i + 1..close])?;
                i = close;
                Atom::Class(members)
            }
            '(' | ')' | '|' | '.' => return None,
            c => Atom::Literal(c),
        };
        i += 1;

        let quantifier = match chars.get(i) {
            Some('{') => {
                let close = chars[i..].iter().position(|&c| c == '}')? + i;
                let counts: String = chars[i + 1..close].iter().collect();
                i = close + 1;
                let (min, max) = match counts.split_once(',') {
                    Some((lo, hi)) => (lo.trim().parse().ok()?, hi.trim().parse().ok()?),
                    None => {
                        let n = counts.trim().parse().ok()?;
                        (n, n)
                    }
                };
                if min > max {
                    return None;
                }
                Quantifier { min, max }
            }
            Some('?') => {
                i += 1;
                Quantifier { min: 0, max: 1 }
            }
            Some('*') => {
                i += 1;
                Quantifier { min: 0, max: 6 }
            }
            Some('+') => {
                i += 1;
                Quantifier { min: 1, max: 6 }
            }
            _ => Quantifier::once(),
        };

        atoms.push((atom, quantifier));
    }

    Some(atoms)
}

fn parse_class(members: &[char]) -> Option<Vec<char>> {
    if members.first() == Some(&'^') {
        return None;
    }
    let mut out = Vec::new();
    let mut i = 0;
    while i < members.len() {
        if members[i] == '\\' {
            i += 1;
            match members.get(i)? {
                'd' => out.extend(digit_class()),
                'w' => out.extend(word_class()),
                c => out.push(*c),
            }
            i += 1;
        } else if i + 2 < members.len() && members[i + 1] == '-' {
            let (lo, hi) = (members[i], members[i + 2]);
            if lo > hi {
                return None;
            }
            out.extend(lo..=hi);
            i += 3;
        } else {
            out.push(members[i]);
            i += 1;
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string_length_and_alphabet() {
        let id = random_string(16);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| ID_ALPHABET.contains(c)));
    }

    #[test]
    fn test_random_string_in_range() {
        for _ in 0..20 {
            let id = random_string_in(8, 12);
            assert!((8..=12).contains(&id.len()), "got length {}", id.len());
        }
    }

    #[test]
    fn test_password_round_trip() {
        let stored = hash_password("correct horse");
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("wrong horse", &stored));
    }

    #[test]
    fn test_password_hashes_are_salted() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn test_verify_malformed_hash() {
        assert!(!verify_password("x", "not-a-hash"));
        assert!(!verify_password("x", "10$zz$zz"));
    }

    #[test]
    fn test_generate_from_pattern_classes() {
        let value = generate_from_pattern(r"^[A-Z]{3}-\d{4}$").unwrap();
        let re = regex::Regex::new(r"^[A-Z]{3}-\d{4}$").unwrap();
        assert!(re.is_match(&value), "generated {value:?}");
    }

    #[test]
    fn test_generate_from_pattern_quantifier_range() {
        for _ in 0..10 {
            let value = generate_from_pattern(r"[a-z]{2,5}").unwrap();
            assert!((2..=5).contains(&value.len()));
        }
    }

    #[test]
    fn test_generate_from_pattern_rejects_alternation() {
        assert!(generate_from_pattern("(foo|bar)").is_err());
    }
}
