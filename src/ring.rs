use md5::{Digest, Md5};

/// Position on the identifier circle. Both nodes and keys live in [0, 2^m).
pub type Id = u64;

/// The modular identifier space of one ring. Copied freely; every node and
/// every key hash is reduced into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpace {
    bits: u32,
}

impl IdSpace {
    /// `bits` is m; the ring then spans [0, 2^m). Capped at 32 so start
    /// arithmetic and hashes stay comfortably inside u64.
    pub fn new(bits: u32) -> IdSpace {
        assert!((1..=32).contains(&bits), "ring bits must be in 1..=32");
        IdSpace { bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn size(&self) -> u64 {
        1u64 << self.bits
    }

    pub fn reduce(&self, x: u64) -> Id {
        x & (self.size() - 1)
    }

    pub fn add(&self, a: Id, b: u64) -> Id {
        self.reduce(a.wrapping_add(b))
    }

    pub fn sub(&self, a: Id, b: u64) -> Id {
        self.reduce(a.wrapping_add(self.size()).wrapping_sub(self.reduce(b)))
    }

    /// Hash a key string onto the circle: MD5 over the UTF-8 bytes, the
    /// 128-bit digest read big-endian, reduced mod 2^m. Every node must
    /// compute this identically.
    pub fn hash_key(&self, key: &str) -> Id {
        let digest = Md5::digest(key.as_bytes());
        let wide = u128::from_be_bytes(digest[..].try_into().unwrap());
        (wide % self.size() as u128) as Id
    }

    /// True iff `k` lies on the clockwise half-open arc [a, b).
    ///
    /// When a == b the arc is either the whole circle or empty, which is the
    /// caller's choice via `equals`. Callers express other brackets by
    /// shifting an endpoint by one, e.g. (a, b] is [a+1, b+1).
    pub fn in_between(&self, k: Id, a: Id, b: Id, equals: bool) -> bool {
        let k = self.reduce(k);
        let a = self.reduce(a);
        let b = self.reduce(b);

        if a == b {
            equals
        } else if a < b {
            a <= k && k < b
        } else {
            // arc wraps past zero
            k >= a || k < b
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_and_reduce() {
        let space = IdSpace::new(3);
        assert_eq!(space.size(), 8);
        assert_eq!(space.reduce(9), 1);
        assert_eq!(space.add(7, 1), 0);
        assert_eq!(space.sub(0, 1), 7);
        assert_eq!(space.sub(3, 4), 7);
    }

    #[test]
    fn test_in_between_plain_arc() {
        let space = IdSpace::new(3);
        // [2, 5)
        assert!(space.in_between(2, 2, 5, false));
        assert!(space.in_between(4, 2, 5, false));
        assert!(!space.in_between(5, 2, 5, false));
        assert!(!space.in_between(1, 2, 5, false));
    }

    #[test]
    fn test_in_between_wrapping_arc() {
        let space = IdSpace::new(3);
        // [6, 2) wraps past zero
        assert!(space.in_between(6, 6, 2, false));
        assert!(space.in_between(7, 6, 2, false));
        assert!(space.in_between(0, 6, 2, false));
        assert!(space.in_between(1, 6, 2, false));
        assert!(!space.in_between(2, 6, 2, false));
        assert!(!space.in_between(5, 6, 2, false));
    }

    #[test]
    fn test_in_between_degenerate_arc() {
        let space = IdSpace::new(3);
        assert!(space.in_between(3, 5, 5, true));
        assert!(!space.in_between(3, 5, 5, false));
    }

    #[test]
    fn test_in_between_inputs_are_reduced() {
        let space = IdSpace::new(3);
        // (a, b] expressed as [a+1, b+1) with b+1 wrapping
        assert!(space.in_between(0, 6 + 1, 7 + 1, false));
        assert!(space.in_between(7, 6 + 1, 7 + 1, false));
        assert!(!space.in_between(6, 6 + 1, 7 + 1, false));
    }

    // Exactly one of the two opposite arcs contains k when the endpoints
    // differ and k is not one of them.
    #[test]
    fn test_in_between_partitions_the_circle() {
        let space = IdSpace::new(3);
        for a in 0..8 {
            for b in 0..8 {
                if a == b {
                    continue;
                }
                for k in 0..8 {
                    if k == a || k == b {
                        continue;
                    }
                    let forward = space.in_between(k, a, b, false);
                    let backward = space.in_between(k, b, a, false);
                    assert!(forward ^ backward, "k={k} a={a} b={b}");
                }
            }
        }
    }

    #[test]
    fn test_hash_key_is_stable_and_in_range() {
        for bits in [3, 5, 7] {
            let space = IdSpace::new(bits);
            for key in ["cubaeduca.cu", "etecsa.cu", "uci.cu", "evea.uh.cu"] {
                let h = space.hash_key(key);
                assert!(h < space.size());
                assert_eq!(h, space.hash_key(key));
            }
        }
    }

    #[test]
    fn test_hash_key_narrow_space_is_truncation_of_wide() {
        // mod 2^m keeps the low bits of the same digest
        let narrow = IdSpace::new(3);
        let wide = IdSpace::new(7);
        let h = wide.hash_key("etecsa.cu");
        assert_eq!(narrow.hash_key("etecsa.cu"), h % 8);
    }
}
