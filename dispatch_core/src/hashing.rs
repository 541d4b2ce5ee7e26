use std::hash::Hasher;

/// A deterministic FNV-1a 64-bit hasher.
///
/// Section fingerprints must compare equal across runs and processes, which
/// rules out the randomized `DefaultHasher`.
#[derive(Debug, Clone)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    /// Feed one field followed by a unit separator so adjacent fields cannot
    /// run together ("AB"+"C" vs "A"+"BC").
    pub fn field(&mut self, value: &str) -> &mut Self {
        self.write(value.as_bytes());
        self.write(&[0x1f]);
        self
    }

    /// Close a record with a record separator.
    pub fn end_record(&mut self) -> &mut Self {
        self.write(&[0x1e]);
        self
    }

    pub fn hex(&self) -> String {
        format!("{:016x}", self.finish())
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_offset_basis() {
        assert_eq!(FnvHasher::new().hex(), "cbf29ce484222325");
        assert_eq!(FnvHasher::default().finish(), FnvHasher::new().finish());
    }

    #[test]
    fn field_boundaries_matter() {
        let mut a = FnvHasher::new();
        a.field("AB").field("C");
        let mut b = FnvHasher::new();
        b.field("A").field("BC");
        assert_ne!(a.hex(), b.hex());
    }
}
