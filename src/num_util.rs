pub trait Postincrement {
    /// Returns the current value and advances it by one, wrapping to zero
    /// once `modulus` is reached.
    fn postincrement_mod(&mut self, modulus: Self) -> Self;
}

impl Postincrement for usize {
    fn postincrement_mod(&mut self, modulus: Self) -> Self {
        let value = *self;
        *self = (*self + 1) % modulus;
        value
    }
}
