pub trait Toggle {
    /// Flips the value and returns the new state.
    fn toggle(&mut self) -> bool;
}

impl Toggle for bool {
    fn toggle(&mut self) -> bool {
        *self = !*self;
        *self
    }
}
