use object::Specifier;

/// Host implementation of a `native package`.
///
/// The package spec names the procedures; calls arrive here by the
/// index of the procedure in the spec's declaration order.
pub trait NativeUnit {
    /// Unit name, matched case-insensitively against the package.
    fn name(&self) -> &str;

    /// Runs export `index`. The result is stored into `target`, which
    /// starts out as `om`.
    fn call(
        &mut self,
        index: u32,
        args: &[Specifier],
        target: &mut Specifier,
    ) -> Result<(), String>;

    /// Called once when the interpreter shuts down (`<unit>__END`).
    fn finish(&mut self) {}
}
