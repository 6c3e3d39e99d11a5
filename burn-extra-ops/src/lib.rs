//! Small modules missing from the core Burn framework.

use burn::prelude::*;

/// Parameter-free pass-through layer.
///
/// Fills the "disabled" variant of an optional layer inside a module enum, so
/// the record keeps the same shape whichever variant is chosen.
#[derive(Module, Clone, Debug, Default)]
pub struct Identity;

impl Identity {
    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn identity_keeps_values() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::random(
            [2, 3, 4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let output = Identity.forward(input.clone());

        assert_eq!(output.dims(), input.dims());
        let diff: f32 = (output - input).abs().max().into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn identity_has_no_parameters() {
        assert_eq!(Module::<TestBackend>::num_params(&Identity), 0);
    }
}
