//! Token cost calculation.

use crate::model::ModelDescriptor;

/// Dollar cost of a generation against a descriptor's per-1k pricing.
///
/// Local models cost nothing. The result is never negative.
pub fn cost(descriptor: &ModelDescriptor, input_tokens: u32, output_tokens: u32) -> f64 {
    if descriptor.is_local {
        return 0.0;
    }

    let input = f64::from(input_tokens) / 1000.0 * descriptor.price_per_1k_input;
    let output = f64::from(output_tokens) / 1000.0 * descriptor.price_per_1k_output;
    (input + output).max(0.0)
}
