//! Reference Checks - Comparing a Sharded Model Against an Unsharded One
//!
//! Both helpers gather the full parameters, so every rank must call them.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use tracing::warn;
use zeroshard_nn::{Module, Parameter};
use zeroshard_tensor::Tensor;

use crate::config::Tolerance;
use crate::error::{Result, ZeroError};
use crate::sharded_model::ShardedModel;

/// A parameter that differs from its reference beyond tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamMismatch {
    /// Qualified parameter name.
    pub name: String,
    /// Largest elementwise absolute difference.
    pub max_abs_diff: f32,
}

fn lookup<'a>(reference: &'a [(String, Parameter)], name: &str) -> Result<&'a Parameter> {
    reference
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, p)| p)
        .ok_or_else(|| ZeroError::shard_state(format!("reference has no parameter '{name}'")))
}

/// Copies the sharded model's full parameters into `reference`, so both
/// start from the same compute-precision values.
pub fn sync_reference<M: Module>(
    model: &ShardedModel<M>,
    reference: &[(String, Parameter)],
) -> Result<()> {
    for (name, values) in model.gather_full_params()? {
        let param = lookup(reference, &name)?;
        param.set_data(Tensor::from_vec(values, &param.shape())?)?;
    }
    Ok(())
}

/// Lists the parameters whose gathered values differ from `reference` by
/// more than `atol + rtol * |reference|`.
pub fn compare_with_reference<M: Module>(
    model: &ShardedModel<M>,
    reference: &[(String, Parameter)],
    tolerance: Tolerance,
) -> Result<Vec<ParamMismatch>> {
    let mut mismatches = Vec::new();
    for (name, values) in model.gather_full_params()? {
        let expected = lookup(reference, &name)?.data()?.to_vec();
        let mut max_abs_diff = 0.0f32;
        let mut close = expected.len() == values.len();
        for (a, b) in values.iter().zip(&expected) {
            let diff = (a - b).abs();
            max_abs_diff = max_abs_diff.max(diff);
            close &= diff <= tolerance.atol + tolerance.rtol * b.abs();
        }
        if !close {
            warn!(name = %name, max_abs_diff, "parameter differs from reference");
            mismatches.push(ParamMismatch { name, max_abs_diff });
        }
    }
    Ok(mismatches)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZeroConfig;
    use crate::init_ctx::ZeroInitContext;
    use zeroshard_core::Device;
    use zeroshard_distributed::World;
    use zeroshard_nn::Linear;
    use zeroshard_tensor::seeded_rng;

    #[test]
    fn test_sync_then_compare() {
        let world = World::single();
        let ctx = ZeroInitContext::new(&world, ZeroConfig::default(), Device::Cpu).unwrap();
        let (layer, set) = ctx.scope(|| Linear::new(4, 3, &mut seeded_rng(3))).unwrap();
        let model = ShardedModel::new(layer, set).unwrap();

        let reference = Linear::new(4, 3, &mut seeded_rng(99));
        let named = reference.named_parameters();
        assert!(!compare_with_reference(&model, &named, Tolerance::default())
            .unwrap()
            .is_empty());

        sync_reference(&model, &named).unwrap();
        assert!(compare_with_reference(&model, &named, Tolerance::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_reference_parameter() {
        let world = World::single();
        let ctx = ZeroInitContext::new(&world, ZeroConfig::default(), Device::Cpu).unwrap();
        let (layer, set) = ctx.scope(|| Linear::new(2, 2, &mut seeded_rng(3))).unwrap();
        let model = ShardedModel::new(layer, set).unwrap();
        assert!(matches!(
            sync_reference(&model, &[]),
            Err(ZeroError::ShardState(_))
        ));
    }
}
