//! End-to-end integration tests for sharded training.
//! Every test launches a local process group and runs the same code on each
//! rank, the way a user's training script would.

use std::sync::Arc;

use zeroshard::prelude::*;
use zeroshard::tensor::uniform;
use zeroshard::zero::{Result, TensorState};

const MAX_ATTEMPTS: usize = 3;

/// Dense layer, activation and a two-expert MoE layer, all of width 4.
fn build_net(ctx: &Arc<MoeContext>) -> Result<Sequential> {
    let mut rng = seeded_rng(11);
    Ok(Sequential::new()
        .add(Linear::new(4, 4, &mut rng))
        .add(ReLU::default())
        .add(MoeLayer::new(ctx, 4, 2, &mut rng)?))
}

fn sharded(
    world: &World,
    ctx: &Arc<MoeContext>,
    config: ZeroConfig,
) -> Result<ShardedModel<Sequential>> {
    let init = ZeroInitContext::new(world, config, Device::Cuda(0))?;
    let (net, params) = init.scope(|| build_net(ctx))?;
    ShardedModel::new(net?, params)
}

fn batch(world: &World) -> (Tensor, Tensor) {
    let mut rng = seeded_rng(100 + world.rank() as u64);
    (
        uniform(&[3, 4], -1.0, 1.0, &mut rng),
        uniform(&[3, 4], -1.0, 1.0, &mut rng),
    )
}

fn run<R, F>(world_size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(World) -> Result<R> + Sync,
{
    run_with_retry(world_size, ADDRESS_IN_USE_PATTERN, MAX_ATTEMPTS, f).unwrap()
}

/// Test 1: A clean step matches an unsharded model trained with the MoE
/// gradient handler.
#[test]
fn test_step_matches_reference() {
    for kind in [ShardStrategyKind::Tensor, ShardStrategyKind::Bucket] {
        let mismatches = run(2, |world| {
            let ctx = MoeContext::setup(&world, 42, None)?;
            let config = ZeroConfig::default()
                .cpu_offload(true)
                .shard_strategy(kind);
            let model = sharded(&world, &ctx, config)?;
            let mut optim = ShardedOptimizer::new(model, CpuAdam::new(1e-3))?;

            let mut reference = build_net(&ctx)?;
            let named = reference.named_parameters();
            sync_reference(optim.model(), &named)?;
            let mut ref_optim = ParamOptimizer::new(reference.parameters(), CpuAdam::new(1e-3));
            let handler = MoeGradientHandler::new(&world);
            let loss = MSELoss::new();
            let (x, y) = batch(&world);

            let out = optim.forward(&x)?;
            optim.backward(&loss.backward(&out, &y)?)?;
            assert!(optim.step()?);

            let out = reference.forward(&x)?;
            reference.backward(&loss.backward(&out, &y)?)?;
            handler.handle_gradient(&reference.parameters())?;
            ref_optim.step()?;

            compare_with_reference(optim.model(), &named, Tolerance::default())
        });
        assert!(mismatches.iter().all(Vec::is_empty), "{kind}: {mismatches:?}");
    }
    println!("✓ Sharded step matches the reference");
}

/// Test 2: An overflow on one rank skips the step on every rank.
#[test]
fn test_overflow_skips_step_everywhere() {
    let results = run(2, |world| {
        let ctx = MoeContext::setup(&world, 42, None)?;
        let model = sharded(&world, &ctx, ZeroConfig::default().cpu_offload(true))?;
        let mut optim = ShardedOptimizer::new(model, CpuAdam::new(1e-3))?;
        let before = optim.model().gather_full_params()?;

        let (x, y) = batch(&world);
        let out = optim.forward(&x)?;
        let grad = MSELoss::new().backward(&out, &y)?;
        optim.model_mut().backward_compute(&grad)?;
        if world.rank() == 1 {
            if let Some(g) = optim.model().params()[0].param().grad() {
                g.fill_(f32::INFINITY);
            }
        }
        optim.model_mut().post_backward()?;
        let applied = optim.step()?;

        let after = optim.model().gather_full_params()?;
        Ok((applied, before == after, optim.overflow_counter(), optim.loss_scale()))
    });
    for (applied, unchanged, overflows, scale) in results {
        assert!(!applied);
        assert!(unchanged);
        assert_eq!(overflows, 1);
        assert_eq!(scale, 16.0);
    }
    println!("✓ Overflow skips the step on every rank");
}

/// Test 3: An overflow step followed by a clean step still matches the
/// reference, which only takes the clean step.
#[test]
fn test_overflow_then_clean_step_matches_reference() {
    let results = run(2, |world| {
        let ctx = MoeContext::setup(&world, 42, None)?;
        let model = sharded(&world, &ctx, ZeroConfig::default().cpu_offload(true))?;
        let mut optim = ShardedOptimizer::new(model, CpuAdam::new(1e-3))?;

        let mut reference = build_net(&ctx)?;
        let named = reference.named_parameters();
        sync_reference(optim.model(), &named)?;
        let mut ref_optim = ParamOptimizer::new(reference.parameters(), CpuAdam::new(1e-3));
        let handler = MoeGradientHandler::new(&world);
        let loss = MSELoss::new();
        let (x, y) = batch(&world);

        let out = optim.forward(&x)?;
        let grad = loss.backward(&out, &y)?.mul_scalar(optim.loss_scale());
        optim.model_mut().backward_compute(&grad)?;
        if world.rank() == 1 {
            if let Some(g) = optim.model().params()[0].param().grad() {
                g.fill_(f32::INFINITY);
            }
        }
        optim.model_mut().post_backward()?;
        let skipped = !optim.step()?;
        let untouched = compare_with_reference(optim.model(), &named, Tolerance::default())?;

        let out = optim.forward(&x)?;
        optim.backward(&loss.backward(&out, &y)?)?;
        let applied = optim.step()?;

        let out = reference.forward(&x)?;
        reference.backward(&loss.backward(&out, &y)?)?;
        handler.handle_gradient(&reference.parameters())?;
        ref_optim.step()?;

        let mismatches = compare_with_reference(optim.model(), &named, Tolerance::default())?;
        Ok((skipped, applied, optim.overflow_counter(), untouched, mismatches))
    });
    for (skipped, applied, overflows, untouched, mismatches) in results {
        assert!(skipped);
        assert!(applied);
        assert_eq!(overflows, 1);
        assert!(untouched.is_empty());
        assert!(mismatches.is_empty(), "{mismatches:?}");
    }
    println!("✓ Overflow then clean step matches the reference");
}

/// Test 4: HybridAdam with reused half-precision shards, with and without a
/// device margin for the masters.
#[test]
fn test_hybrid_adam_margin() {
    for ratio in [0.0f32, 0.7] {
        let results = run(2, |world| {
            let ctx = MoeContext::setup(&world, 42, None)?;
            let config = ZeroConfig::default()
                .cpu_offload(true)
                .reuse_fp16_shard(true)
                .use_memory_tracer(true)
                .gpu_margin_mem_ratio(ratio);
            let model = sharded(&world, &ctx, config)?;
            let mut optim = ShardedOptimizer::new(model, HybridAdam::new(1e-3))?;
            let loss = MSELoss::new();
            let (x, y) = batch(&world);

            // First step overflows on rank 0.
            let out = optim.forward(&x)?;
            let grad = loss.backward(&out, &y)?.mul_scalar(optim.loss_scale());
            optim.model_mut().backward_compute(&grad)?;
            if world.rank() == 0 {
                if let Some(g) = optim.model().params()[0].param().grad() {
                    g.fill_(f32::NAN);
                }
            }
            optim.model_mut().post_backward()?;
            let skipped = !optim.step()? && optim.found_inf();

            let out = optim.forward(&x)?;
            optim.backward(&loss.backward(&out, &y)?)?;
            let applied = optim.step()? && !optim.found_inf();

            let restored = optim
                .model()
                .params()
                .iter()
                .all(|sp| !sp.data().is_released() && sp.data().state() == TensorState::Hold);
            Ok((skipped, applied, restored, optim.master_device(0)))
        });
        let expected = if ratio > 0.0 {
            Device::Cuda(0)
        } else {
            Device::Cpu
        };
        for (skipped, applied, restored, device) in results {
            assert!(skipped);
            assert!(applied);
            assert!(restored);
            assert_eq!(device, Some(expected));
        }
    }
    println!("✓ HybridAdam places masters by margin");
}

/// Test 5: Parameters below the threshold stay whole and replicas agree.
#[test]
fn test_replicate_threshold() {
    let results = run(2, |world| {
        let ctx = MoeContext::setup(&world, 42, None)?;
        let config = ZeroConfig::default().replicate_threshold(5);
        let model = sharded(&world, &ctx, config)?;
        let weight = model.param("0.weight").map(|sp| sp.data().payload_numel());
        let bias = model.param("0.bias").map(|sp| sp.is_sharded());

        let mut optim = ShardedOptimizer::new(model, HybridAdam::new(1e-2))?;
        let (x, y) = batch(&world);
        let out = optim.forward(&x)?;
        optim.backward(&MSELoss::new().backward(&out, &y)?)?;
        optim.step()?;
        Ok((weight, bias, optim.model().check_replicated_params()?))
    });
    for (weight, bias, replicated) in results {
        assert_eq!(weight, Some(8));
        assert_eq!(bias, Some(false));
        assert!(replicated);
    }
    println!("✓ Small parameters stay replicated");
}

/// Test 6: Four ranks, two experts: experts shard over their replica group.
#[test]
fn test_four_rank_expert_partition() {
    let results = run(4, |world| {
        let ctx = MoeContext::setup(&world, 42, None)?;
        let model = sharded(&world, &ctx, ZeroConfig::default())?;
        let dense = model.param("0.weight").map(|sp| sp.data().payload_numel());
        let expert = model
            .params()
            .iter()
            .find(|sp| !sp.is_replicated())
            .map(|sp| (sp.data().payload_numel(), sp.group().ranks().to_vec()));

        let mut optim = ShardedOptimizer::new(model, HybridAdam::new(1e-2))?;
        let (x, y) = batch(&world);
        let out = optim.forward(&x)?;
        optim.backward(&MSELoss::new().backward(&out, &y)?)?;
        assert!(optim.step()?);

        let full = optim.model().gather_full_params()?;
        Ok((dense, expert, full, optim.model().check_replicated_params()?))
    });

    for (rank, (dense, expert, _, replicated)) in results.iter().enumerate() {
        assert_eq!(*dense, Some(4));
        let (numel, group) = expert.clone().unwrap();
        assert_eq!(numel, 8);
        assert_eq!(group, vec![rank % 2, rank % 2 + 2]);
        assert!(replicated);
    }
    // Replicas of the same expert hold the same values.
    assert_eq!(results[0].2, results[2].2);
    assert_eq!(results[1].2, results[3].2);
    println!("✓ Experts partition over four ranks");
}

/// Test 7: The trainer drives the full loop and reports the aux loss.
#[test]
fn test_trainer_end_to_end() {
    let results = run(2, |world| {
        let ctx = MoeContext::setup(&world, 42, None)?;
        let model = sharded(&world, &ctx, ZeroConfig::default())?;
        let optim = ShardedOptimizer::new(model, HybridAdam::new(1e-2))?;
        let mut trainer =
            Trainer::new(optim, TrainingConfig::new().epochs(5)).moe_context(Arc::clone(&ctx));
        let history = trainer.fit(&[batch(&world)])?;
        let report = trainer.train_step(&batch(&world).0, &batch(&world).1)?;
        Ok((history, report))
    });
    for (history, report) in results {
        assert_eq!(history.epochs_completed, 5);
        assert!(report.applied);
        assert!(report.aux_loss > 0.0);
        assert!(history.train_loss[4] < history.train_loss[0]);
    }
    println!("✓ Trainer runs end to end");
}
