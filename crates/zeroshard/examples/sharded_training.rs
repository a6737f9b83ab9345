//! Sharded Training Example
//!
//! Trains a small dense + MoE network on two local ranks with parameters,
//! gradients and optimizer masters sharded across the group.

use std::sync::Arc;

use zeroshard::prelude::*;
use zeroshard::tensor::uniform;
use zeroshard::trainer::ProgressLogger;
use zeroshard::zero::Result;

const WORLD_SIZE: usize = 2;

fn train(world: World) -> Result<(usize, f32, usize)> {
    let ctx = MoeContext::setup(&world, 7, None)?;
    let config = ZeroConfig::default()
        .cpu_offload(true)
        .use_memory_tracer(true)
        .gpu_margin_mem_ratio(0.5);

    // 1. Build the model inside the init context so parameters are sharded
    // as they are created.
    let init = ZeroInitContext::new(&world, config, Device::Cuda(0))?;
    let (net, params) = init.scope(|| -> Result<Sequential> {
        let mut rng = seeded_rng(1);
        Ok(Sequential::new()
            .add(Linear::new(8, 8, &mut rng))
            .add(ReLU::default())
            .add(MoeLayer::new(&ctx, 8, 4, &mut rng)?)
            .add(Linear::new(8, 1, &mut rng)))
    })?;
    let model = ShardedModel::new(net?, params)?;

    // 2. Wrap it with a sharded optimizer and a trainer.
    let optim = ShardedOptimizer::new(model, HybridAdam::new(1e-2))?;
    let mut trainer = Trainer::new(optim, TrainingConfig::new().epochs(20).log_every(10))
        .moe_context(Arc::clone(&ctx))
        .callback(Box::new(ProgressLogger::new(10)));

    // 3. Each rank trains on its own slice of the data.
    let mut rng = seeded_rng(1000 + world.rank() as u64);
    let batches: Vec<(Tensor, Tensor)> = (0..4)
        .map(|_| -> Result<(Tensor, Tensor)> {
            let x = uniform(&[16, 8], -1.0, 1.0, &mut rng);
            let y = Tensor::from_vec(
                x.to_vec().chunks(8).map(|r| r.iter().sum::<f32>() * 0.25).collect(),
                &[16, 1],
            )?;
            Ok((x, y))
        })
        .collect::<Result<_>>()?;

    let history = trainer.fit(&batches)?;
    let final_loss = history.train_loss.last().copied().unwrap_or(0.0);
    Ok((world.rank(), final_loss, history.skipped_steps))
}

fn main() {
    zeroshard::init_tracing("info");
    println!("=== zeroshard - Sharded Training Example ===\n");
    println!("Version: {}\n", zeroshard::version());

    match run_with_retry(WORLD_SIZE, ADDRESS_IN_USE_PATTERN, 3, train) {
        Ok(results) => {
            for (rank, loss, skipped) in results {
                println!("rank {rank}: final loss {loss:.5}, skipped steps {skipped}");
            }
        }
        Err(err) => {
            eprintln!("training failed: {err}");
            std::process::exit(1);
        }
    }
}
