use anyhow::Result;
use kt_optimizer::*;
use kt_types::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Simulated kernel time: fastest around 128x4 threads with unroll 4 and a
/// 0.75 occupancy target.
fn simulated_time(config: &ConfigView<'_>) -> RunOutcome {
    let get = |name: &str| config.get(name).and_then(|v| v.as_f64()).unwrap_or(1.0);
    let (bx, by) = (get("block_size_x"), get("block_size_y"));
    let (unroll, tile) = (get("unroll"), get("tile"));

    if unroll * tile > 16.0 {
        return RunOutcome::CompileFailed("register spill".to_string());
    }
    let occupancy = ((bx * by).log2() - 9.0).powi(2);
    let shape = (bx.log2() - 7.0).abs() * 0.3;
    let ilp = (unroll.log2() - 2.0).powi(2) * 0.5 + (tile - 2.0).abs() * 0.2;
    let target = (get("occupancy_target") - 0.75).abs();
    RunOutcome::Time(1.0 + occupancy + shape + ilp + target)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let params = TuneParams::new()
        .add_ints("block_size_x", &[16, 32, 64, 128, 256, 512])
        .add_ints("block_size_y", &[1, 2, 4, 8, 16])
        .add_ints("unroll", &[1, 2, 4, 8])
        .add_ints("tile", &[1, 2, 4])
        .add_ints("vector_width", &[4])
        .add_floats("occupancy_target", &[0.5, 0.75, 1.0]);

    let options = TuningOptions::new(params)?
        .with_restriction(Restriction::new(|c| {
            let bx = c.get("block_size_x").and_then(|v| v.as_i64()).unwrap_or(0);
            bx >= 32 || c.get("tile").and_then(|v| v.as_i64()) == Some(1)
        }))
        .with_strategy_options(json!({
            "popsize": 12,
            "max_fevals": 60,
            "method": "multi",
            "seed": 42,
        }))
        .with_verbose(std::env::var_os("KT_VERBOSE").is_some());

    let device = StaticDevice::new(1024).with_entry("device_name", json!("Simulated GPU"));
    let mut runner = FnRunner::new(device, simulated_time);
    let kernel = KernelOptions::new("stencil_2d").with_problem_size(vec![4096, 4096]);

    let bo = tune(
        BayesOptStrategy::NAME,
        &mut runner,
        &kernel,
        &DeviceOptions::default(),
        &options,
    )?;
    let random = tune(
        RandomSampling::NAME,
        &mut runner,
        &kernel,
        &DeviceOptions::default(),
        &options.clone().with_strategy_options(json!({"max_fevals": 60, "seed": 42})),
    )?;

    for output in [&bo, &random] {
        let summary = &output.summary;
        match &summary.best {
            Some(best) => println!(
                "{:>14}: {} evaluations ({} invalid), best {:.3} ms at {}",
                summary.strategy,
                summary.evaluations,
                summary.invalid_evaluations,
                best.time.unwrap_or(f64::NAN),
                format_configuration(&best.configuration)
            ),
            None => println!("{:>14}: no valid configuration found", summary.strategy),
        }
    }
    println!("Environment: {}", serde_json::to_string(&bo.environment)?);

    Ok(())
}
