//! Capabilities consumed from the execution backend.
//!
//! A [`Runner`] compiles and times one kernel configuration on a [`Device`].
//! Strategies only need the thread bound and an opaque environment description
//! from the device, so that is all the trait exposes.

use serde::{Deserialize, Serialize};

use crate::errors::TuneResult;
use crate::params::ConfigView;

/// Opaque description of the hardware/software context of a run.
pub type Environment = serde_json::Map<String, serde_json::Value>;

/// Minimal device capability set.
pub trait Device {
    /// Upper bound on threads per block, used to filter the search space.
    fn max_threads(&self) -> u64;

    /// Metadata describing the device and toolchain.
    fn environment(&self) -> Environment;
}

/// Options describing the kernel being tuned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelOptions {
    pub kernel_name: String,
    pub problem_size: Vec<u64>,
    /// Backend-specific settings passed through untouched.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl KernelOptions {
    pub fn new(kernel_name: impl Into<String>) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            ..Self::default()
        }
    }

    pub fn with_problem_size(mut self, problem_size: Vec<u64>) -> Self {
        self.problem_size = problem_size;
        self
    }
}

/// Options selecting and configuring the target device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceOptions {
    pub device: usize,
    pub platform: usize,
    #[serde(default)]
    pub compiler_options: Vec<String>,
}

/// What happened when a runner executed one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Measured execution time in milliseconds.
    Time(f64),
    CompileFailed(String),
    RuntimeFailed(String),
}

/// Execution backend: measures the cost of a configuration.
pub trait Runner {
    fn device(&self) -> &dyn Device;

    fn run(&mut self, config: &ConfigView<'_>, kernel_options: &KernelOptions)
        -> TuneResult<RunOutcome>;
}

/// Device with a fixed thread bound and environment map.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticDevice {
    max_threads: u64,
    environment: Environment,
}

impl StaticDevice {
    pub fn new(max_threads: u64) -> Self {
        let mut environment = Environment::new();
        environment.insert("device_name".to_string(), "static".into());
        environment.insert("max_threads".to_string(), max_threads.into());
        Self {
            max_threads,
            environment,
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.environment.insert(key.into(), value);
        self
    }
}

impl Device for StaticDevice {
    fn max_threads(&self) -> u64 {
        self.max_threads
    }

    fn environment(&self) -> Environment {
        self.environment.clone()
    }
}

/// Runner backed by a closure, for simulations and tests.
pub struct FnRunner<F> {
    device: StaticDevice,
    cost: F,
}

impl<F> FnRunner<F>
where
    F: FnMut(&ConfigView<'_>) -> RunOutcome,
{
    pub fn new(device: StaticDevice, cost: F) -> Self {
        Self { device, cost }
    }
}

impl<F> Runner for FnRunner<F>
where
    F: FnMut(&ConfigView<'_>) -> RunOutcome,
{
    fn device(&self) -> &dyn Device {
        &self.device
    }

    fn run(
        &mut self,
        config: &ConfigView<'_>,
        _kernel_options: &KernelOptions,
    ) -> TuneResult<RunOutcome> {
        Ok((self.cost)(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParameterValue, TuneParams};

    #[test]
    fn static_device_reports_environment() {
        let device = StaticDevice::new(1024).with_entry("driver", "12.4".into());
        assert_eq!(device.max_threads(), 1024);
        let env = device.environment();
        assert_eq!(env.get("max_threads"), Some(&serde_json::json!(1024)));
        assert_eq!(env.get("driver"), Some(&serde_json::json!("12.4")));
    }

    #[test]
    fn fn_runner_invokes_closure() {
        let params = TuneParams::new().add_ints("x", &[1, 2, 3]);
        let mut runner = FnRunner::new(StaticDevice::new(256), |c| {
            let x = c.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            RunOutcome::Time(x * 2.0)
        });
        let values = vec![ParameterValue::Int(3)];
        let outcome = runner
            .run(&params.view(&values), &KernelOptions::new("vector_add"))
            .unwrap();
        assert_eq!(outcome, RunOutcome::Time(6.0));
        assert_eq!(runner.device().max_threads(), 256);
    }

    #[test]
    fn kernel_options_round_trip() {
        let opts = KernelOptions::new("matmul").with_problem_size(vec![4096, 4096]);
        let json = serde_json::to_string(&opts).unwrap();
        let back: KernelOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }
}
