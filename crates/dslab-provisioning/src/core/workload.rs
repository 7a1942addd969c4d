//! Workload models describing the resource demand of VMs in time.

use std::path::Path;

use dyn_clone::{clone_trait_object, DynClone};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::core::config::options::{parse_config_value, parse_options, parse_option_or};
use crate::core::error::ConfigError;

/// A workload model drives the demand of a single VM.
///
/// It plays the role of the guest scheduler running inside VM: the host manager passes it the MIPS shares
/// allocated to VM on each processing sweep and asks it for the current demand, which is expressed as a fraction of
/// the VM's nominal capacity for each resource.
pub trait WorkloadModel: DynClone {
    /// Advances the workload to `time` using the allocated per-PE MIPS shares.
    ///
    /// Returns the predicted time of the next workload event or `0.` if there is no such event.
    fn update_processing(&mut self, time: f64, mips_share: &[f64]) -> f64;

    /// Requested fraction of the nominal MIPS of each virtual PE.
    fn cpu_load(&self) -> f64;

    /// Requested fraction of the nominal RAM.
    fn ram_load(&self) -> f64;

    /// Requested fraction of the nominal bandwidth.
    fn bw_load(&self) -> f64;

    /// Returns true if the workload has no more work to do.
    fn is_finished(&self) -> bool {
        false
    }
}

clone_trait_object!(WorkloadModel);

/// Creates workload model from config string such as `Constant[cpu=0.5,ram=1,bw=1]`.
pub fn workload_resolver(config_str: &str) -> Result<Box<dyn WorkloadModel>, ConfigError> {
    let (name, options) = parse_config_value(config_str);
    let options = parse_options(options.as_deref().unwrap_or_default());
    match name.as_str() {
        "Constant" => Ok(Box::new(ConstantWorkload::new(
            parse_option_or(&options, "cpu", 1.)?,
            parse_option_or(&options, "ram", 1.)?,
            parse_option_or(&options, "bw", 1.)?,
        ))),
        "Task" => Ok(Box::new(
            TaskWorkload::new(parse_option_or(&options, "length", 0.)?)
                .with_ram_load(parse_option_or(&options, "ram", 1.)?)
                .with_bw_load(parse_option_or(&options, "bw", 1.)?),
        )),
        "Trace" => {
            let path = options.get("path").ok_or_else(|| ConfigError::MissingOption {
                value: config_str.to_string(),
                option: "path".to_string(),
            })?;
            TraceWorkload::from_file(path, parse_option_or(&options, "interval", 300.)?)
                .map(|w| Box::new(w) as Box<dyn WorkloadModel>)
        }
        "Random" => Ok(Box::new(RandomWorkload::new(
            parse_option_or(&options, "seed", 0)?,
            parse_option_or(&options, "ram", 1.)?,
            parse_option_or(&options, "bw", 1.)?,
        ))),
        _ => Err(ConfigError::UnknownWorkload(config_str.to_string())),
    }
}

////////////////////////////////////////////////////////////////////////////////

/// The simplest workload, constant load of each resource without any events.
#[derive(Clone)]
pub struct ConstantWorkload {
    cpu: f64,
    ram: f64,
    bw: f64,
}

impl ConstantWorkload {
    pub fn new(cpu: f64, ram: f64, bw: f64) -> Self {
        Self { cpu, ram, bw }
    }

    pub fn full() -> Self {
        Self::new(1., 1., 1.)
    }
}

impl WorkloadModel for ConstantWorkload {
    fn update_processing(&mut self, _time: f64, _mips_share: &[f64]) -> f64 {
        0.
    }

    fn cpu_load(&self) -> f64 {
        self.cpu
    }

    fn ram_load(&self) -> f64 {
        self.ram
    }

    fn bw_load(&self) -> f64 {
        self.bw
    }
}

////////////////////////////////////////////////////////////////////////////////

/// A single job of fixed length (in MI) which fully loads VM CPUs until it completes.
///
/// The job is processed at the rate of the allocated MIPS, so the predicted completion time moves when the
/// allocation changes.
#[derive(Clone)]
pub struct TaskWorkload {
    length: f64,
    remaining: f64,
    ram: f64,
    bw: f64,
    last_update: Option<f64>,
}

impl TaskWorkload {
    pub fn new(length: f64) -> Self {
        Self {
            length,
            remaining: length,
            ram: 1.,
            bw: 1.,
            last_update: None,
        }
    }

    pub fn with_ram_load(mut self, ram: f64) -> Self {
        self.ram = ram;
        self
    }

    pub fn with_bw_load(mut self, bw: f64) -> Self {
        self.bw = bw;
        self
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Returns the amount of work (in MI) left.
    pub fn remaining(&self) -> f64 {
        self.remaining
    }
}

impl WorkloadModel for TaskWorkload {
    fn update_processing(&mut self, time: f64, mips_share: &[f64]) -> f64 {
        let rate: f64 = mips_share.iter().sum();
        if let Some(last_update) = self.last_update {
            self.remaining = (self.remaining - rate * (time - last_update)).max(0.);
        }
        self.last_update = Some(time);
        if self.remaining > 0. && rate > 0. {
            time + self.remaining / rate
        } else {
            0.
        }
    }

    fn cpu_load(&self) -> f64 {
        if self.is_finished() {
            0.
        } else {
            1.
        }
    }

    fn ram_load(&self) -> f64 {
        if self.is_finished() {
            0.
        } else {
            self.ram
        }
    }

    fn bw_load(&self) -> f64 {
        if self.is_finished() {
            0.
        } else {
            self.bw
        }
    }

    fn is_finished(&self) -> bool {
        self.remaining <= 0.
    }
}

////////////////////////////////////////////////////////////////////////////////

/// CPU load replayed from a trace of utilization samples taken at a fixed interval.
///
/// Load between two samples is interpolated linearly, after the end of trace the last sample is used.
/// RAM and bandwidth load is constant.
#[derive(Clone)]
pub struct TraceWorkload {
    samples: Vec<f64>,
    interval: f64,
    ram: f64,
    bw: f64,
    time: f64,
}

impl TraceWorkload {
    pub fn new(samples: Vec<f64>, interval: f64) -> Self {
        Self {
            samples,
            interval,
            ram: 1.,
            bw: 1.,
            time: 0.,
        }
    }

    pub fn with_ram_load(mut self, ram: f64) -> Self {
        self.ram = ram;
        self
    }

    pub fn with_bw_load(mut self, bw: f64) -> Self {
        self.bw = bw;
        self
    }

    fn has_valid_interval(&self) -> bool {
        self.interval.is_finite() && self.interval > 0.
    }

    /// Reads samples from CSV file with a single column of utilization values in `[0, 1]`.
    ///
    /// The sampling interval should be positive.
    pub fn from_file<P: AsRef<Path>>(path: P, interval: f64) -> Result<Self, ConfigError> {
        if !(interval.is_finite() && interval > 0.) {
            return Err(ConfigError::BadOption {
                option: "interval".to_string(),
                raw: interval.to_string(),
            });
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
        let mut samples = Vec::new();
        for record in reader.deserialize() {
            let (sample,): (f64,) = record?;
            samples.push(sample.clamp(0., 1.));
        }
        Ok(Self::new(samples, interval))
    }

    /// Returns the interpolated utilization at the specified time.
    ///
    /// Trace without a positive sampling interval is treated as finished, so the last sample is used.
    pub fn utilization(&self, time: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.;
        }
        if !self.has_valid_interval() {
            return self.samples[self.samples.len() - 1];
        }
        let position = (time / self.interval).max(0.);
        let index = position.floor() as usize;
        if index.saturating_add(1) >= self.samples.len() {
            return self.samples[self.samples.len() - 1];
        }
        let fraction = position - index as f64;
        self.samples[index] + (self.samples[index + 1] - self.samples[index]) * fraction
    }
}

impl WorkloadModel for TraceWorkload {
    fn update_processing(&mut self, time: f64, _mips_share: &[f64]) -> f64 {
        self.time = time;
        if !self.has_valid_interval() {
            return 0.;
        }
        let next_sample = ((time / self.interval).floor() + 1.) * self.interval;
        if next_sample < self.interval * self.samples.len() as f64 {
            next_sample
        } else {
            0.
        }
    }

    fn cpu_load(&self) -> f64 {
        self.utilization(self.time)
    }

    fn ram_load(&self) -> f64 {
        self.ram
    }

    fn bw_load(&self) -> f64 {
        self.bw
    }
}

////////////////////////////////////////////////////////////////////////////////

/// CPU load drawn uniformly from `[0, 1)` on each processing update.
#[derive(Clone)]
pub struct RandomWorkload {
    rand: Pcg64,
    cpu: f64,
    ram: f64,
    bw: f64,
}

impl RandomWorkload {
    pub fn new(seed: u64, ram: f64, bw: f64) -> Self {
        let mut rand = Pcg64::seed_from_u64(seed);
        let cpu = rand.gen_range(0.0..1.0);
        Self { rand, cpu, ram, bw }
    }
}

impl WorkloadModel for RandomWorkload {
    fn update_processing(&mut self, _time: f64, _mips_share: &[f64]) -> f64 {
        self.cpu = self.rand.gen_range(0.0..1.0);
        0.
    }

    fn cpu_load(&self) -> f64 {
        self.cpu
    }

    fn ram_load(&self) -> f64 {
        self.ram
    }

    fn bw_load(&self) -> f64 {
        self.bw
    }
}
