//! The five metric source adapters.

pub mod helpers;

pub mod accelerator;
pub mod camera;
pub mod energy;
pub mod memory;
pub mod temperature;

use std::sync::Arc;

use crate::power::PowerMonitor;
use crate::source::MetricSource;

pub use accelerator::HailoPresenceSource;
pub use camera::CameraPresenceSource;
pub use energy::EnergySource;
pub use memory::MemoryDiskSource;
pub use temperature::TemperatureSource;

/// Every source, reading the live system. Energy readings come from `power`;
/// with `None` the energy source is kept but always absent.
pub fn default_sources(power: Option<Arc<PowerMonitor>>) -> Vec<Box<dyn MetricSource>> {
    let energy = match power {
        Some(monitor) => EnergySource::new(monitor),
        None => EnergySource::disabled(),
    };
    vec![
        Box::new(energy),
        Box::new(CameraPresenceSource::default()),
        Box::new(HailoPresenceSource::default()),
        Box::new(TemperatureSource::default()),
        Box::new(MemoryDiskSource::default()),
    ]
}
