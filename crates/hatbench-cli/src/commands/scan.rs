use std::sync::Arc;

use hatbench_core::{
    PowerMonitor, PowerMonitorConfig, Reading, default_sources, detect_machine_info,
};

pub fn run() {
    let machine = detect_machine_info();
    println!("Machine: {} {} ({} cores)", machine.os, machine.arch, machine.cores);
    println!("  CPU:          {}", machine.chip);
    println!(
        "  Raspberry Pi: {}",
        if machine.is_raspberry_pi { "yes" } else { "no" }
    );
    println!();

    let power = Arc::new(PowerMonitor::new(PowerMonitorConfig::default()));
    let sources = default_sources(Some(power));

    println!("{} metric source(s):\n", sources.len());
    for src in &sources {
        let info = src.info();
        let status = match src.read() {
            Reading::Present(_) => "\u{2705}",
            Reading::Absent => "\u{2796}",
            Reading::Error(_) => "\u{274C}",
        };
        println!(
            "  {status} {:<22} [{}] {}",
            info.name, info.platform, info.description
        );
    }
}
