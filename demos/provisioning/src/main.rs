use std::error::Error;
use std::path::Path;

use clap::Parser;

use dslab_provisioning::core::common::NO_NEXT_EVENT;
use dslab_provisioning::core::config::ProvisioningConfig;
use dslab_provisioning::core::vm_allocation_policy::VmAllocationPolicy;
use dslab_provisioning::core::vm_registry::VmRegistry;
use dslab_provisioning::extensions::history_writer::{save_host_history, save_vm_history};
use dslab_provisioning::log::LogContext;
use dslab_provisioning::{log_info, log_warn};

fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to provisioning config
    #[clap(short, long)]
    config: String,

    /// Directory for CSV files with VM and host utilization histories
    #[clap(short, long)]
    output: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logger();
    let args = Args::parse();
    let config = ProvisioningConfig::from_file(&args.config)?;
    let mut ctx = LogContext::new("demo");

    let mut policy = config.build_allocation_policy()?;
    let mut vms = VmRegistry::new();
    for mut vm in config.build_vms()? {
        if !policy.allocate_host_for_vm(&mut vm) {
            log_warn!(ctx, "vm {} can't be placed on any host", vm.uid());
            continue;
        }
        vms.register(vm);
    }
    log_info!(ctx, "placed {} vms on {} hosts", vms.len(), policy.host_list().len());

    let mut time = config.sweep_interval;
    while time <= config.simulation_length {
        ctx.set_time(time);
        let mut next_event = NO_NEXT_EVENT;
        for host in policy.host_list() {
            next_event = next_event.min(policy.host_manager_mut().update_vms_processing(host, time, &mut vms));
        }
        let completed: usize = policy
            .host_list()
            .into_iter()
            .map(|host| policy.host_manager().completed_vms(host, &vms).len())
            .sum();
        log_info!(ctx, "sweep done, {} vms completed, next workload event at {:.3}", completed, next_event);
        time += config.sweep_interval;
    }

    let host_names = config.host_names();
    for host in policy.host_list() {
        println!(
            "{}: {} vms, {} free PEs, CPU utilization {:.3} (previous {:.3})",
            host_names.get(host as usize).map_or("?", |name| name.as_str()),
            policy.vms_on_host(host).len(),
            policy.free_pes(host),
            policy.host_manager().utilization_of_cpu(host),
            policy.host_manager().previous_utilization_of_cpu(host),
        );
    }

    if let Some(output) = args.output {
        let dir = Path::new(&output);
        std::fs::create_dir_all(dir)?;
        save_vm_history(&dir.join("vms.csv").to_string_lossy(), &vms)?;
        save_host_history(&dir.join("hosts.csv").to_string_lossy(), policy.host_manager())?;
        log_info!(ctx, "histories are saved to {}", output);
    }
    Ok(())
}
