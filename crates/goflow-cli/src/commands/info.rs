//! `goflow info`: Display runtime environment and scheduler configuration.

use crate::output::StyledOutput;
use goflow_runtime::config::{ENV_MAX_PENDING, ENV_NUM_THREADS, ENV_STACK_SIZE};
use goflow_runtime::SchedulerConfig;
use termcolor::ColorChoice;

pub fn execute(color: ColorChoice) -> anyhow::Result<()> {
    let mut out = StyledOutput::new(color);

    out.success(&format!("goflow v{}", env!("CARGO_PKG_VERSION")));
    out.newline();
    out.newline();

    out.field(
        "Platform:",
        &format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH),
    );
    out.field(
        "CPUs:",
        &format!("{} logical, {} physical", num_cpus::get(), num_cpus::get_physical()),
    );

    out.newline();
    out.bold("Scheduler:");
    out.newline();
    let config = match SchedulerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            out.warning(&format!("  {}; falling back to defaults", err));
            out.newline();
            SchedulerConfig::default()
        }
    };
    out.field("  workers", &config.effective_workers().to_string());
    out.field(
        "  max pending",
        &config
            .max_pending
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
    );
    out.field("  threads", &format!("{}-<index>", config.thread_prefix));
    out.field(
        "  stack size",
        &config
            .stack_size
            .map_or_else(|| "platform default".to_string(), |n| format!("{} bytes", n)),
    );

    out.newline();
    out.bold("Environment:");
    out.newline();
    for var in [ENV_NUM_THREADS, ENV_MAX_PENDING, ENV_STACK_SIZE, "GOFLOW_LOG"] {
        print_env(&mut out, var);
    }
    out.flush();

    Ok(())
}

fn print_env(out: &mut StyledOutput, var: &str) {
    out.plain(&format!("  {} = ", var));
    match std::env::var(var) {
        Ok(val) => out.info(&val),
        Err(_) => out.plain("(default)"),
    }
    out.newline();
}
