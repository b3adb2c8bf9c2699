use fastjob::{cli, handler::exec::CommandHandler, Configuration, ConfigurationSpace};
use serde_json::json;
use std::process::ExitCode;
use tracing_unwrap::ResultExt;

/// Sample sweep: count the output of `ls` and `df` over a few directories.
///
/// `fastjob -g` queues the jobs, `fastjob --cores 4` works them off. Pass `--space` to
/// sweep something else with the same command handler.
fn main() -> ExitCode {
    let specification = Configuration::try_from(json!({
        "command": ["ls", "df"],
        "dir": ["/", "/root", "/etc"]
    }))
    .unwrap_or_log();

    cli::main(
        CommandHandler::default(),
        Some("sample"),
        Some(ConfigurationSpace::new(specification)),
    )
}
