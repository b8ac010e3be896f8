use clap::Parser;

/// Run a batch of simulated jobs through the task controller.
///
/// Builds a scheduler from the config file (or defaults plus environment
/// overrides), submits a task group with mixed priorities, logs progress
/// until every member is terminal and prints the group report.
#[derive(Parser, Debug)]
#[command(name = "taskctl", about = "Priority task controller demo runner")]
pub struct CliArgs {
    /// Path to a TOML config file with a [control] table
    #[arg(long)]
    pub config: Option<String>,

    /// Worker slot count override (0 = available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Control loop tick interval override in milliseconds
    #[arg(long = "tick-ms")]
    pub tick_ms: Option<u64>,

    /// Number of tasks in the group
    #[arg(long, default_value = "8")]
    pub tasks: usize,

    /// How many of the tasks fail on purpose
    #[arg(long, default_value = "0")]
    pub fail: usize,

    /// Simulated work per task in milliseconds
    #[arg(long = "duration-ms", default_value = "500")]
    pub duration_ms: u64,

    /// Cancel the whole group after this many milliseconds
    #[arg(long = "cancel-after-ms")]
    pub cancel_after_ms: Option<u64>,

    /// Print the group report as JSON instead of text
    #[arg(long)]
    pub json: bool,
}
