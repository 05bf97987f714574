use clap::{Arg, Command};

pub const ARG_DB_TIMEOUT_SECONDS: &str = "db-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_DB_TIMEOUT_SECONDS)
            .long(ARG_DB_TIMEOUT_SECONDS)
            .help("Upper bound in seconds for a single database operation")
            .env("WEBFORMS_DB_TIMEOUT_SECONDS")
            .default_value("5")
            .value_parser(clap::value_parser!(u64).range(1..)),
    )
}
