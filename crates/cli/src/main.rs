use std::process::ExitCode;

fn main() -> ExitCode {
    gestflow_cli::run()
}
