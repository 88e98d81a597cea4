use std::process::ExitCode;

fn main() -> ExitCode {
    rehabdesk_cli::run()
}
