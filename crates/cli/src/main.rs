use std::process::ExitCode;

fn main() -> ExitCode {
    vendabot_cli::run()
}
