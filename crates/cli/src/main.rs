use std::process::ExitCode;

fn main() -> ExitCode {
    cirrus_cli::run()
}
