use std::process::ExitCode;

fn main() -> ExitCode {
    orderly_cli::run()
}
