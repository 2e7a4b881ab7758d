use std::process::ExitCode;

fn main() -> ExitCode {
    vetbox::cli::run()
}
