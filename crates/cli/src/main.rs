use std::process::ExitCode;

fn main() -> ExitCode {
    dialsync_cli::run()
}
