use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    stowaway::cli::cleanup_main().await
}
