use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    stowaway::cli::backup_main().await
}
