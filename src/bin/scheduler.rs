#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = quizmaster_rust::run_scheduler().await {
        eprintln!("quizmaster-scheduler fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
