#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = quizmaster_rust::run().await {
        eprintln!("quizmaster-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
