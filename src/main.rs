#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_attempts::run().await {
        eprintln!("exam-attempts fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
