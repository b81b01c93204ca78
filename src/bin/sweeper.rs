#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_session::run_sweeper().await {
        eprintln!("exam-session-sweeper fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
