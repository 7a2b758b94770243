#[tokio::main]
async fn main() {
    if let Err(err) = quizdesk::run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
