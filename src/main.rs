mod builder;
mod corpus;
mod embedder;
mod llm;
mod ranker;

use std::env;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use embedder::Embedder;
use llm::{Llm, LlmConfig};

const TOP_K: usize = 3;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("build") => {
            let data_dir = PathBuf::from(args.next().unwrap_or_else(|| "data".to_string()));
            let embedder = Embedder::load().await?;
            builder::build(&data_dir, &embedder).await
        }
        arg => {
            let data_dir = PathBuf::from(arg.unwrap_or("data"));
            serve(&data_dir).await
        }
    }
}

async fn serve(data_dir: &Path) -> Result<()> {
    let embedder = Embedder::load().await?;

    let corpus = match corpus::load(data_dir) {
        Ok(corpus) => corpus,
        Err(e @ corpus::CorpusError::Missing { .. }) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };
    corpus.check_dim(embedder.dim())?;

    let llm = Llm::new(LlmConfig::from_env()?)?;

    println!("GENESIS — {} verses loaded. Ctrl+D to exit.", corpus.len());

    loop {
        print!("Seek guidance > ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }

        // per-query failures are printed and the loop continues
        let verses = match ranker::find_verses(&embedder, &corpus, query, TOP_K) {
            Ok(verses) => verses,
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };

        println!("\n📖 Scripture");
        for verse in &verses {
            println!("  {}  ({:.2})", verse.reference, verse.score);
            println!("  \"{}\"", verse.text);
        }

        match llm.generate_guidance(query, &verses).await {
            Ok(guidance) => println!("\n✨ Guidance\n{guidance}\n"),
            Err(e) => eprintln!("\nError connecting to AI: {e}\n"),
        }
    }

    Ok(())
}
