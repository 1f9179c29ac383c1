use anyhow::{Context, Result};
use std::io::{self, Write};

use ollama_chat::console::Console;
use ollama_chat::{ChatEvent, Config, ConversationEngine};

pub async fn chat(config: &Config) -> Result<()> {
    let engine = ConversationEngine::new(config)?;
    let mut console = Console::new(engine, io::stdout());
    console.run().await?;
    println!("👋 Bye!");
    Ok(())
}

/// One exchange on a fresh conversation, streamed to stdout
pub async fn ask(config: &Config, prompt: &str) -> Result<()> {
    let mut titles_off = config.clone();
    titles_off.title.enabled = false;

    let engine = ConversationEngine::new(&titles_off)?;
    let id = engine.new_session();
    let mut events = engine.subscribe();

    let printer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Ok(event) = events.recv().await {
            match event {
                ChatEvent::MessageUpdated { delta, .. } => {
                    let _ = write!(stdout, "{delta}");
                    let _ = stdout.flush();
                }
                ChatEvent::ExchangeCompleted { .. } | ChatEvent::ExchangeFailed { .. } => break,
                _ => {}
            }
        }
    });

    let result = engine.submit(id, prompt).await;
    // closes the channel so the printer drains and stops even when nothing was sent
    drop(engine);
    printer.await.context("Output task failed")?;
    println!();

    let reply = result?;
    tracing::debug!(
        eval_count = ?reply.metrics.eval_count,
        done_reason = ?reply.done_reason,
        "reply finished"
    );
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    let path = Config::default_path()?;
    println!("# {}", path.display());
    print!(
        "{}",
        toml::to_string_pretty(config).context("Failed to serialize config")?
    );
    Ok(())
}

pub fn init_config() -> Result<()> {
    let path = Config::default_path()?;
    if path.exists() {
        println!("⚠️  Config already exists at {}", path.display());
        return Ok(());
    }
    let path = Config::default().save()?;
    println!("✨ Wrote default config to {}", path.display());
    Ok(())
}
