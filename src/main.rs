use std::sync::Arc;

use live_talk::{init_logging, load_config, SessionState, VoiceAssistant};

#[tokio::main]
async fn main() {
    init_logging();

    let config = load_config();
    let prompt = Arc::new(|| {
        eprintln!("The API key was rejected. Set GEMINI_API_KEY to a paid-tier key and retry.");
    });

    let assistant = match VoiceAssistant::native(&config, prompt) {
        Ok(assistant) => assistant,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let mut status = assistant.status();
    assistant.start();
    println!("Press Ctrl+C to end the talk.");

    let mut headline = String::new();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                if snapshot.headline != headline {
                    headline = snapshot.headline.clone();
                    println!("{}", headline);
                }
                if let Some(message) = snapshot.user_message.as_deref() {
                    eprintln!("{}", message);
                }
                if matches!(snapshot.state, SessionState::Closed | SessionState::Error(_)) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                assistant.end_talk();
            }
        }
    }

    if let Some(state) = assistant.finished().await {
        tracing::info!(?state, "Live talk finished");
    }
}
