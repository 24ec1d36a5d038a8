use std::io::Write as _;
use std::sync::Arc;

use chat_stream::init_observability;
use chat_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    init_observability();

    let query = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let thread_id = std::env::var("CHAT_THREAD_ID").unwrap_or_else(|_| "demo-thread".to_string());

    let transport = Arc::new(HttpTransport::from_env()?);
    let mut composer = Composer::new(transport, thread_id);
    composer.send(Draft::new(query))?;

    while let Some(update) = composer.next_update().await {
        match update.event {
            ChatEvent::Token { text } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            ChatEvent::MessageCreated { id } => eprintln!("[message {id}]"),
            ChatEvent::Telemetry { events } => {
                for event in events {
                    eprintln!("[telemetry {:?}]", event.kind);
                }
            }
            ChatEvent::Interrupt { payload } => println!("\n{}", payload.display_text()),
            ChatEvent::Error { message } => eprintln!("\nerror: {message}"),
            ChatEvent::Done => println!(),
        }
    }

    Ok(())
}
