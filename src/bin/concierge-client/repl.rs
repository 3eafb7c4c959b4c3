//! Read-eval-print loop over stdin

use anyhow::Result;
use concierge::{ChatSession, Error};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

const EXIT_COMMAND: &str = "exit";

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

/// Run the loop until `exit`, end of input or Ctrl-C at the prompt.
///
/// Ctrl-C while a reply is in flight only cancels that turn.
pub async fn run(mut chat: ChatSession, stream: bool) -> Result<()> {
    println!("Chatting with {} (type '{}' to quit)", chat.model(), EXIT_COMMAND);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == EXIT_COMMAND {
            break;
        }

        let cancel = CancellationToken::new();
        let turn = send_turn(&mut chat, input, cancel.clone(), stream);
        tokio::pin!(turn);

        let result = tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        };

        match result {
            Ok(()) => {}
            Err(Error::ClientCancelled) => eprintln!("\n[cancelled]"),
            Err(e) => eprintln!("\nError: {}", e),
        }
    }

    Ok(())
}

async fn send_turn(
    chat: &mut ChatSession,
    input: &str,
    cancel: CancellationToken,
    stream: bool,
) -> concierge::Result<()> {
    if stream {
        chat.send_streaming(input, cancel, |delta| {
            print!("{}", delta);
            let _ = io::stdout().flush();
        })
        .await?;
        println!();
    } else {
        let reply = chat.send(input, cancel).await?;
        println!("{}", reply);
    }
    Ok(())
}
