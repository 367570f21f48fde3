//! One terminal session on one store connection.

use std::sync::Arc;

use pairchat_shared::time::{SystemClock, get_timestamp_millis};
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::{mpsc, oneshot};

use crate::{
    domain::SessionConfig, infrastructure::WebSocketStore, usecase::SessionStateMachine,
};

use super::{
    domain::{InputAction, parse_input},
    error::ClientError,
    formatter::MessageFormatter,
    prompt::{PROMPT, redisplay_prompt},
};

/// Read lines on a blocking thread (rustyline is synchronous).
///
/// The receiver yields `None` after Ctrl+C, Ctrl+D or a terminal error.
pub async fn spawn_line_reader() -> Result<mpsc::UnboundedReceiver<String>, ClientError> {
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => {
                let _ = ready_tx.send(Ok(()));
                rl
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
        };

        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok(input_rx),
        Ok(Err(e)) => Err(ClientError::Input(e)),
        Err(_) => Err(ClientError::Input("line reader stopped".to_string())),
    }
}

/// Run one session: connect, sign in, then forward input until the user
/// quits (`Ok`) or the connection is lost.
pub async fn run_terminal_session(
    url: &str,
    config: &SessionConfig,
    max_transaction_attempts: usize,
    input: &mut mpsc::UnboundedReceiver<String>,
) -> Result<(), ClientError> {
    let store = Arc::new(
        WebSocketStore::connect(url, max_transaction_attempts)
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?,
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let session = SessionStateMachine::new(
        store.clone(),
        Arc::new(SystemClock),
        config.clone(),
        event_tx,
    );
    let mut session_task = tokio::spawn(session.run(command_rx));

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let formatted = MessageFormatter::format_event(&event, get_timestamp_millis());
            if !formatted.is_empty() {
                print!("{}", formatted);
                redisplay_prompt();
            }
        }
    });

    print!("{}", MessageFormatter::format_help());
    redisplay_prompt();

    let outcome = loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else {
                    break None;
                };
                match parse_input(&line) {
                    InputAction::Command(command) => {
                        if command_tx.send(command).is_err() {
                            tracing::debug!("Session no longer accepts commands");
                        }
                    }
                    InputAction::Help => print!("{}", MessageFormatter::format_help()),
                    InputAction::Unknown(command) => {
                        print!("{}", MessageFormatter::format_unknown_command(&command));
                    }
                    InputAction::Quit => break None,
                }
            }
            joined = &mut session_task => {
                break Some(joined);
            }
        }
    };

    let result = match outcome {
        // The user quit: closing the command channel makes the session leave and stop.
        None => {
            drop(command_tx);
            match session_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Session ended with an error: {}", e),
                Err(e) => tracing::warn!("Session task failed: {}", e),
            }
            if let Err(e) = store.close().await {
                tracing::debug!("Close request failed: {}", e);
            }
            Ok(())
        }
        Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(e))) => Err(ClientError::Session(e)),
        Some(Err(e)) => Err(ClientError::Connection(format!("Session task failed: {}", e))),
    };

    printer.abort();
    result
}
