//! Console transport over stdio.
//!
//! The editing itself (history, control keys, prompt) is the sans-IO
//! [`LineEditor`]; this task just moves bytes between it and the stdio file
//! descriptors and forwards completed lines into the intake queue.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use busbar_core::{
    console::LineEditor,
    pipeline::{InboundFrame, ReplyRoute, Source},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
};

/// Reader/writer loop on stdin/stdout.
pub async fn serve(
    editor: Arc<Mutex<LineEditor>>,
    intake: mpsc::Sender<InboundFrame>,
    mut replies: mpsc::Receiver<Bytes>,
) {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buffer = [0u8; 64];

    let initial_prompt = editor.lock().ok().map(|editor| editor.prompt());
    if let Some(prompt) = initial_prompt {
        let _ = stdout.write_all(prompt.as_bytes()).await;
        let _ = stdout.flush().await;
    }

    loop {
        tokio::select! {
            read = stdin.read(&mut buffer) => {
                let length = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };

                let output = match editor.lock() {
                    Ok(mut editor) => editor.feed(&buffer[..length]),
                    Err(_) => return,
                };

                if !output.echo.is_empty() {
                    let _ = stdout.write_all(&output.echo).await;
                    let _ = stdout.flush().await;
                }

                for line in output.lines {
                    let inbound = InboundFrame {
                        source: Source::Console,
                        mtu: 0,
                        payload: Bytes::from(line.into_bytes()),
                        route: ReplyRoute::Console,
                    };

                    if intake.send(inbound).await.is_err() {
                        return;
                    }
                }
            },

            reply = replies.recv() => {
                let Some(frame) = reply else { return };

                let _ = stdout.write_all(&frame).await;

                let prompt = match editor.lock() {
                    Ok(mut editor) => {
                        editor.note_reply(frame.len());
                        editor.prompt()
                    },
                    Err(_) => return,
                };

                let _ = stdout.write_all(prompt.as_bytes()).await;
                let _ = stdout.flush().await;
            },
        }
    }
}
