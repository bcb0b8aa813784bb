//! Keystroke capture is done by an external program. It feeds the daemon a stream of lines, one
//! per keystroke: an empty line is an untagged keystroke, anything else names the application the
//! keystroke went to.

pub mod collector;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Application that received the keystroke, when the capture source knows it.
    pub app: Option<Arc<str>>,
}

/// Intended to serve as a contract capture sources must implement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeystrokeSource: Send {
    /// Returns the next keystroke, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Result<Option<KeyEvent>>;
}

/// Reads keystrokes from any line oriented stream: stdin, a named pipe, a file.
pub struct LineSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> KeystrokeSource for LineSource<R> {
    async fn next_event(&mut self) -> Result<Option<KeyEvent>> {
        Ok(self.lines.next_line().await?.map(|line| parse_line(&line)))
    }
}

pub fn parse_line(line: &str) -> KeyEvent {
    let app = line.trim();
    KeyEvent {
        app: (!app.is_empty()).then(|| app.into()),
    }
}

/// Opens the capture stream: `input` when given, stdin otherwise.
pub async fn open_source(input: Option<&Path>) -> Result<Box<dyn KeystrokeSource>> {
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open capture input {path:?}"))?;
            Ok(Box::new(LineSource::new(BufReader::new(file))))
        }
        None => Ok(Box::new(LineSource::new(BufReader::new(tokio::io::stdin())))),
    }
}
