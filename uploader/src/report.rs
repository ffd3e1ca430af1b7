//! Console output for upload progress.

use crate::upload::{CompletionResult, ProgressEvent, UploadObserver, UploadStatus};
use std::io::{self, Write};

/// Prints one line per interesting upload event.
///
/// Once a failure has been printed, further progress for the same upload is
/// ignored.
#[derive(Debug)]
pub struct ConsoleReporter<W> {
    out: W,
    failed: bool,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out, failed: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{args}").and_then(|()| self.out.flush()) {
            tracing::warn!(error = %e, "could not write to console");
        }
    }
}

impl<W: Write> UploadObserver for ConsoleReporter<W> {
    fn on_progress(&mut self, event: &ProgressEvent<'_>) {
        if self.failed {
            return;
        }
        match event.status {
            UploadStatus::Uploading => {
                self.line(format_args!("{} KB bereits hochgeladen", event.bytes_sent / 1024));
            }
            UploadStatus::Failed => {
                self.failed = true;
                match event.error {
                    Some(e) => {
                        let message = causes(e).collect::<Vec<_>>().join(": ");
                        self.line(format_args!("Fehler beim Upload: {message}"));
                    }
                    None => self.line(format_args!("Fehler beim Upload")),
                }
            }
            UploadStatus::Starting | UploadStatus::Completed => {}
        }
    }

    fn on_complete(&mut self, result: &CompletionResult) {
        self.line(format_args!(
            "Upload erfolgreich beendet! Das Video hat die Id: {}",
            result.video_id
        ));
    }
}

/// `error` and everything that led to it, outermost first.
fn causes(error: &dyn std::error::Error) -> impl Iterator<Item = String> + '_ {
    std::iter::successors(Some(error), |e| e.source()).map(ToString::to_string)
}
