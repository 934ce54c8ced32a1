use std::{
    borrow::Cow,
    io::{self, Read, Seek},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::error::Result;

const BAR_TEMPLATE: &str =
    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";

/// Receives byte counts from long-running reads and writes.
pub trait ProgressSink {
    fn advance(&self, bytes: u64);
}

impl ProgressSink for ProgressBar {
    fn advance(&self, bytes: u64) {
        self.inc(bytes);
    }
}

impl ProgressSink for AtomicU64 {
    fn advance(&self, bytes: u64) {
        self.fetch_add(bytes, Ordering::Relaxed);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for &S {
    fn advance(&self, bytes: u64) {
        (**self).advance(bytes);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn advance(&self, bytes: u64) {
        (**self).advance(bytes);
    }
}

/// A byte stream that an upload consumes from start to end.
pub trait UploadSource: Read + Send {
    fn position(&mut self) -> io::Result<u64>;
}

/// Passes reads through unchanged and reports how many bytes each one returned.
#[derive(Debug)]
pub struct ProgressReader<R, S> {
    inner: R,
    sink: S,
}

impl<R, S> ProgressReader<R, S> {
    pub fn new(inner: R, sink: S) -> Self {
        ProgressReader { inner, sink }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read, S: ProgressSink> Read for ProgressReader<R, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.sink.advance(count as u64);
        Ok(count)
    }
}

impl<R: Read + Seek + Send, S: ProgressSink + Send> UploadSource for ProgressReader<R, S> {
    fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }
}

pub fn progress_bar<M: Into<Cow<'static, str>>>(total: u64, message: M) -> Result<ProgressBar> {
    let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)?
        .progress_chars("#>-");
    bar.set_style(style);
    bar.set_message(message);
    Ok(bar)
}
