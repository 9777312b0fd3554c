//! Asynchronous submission sequences.
//!
//! One abstract async-sequence contract covers every streaming source: a
//! boxed [`futures::Stream`] of [`SendItem`]s. Pull-based polling is the
//! backpressure mechanism: the consumer polls for the next item only once
//! the previous one has been accepted by the (bounded) transmit queue.
//! Adapters below bridge push sources (channels) and pull sources (files,
//! in-memory text) onto the same contract.

use crate::gcode::SendItem;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;

/// The abstract submission sequence consumed by `send_stream`.
pub type SendStream = BoxStream<'static, SendItem>;

/// Adapt a bounded channel receiver into a [`SendStream`].
///
/// This is the push-oriented entry point: producers hold the paired
/// `Sender` and block when the channel is full, extending backpressure all
/// the way to the source.
pub fn from_receiver(rx: mpsc::Receiver<SendItem>) -> SendStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// Adapt an in-memory collection of items into a [`SendStream`].
pub fn from_items<I>(items: I) -> SendStream
where
    I: IntoIterator,
    I::Item: Into<SendItem> + 'static,
    I::IntoIter: Send + 'static,
{
    futures::stream::iter(items.into_iter().map(Into::into)).boxed()
}

/// Split program text into submission lines.
///
/// Strips one trailing `\r` per line and discards the empty artifact of a
/// terminating newline; interior empty lines pass through unchanged, and a
/// final line without a newline is still produced.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_drops_terminating_newline_artifact() {
        assert_eq!(split_lines("G0 X1\nG0 X2\n"), vec!["G0 X1", "G0 X2"]);
    }

    #[test]
    fn split_keeps_last_line_without_newline() {
        assert_eq!(split_lines("G0 X1\nG0 X2"), vec!["G0 X1", "G0 X2"]);
    }

    #[test]
    fn split_preserves_interior_empty_lines() {
        assert_eq!(split_lines("G0 X1\n\nG0 X2\n"), vec!["G0 X1", "", "G0 X2"]);
    }

    #[test]
    fn split_strips_carriage_returns() {
        assert_eq!(split_lines("G0 X1\r\nG0 X2\r\n"), vec!["G0 X1", "G0 X2"]);
    }

    #[test]
    fn split_empty_text() {
        assert_eq!(split_lines(""), vec![""]);
        assert_eq!(split_lines("\n"), vec![""]);
    }

    #[tokio::test]
    async fn receiver_adapter_yields_until_closed() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = from_receiver(rx);
        tx.send(SendItem::from("G0 X1")).await.unwrap();
        tx.send(SendItem::from("G0 X2")).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await.unwrap().text(), "G0 X1");
        assert_eq!(stream.next().await.unwrap().text(), "G0 X2");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn items_adapter_preserves_order() {
        let mut stream = from_items(vec!["a", "b", "c"]);
        assert_eq!(stream.next().await.unwrap().text(), "a");
        assert_eq!(stream.next().await.unwrap().text(), "b");
        assert_eq!(stream.next().await.unwrap().text(), "c");
        assert!(stream.next().await.is_none());
    }
}
