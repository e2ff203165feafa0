use futures::{Stream, StreamExt};

#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((end, sep_len)) = find_separator(&self.buf) {
            let rest = self.buf.split_off(end + sep_len);
            let mut frame = std::mem::replace(&mut self.buf, rest);
            frame.truncate(end);
            frames.push(frame);
        }
        frames
    }

    /// Whatever is left once the stream has ended. Not a complete record.
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }
}

fn find_separator(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: Option<String>,
}

impl SseFrame {
    pub fn parse(frame: &str) -> Self {
        let mut out = SseFrame::default();
        for line in frame.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => out.event = Some(value.to_string()),
                "data" => match out.data.as_mut() {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => out.data = Some(value.to_string()),
                },
                _ => {}
            }
        }
        out
    }
}

pub fn sse_frames<S, B, E>(bytes: S) -> impl Stream<Item = anyhow::Result<SseFrame>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    futures::stream::unfold(
        (Some(Box::pin(bytes)), FrameBuffer::new(), std::collections::VecDeque::new()),
        |(mut bytes, mut frames, mut ready)| async move {
            loop {
                if let Some(frame) = ready.pop_front() {
                    return Some((Ok(frame), (bytes, frames, ready)));
                }
                let Some(source) = bytes.as_mut() else {
                    return None;
                };
                match source.next().await {
                    Some(Ok(chunk)) => {
                        for raw in frames.push(chunk.as_ref()) {
                            match std::str::from_utf8(&raw) {
                                Ok(text) => ready.push_back(SseFrame::parse(text)),
                                Err(e) => tracing::warn!(error = %e, "skipping non-UTF-8 SSE frame"),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        bytes = None;
                        return Some((
                            Err(anyhow::anyhow!("SSE stream error: {e}")),
                            (bytes, frames, ready),
                        ));
                    }
                    None => {
                        bytes = None;
                        let tail = SseFrame::parse(&String::from_utf8_lossy(frames.remainder()));
                        if tail.data.is_some() {
                            ready.push_back(tail);
                        }
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut fb = FrameBuffer::new();
        assert!(fb.push(b"data: {\"type\":").is_empty());
        let frames = fb.push(b"\"done\"}\n\ndata: par");
        assert_eq!(frames, vec![b"data: {\"type\":\"done\"}".to_vec()]);
        assert_eq!(fb.remainder(), b"data: par");
    }

    #[test]
    fn multibyte_character_cut_by_chunking_survives() {
        let text = "data: {\"t\":\"caf\u{e9} \u{1f600}\"}\n\n".as_bytes();
        let mut fb = FrameBuffer::new();
        let mut frames = Vec::new();
        for byte in text {
            frames.extend(fb.push(std::slice::from_ref(byte)));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(std::str::from_utf8(&frames[0]).unwrap(), "data: {\"t\":\"caf\u{e9} \u{1f600}\"}");
    }

    #[test]
    fn crlf_separators_are_accepted() {
        let mut fb = FrameBuffer::new();
        let frames = fb.push(b"event: ping\r\ndata: {}\r\n\r\ndata: x\n\n");
        assert_eq!(frames.len(), 2);
        let first = SseFrame::parse(std::str::from_utf8(&frames[0]).unwrap());
        assert_eq!(first.event.as_deref(), Some("ping"));
        assert_eq!(first.data.as_deref(), Some("{}"));
    }

    #[test]
    fn parse_handles_comments_and_multiline_data() {
        let frame = SseFrame::parse(": keep-alive\nevent: message_delta\ndata: a\ndata:b\nid: 7");
        assert_eq!(frame.event.as_deref(), Some("message_delta"));
        assert_eq!(frame.data.as_deref(), Some("a\nb"));

        let comment_only = SseFrame::parse(":");
        assert_eq!(comment_only, SseFrame::default());
    }

    #[tokio::test]
    async fn sse_frames_streams_parsed_events_and_trailing_frame() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"event: a\nda".to_vec()),
            Ok(b"ta: 1\n\nevent: b\ndata: 2\n\ndata: 3".to_vec()),
        ];
        let frames: Vec<SseFrame> = sse_frames(futures::stream::iter(chunks))
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].event.as_deref(), Some("a"));
        assert_eq!(frames[1].data.as_deref(), Some("2"));
        assert_eq!(frames[2].data.as_deref(), Some("3"));
    }
}
