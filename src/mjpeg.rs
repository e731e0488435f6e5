use bytes::{Buf, Bytes, BytesMut};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Largest part kept in memory; anything bigger is dropped and the decoder
/// resyncs at the next delimiter.
pub const MAX_PART_LEN: usize = 8 * 1024 * 1024;

#[derive(Clone, Copy, Debug)]
enum Stage {
    /// Looking for the next delimiter line
    Seek,
    /// Buffer starts at a delimiter, headers not complete yet
    Headers,
    /// Headers parsed, waiting for the rest of the body
    Body {
        header_end: usize,
        length: Option<usize>,
    },
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies
///
/// Bytes are pushed as they arrive off the wire; complete parts are returned
/// by [`MjpegDecoder::next_part`]. A part ends either after `Content-Length`
/// bytes or at the next delimiter line.
///
/// Memory stays bounded: bytes outside any part are discarded down to a
/// possible delimiter prefix, and parts over [`MAX_PART_LEN`] are skipped.
/// Each byte is scanned once per stage.
pub struct MjpegDecoder {
    delimiter: Vec<u8>,
    buf: BytesMut,
    stage: Stage,
    // Where the pending search resumes
    scan: usize,
}

impl MjpegDecoder {
    pub fn new(boundary: Option<&str>) -> Self {
        let boundary = boundary.unwrap_or(DEFAULT_BOUNDARY);
        // Some servers already put the leading dashes into the header value
        let delimiter = if boundary.starts_with("--") {
            boundary.as_bytes().to_vec()
        } else {
            format!("--{}", boundary).into_bytes()
        };

        Self {
            delimiter,
            buf: BytesMut::new(),
            stage: Stage::Seek,
            scan: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn next_part(&mut self) -> Option<Bytes> {
        loop {
            match self.stage {
                Stage::Seek => match find(&self.buf, &self.delimiter, 0) {
                    Some(start) => {
                        // Preamble or the tail of a part we could not frame
                        self.buf.advance(start);
                        self.enter(Stage::Headers);
                    }
                    None => {
                        let keep = self.delimiter.len() - 1;
                        if self.buf.len() > keep {
                            self.buf.advance(self.buf.len() - keep);
                        }
                        return None;
                    }
                },

                Stage::Headers => match find(&self.buf, HEADER_END, self.scan) {
                    Some(pos) => {
                        let header_end = pos + HEADER_END.len();
                        let length = content_length(&self.buf[..header_end]);
                        if length.is_some_and(|len| len > MAX_PART_LEN) {
                            tracing::debug!(?length, "Skipping oversized MJPEG part");
                            self.skip_part();
                        } else {
                            self.enter(Stage::Body { header_end, length });
                        }
                    }
                    None if self.buf.len() > MAX_PART_LEN => {
                        tracing::debug!("Skipping MJPEG part with unterminated headers");
                        self.skip_part();
                    }
                    None => {
                        self.scan = resume_at(self.buf.len(), HEADER_END.len(), 0);
                        return None;
                    }
                },

                Stage::Body {
                    header_end,
                    length: Some(len),
                } => {
                    if self.buf.len() < header_end + len {
                        return None;
                    }
                    return Some(self.take_part(header_end, header_end + len));
                }

                Stage::Body {
                    header_end,
                    length: None,
                } => match find(&self.buf, &self.delimiter, self.scan.max(header_end)) {
                    Some(next) => {
                        let end = trim_crlf(&self.buf[..next], header_end);
                        return Some(self.take_part(header_end, end));
                    }
                    None if self.buf.len() > MAX_PART_LEN => {
                        tracing::debug!("Skipping MJPEG part without a closing delimiter");
                        self.skip_part();
                    }
                    None => {
                        self.scan = resume_at(self.buf.len(), self.delimiter.len(), header_end);
                        return None;
                    }
                },
            }
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.scan = 0;
    }

    fn take_part(&mut self, header_end: usize, body_end: usize) -> Bytes {
        let mut part = self.buf.split_to(body_end);
        part.advance(header_end);
        self.enter(Stage::Seek);
        part.freeze()
    }

    /// Drop the delimiter the buffer starts with so seeking finds the next one
    fn skip_part(&mut self) {
        self.buf.advance(self.delimiter.len());
        self.enter(Stage::Seek);
    }
}

/// Start of the region a needle of `needle_len` bytes could still straddle
fn resume_at(len: usize, needle_len: usize, floor: usize) -> usize {
    len.saturating_sub(needle_len - 1).max(floor)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn trim_crlf(buf: &[u8], floor: usize) -> usize {
    let mut end = buf.len();
    if end >= floor + 2 && &buf[end - 2..end] == b"\r\n" {
        end -= 2;
    }
    end
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
