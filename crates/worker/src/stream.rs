//! Bounded line reading from child pipes.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read one line, storing at most `cap` bytes of it.
///
/// The remainder of an oversize line is consumed and discarded; the caller
/// gets the capped prefix with `truncated = true`. Returns `None` at EOF.
pub async fn read_capped_line<R>(
    reader: &mut R,
    cap: usize,
) -> io::Result<Option<(String, bool)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut saw_any = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if !saw_any {
                return Ok(None);
            }
            return Ok(Some((into_lossy(buf), truncated)));
        }
        saw_any = true;

        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            append_capped(&mut buf, &available[..pos], cap, &mut truncated);
            reader.consume(pos + 1);
            return Ok(Some((into_lossy(buf), truncated)));
        }

        let len = available.len();
        append_capped(&mut buf, available, cap, &mut truncated);
        reader.consume(len);
    }
}

fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize, truncated: &mut bool) {
    let room = cap.saturating_sub(buf.len());
    if chunk.len() > room {
        *truncated = true;
    }
    let take = room.min(chunk.len());
    buf.extend_from_slice(&chunk[..take]);
}

fn into_lossy(buf: Vec<u8>) -> String {
    match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn read_all(input: &str, cap: usize) -> Vec<(String, bool)> {
        let mut reader = BufReader::new(Cursor::new(input.as_bytes().to_vec()));
        let mut out = Vec::new();
        while let Some(item) = read_capped_line(&mut reader, cap).await.unwrap() {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn splits_lines_without_truncation() {
        let lines = read_all("one\ntwo\nthree\n", 100).await;
        assert_eq!(
            lines,
            vec![
                ("one".to_string(), false),
                ("two".to_string(), false),
                ("three".to_string(), false)
            ]
        );
    }

    #[tokio::test]
    async fn final_line_without_newline_is_returned() {
        let lines = read_all("one\ntail", 100).await;
        assert_eq!(lines[1], ("tail".to_string(), false));
    }

    #[tokio::test]
    async fn oversize_line_is_capped_and_flagged() {
        let long = "x".repeat(50);
        let input = format!("{long}\nshort\n");
        let lines = read_all(&input, 10).await;
        assert_eq!(lines[0], ("x".repeat(10), true));
        // The remainder was discarded; the next line is intact.
        assert_eq!(lines[1], ("short".to_string(), false));
    }

    #[tokio::test]
    async fn line_exactly_at_cap_is_not_flagged() {
        let input = format!("{}\n", "y".repeat(10));
        let lines = read_all(&input, 10).await;
        assert_eq!(lines[0], ("y".repeat(10), false));
    }

    #[tokio::test]
    async fn empty_input_is_eof() {
        assert!(read_all("", 10).await.is_empty());
    }
}
