use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest line content accepted, terminator excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Reads the next line with its terminator stripped, or `None` once the peer
/// closes the stream. Lines longer than [`MAX_LINE_LEN`] are an error.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    read_line_limited(reader, MAX_LINE_LEN).await
}

/// Like [`read_line`] with an explicit content limit.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// failing the read.
pub async fn read_line_limited<R>(reader: &mut R, max_len: usize) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the content plus a CRLF terminator.
    let limit = max_len + 2;
    let mut raw = Vec::new();
    let bytes = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut raw)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }

    let terminated = raw.last() == Some(&b'\n');
    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    if raw.len() > max_len || (!terminated && bytes == limit) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {max_len} bytes"),
        ));
    }

    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

/// Writes `text` followed by CRLF and flushes.
pub async fn write_line<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(text.len() + 2);
    encoded.extend_from_slice(text.as_bytes());
    encoded.extend_from_slice(b"\r\n");
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn accepts_lf_and_crlf_terminators() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);

        writer
            .write_all(b"LOGIN alice secret\r\nhello\nlast")
            .await
            .expect("write raw bytes");
        drop(writer);

        let mut lines = Vec::new();
        while let Some(line) = read_line(&mut reader).await.expect("read line") {
            lines.push(line);
        }

        assert_eq!(lines, vec!["LOGIN alice secret", "hello", "last"]);
    }

    #[tokio::test]
    async fn write_terminates_with_crlf() {
        let (mut writer, mut reader) = tokio::io::duplex(1024);

        write_line(&mut writer, "Logged in")
            .await
            .expect("write line");
        drop(writer);

        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).await.expect("read raw bytes");
        assert_eq!(raw, b"Logged in\r\n");
    }

    #[tokio::test]
    async fn empty_line_is_not_eof() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = BufReader::new(reader);

        writer.write_all(b"\r\n").await.expect("write blank line");
        drop(writer);

        assert_eq!(
            read_line(&mut reader).await.expect("read blank line"),
            Some(String::new())
        );
        assert_eq!(read_line(&mut reader).await.expect("read eof"), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_fatal() {
        let mut reader: &[u8] = b"caf\xe9\r\nLOGOUT\r\n";

        assert_eq!(
            read_line(&mut reader).await.expect("read lossy line"),
            Some("caf\u{FFFD}".to_string())
        );
        assert_eq!(
            read_line(&mut reader).await.expect("read next line"),
            Some("LOGOUT".to_string())
        );
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let mut data = vec![b'a'; MAX_LINE_LEN];
        data.extend_from_slice(b"\r\nnext\n");
        let mut reader: &[u8] = &data;

        let line = read_line(&mut reader)
            .await
            .expect("read line at limit")
            .expect("line present");
        assert_eq!(line.len(), MAX_LINE_LEN);
        assert_eq!(
            read_line(&mut reader).await.expect("read next line"),
            Some("next".to_string())
        );
    }

    #[tokio::test]
    async fn line_one_byte_over_limit_is_rejected() {
        let mut data = vec![b'a'; MAX_LINE_LEN + 1];
        data.extend_from_slice(b"\r\n");
        let mut reader: &[u8] = &data;

        let err = read_line(&mut reader)
            .await
            .expect_err("oversized line must fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn unterminated_flood_is_rejected() {
        let data = vec![b'a'; MAX_LINE_LEN * 4];
        let mut reader: &[u8] = &data;

        let err = read_line(&mut reader)
            .await
            .expect_err("unterminated flood must fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn small_limits_apply_to_content_only() {
        let mut reader: &[u8] = b"abcd\r\nabcde\n";

        assert_eq!(
            read_line_limited(&mut reader, 4).await.expect("at limit"),
            Some("abcd".to_string())
        );
        assert!(read_line_limited(&mut reader, 4).await.is_err());
    }
}
